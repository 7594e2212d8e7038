//! Age-stamped per-triangle cache

use super::{next_bucket_prime, DEFAULT_LOAD_FACTOR};
use crate::ray::ObjectSpaceTriangle;

/// Hash table from triangles to probe records.
///
/// Both the listener and every source keep one of these; records are
/// age-stamped by the propagator and removed once they exceed the reverb
/// cache age.
#[derive(Debug, Clone)]
pub struct ProbedTriangleCache<R> {
    buckets: Vec<Vec<(ObjectSpaceTriangle, R)>>,
    len: usize,
    load_factor: f32,
}

impl<R> ProbedTriangleCache<R> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let num_buckets = next_bucket_prime(capacity);
        Self {
            buckets: (0..num_buckets).map(|_| Vec::new()).collect(),
            len: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_index(&self, triangle: &ObjectSpaceTriangle) -> usize {
        (triangle.hash_code() % self.buckets.len() as u64) as usize
    }

    /// Insert or overwrite the record for `triangle`.
    pub fn insert(&mut self, triangle: ObjectSpaceTriangle, record: R) {
        let bucket = self.bucket_index(&triangle);
        for entry in &mut self.buckets[bucket] {
            if entry.0 == triangle {
                entry.1 = record;
                return;
            }
        }
        self.buckets[bucket].push((triangle, record));
        self.len += 1;
        self.grow_if_needed();
    }

    pub fn get(&self, triangle: &ObjectSpaceTriangle) -> Option<&R> {
        let bucket = self.bucket_index(triangle);
        self.buckets[bucket]
            .iter()
            .find(|entry| entry.0 == *triangle)
            .map(|entry| &entry.1)
    }

    pub fn contains(&self, triangle: &ObjectSpaceTriangle) -> bool {
        self.get(triangle).is_some()
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&ObjectSpaceTriangle, &mut R) -> bool) {
        let mut removed = 0;
        for bucket in &mut self.buckets {
            let before = bucket.len();
            bucket.retain_mut(|entry| keep(&entry.0, &mut entry.1));
            removed += before - bucket.len();
        }
        self.len -= removed;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectSpaceTriangle, &R)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| (&entry.0, &entry.1)))
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.len = 0;
    }

    fn grow_if_needed(&mut self) {
        if self.len as f32 <= self.load_factor * self.buckets.len() as f32 {
            return;
        }
        let new_count = next_bucket_prime((self.len as f32 / self.load_factor) as usize);
        let mut buckets: Vec<Vec<(ObjectSpaceTriangle, R)>> =
            (0..new_count).map(|_| Vec::new()).collect();
        for bucket in self.buckets.drain(..) {
            for entry in bucket {
                let index = (entry.0.hash_code() % new_count as u64) as usize;
                buckets[index].push(entry);
            }
        }
        self.buckets = buckets;
    }
}

impl<R> Default for ProbedTriangleCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;

    fn triangle(object: u32, index: u32) -> ObjectSpaceTriangle {
        ObjectSpaceTriangle {
            object: ObjectId(object),
            triangle: index,
        }
    }

    #[test]
    fn insert_find_overwrite() {
        let mut cache = ProbedTriangleCache::new();
        cache.insert(triangle(0, 1), 10u64);
        cache.insert(triangle(0, 2), 20u64);
        assert_eq!(cache.get(&triangle(0, 1)), Some(&10));
        cache.insert(triangle(0, 1), 11u64);
        assert_eq!(cache.get(&triangle(0, 1)), Some(&11));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn resize_preserves_entries() {
        let mut cache = ProbedTriangleCache::with_capacity(0);
        for i in 0..500 {
            cache.insert(triangle(i % 7, i), i as u64);
        }
        assert_eq!(cache.len(), 500);
        for i in 0..500 {
            assert_eq!(cache.get(&triangle(i % 7, i)), Some(&(i as u64)));
        }
    }

    #[test]
    fn retain_removes_and_updates_len() {
        let mut cache = ProbedTriangleCache::new();
        for i in 0..100 {
            cache.insert(triangle(0, i), i);
        }
        cache.retain(|_, record| *record % 2 == 0);
        assert_eq!(cache.len(), 50);
        assert!(cache.contains(&triangle(0, 2)));
        assert!(!cache.contains(&triangle(0, 3)));
    }
}
