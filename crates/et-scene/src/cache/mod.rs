//! Frame-to-frame probe caches
//!
//! Three caches carry information across simulation frames:
//! - `ProbePathCache` - ordered triangle sequences found by listener probes
//! - `ProbedTriangleCache` - per-triangle age-stamped records for reverb
//! - `RayDistributionCache` - importance map over probe ray directions
//!
//! The two hash caches are separately-chained tables sized from a prime
//! sequence, resized at a fixed load factor. Insertion order is not stable.

mod distribution;
mod probe_path;
mod probed;

pub use distribution::*;
pub use probe_path::*;
pub use probed::*;

/// Bucket counts used when growing the hash caches, one prime per power of
/// two between 2^3 and 2^31.
pub(crate) const BUCKET_PRIMES: [usize; 28] = [
    11, 23, 53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241,
    786433, 1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611,
    402653189, 805306457, 1610612741,
];

/// Default load factor before a table resizes.
pub(crate) const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// The smallest bucket prime greater than `n`.
pub(crate) fn next_bucket_prime(n: usize) -> usize {
    for &prime in &BUCKET_PRIMES {
        if prime > n {
            return prime;
        }
    }
    n
}
