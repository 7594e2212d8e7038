//! Flat bounding volume hierarchy
//!
//! One BVH implementation serves both levels of the scene: each mesh builds
//! one over its triangles at preprocess time, and the scene rebuilds one
//! over object world bounds whenever objects move. Construction is a
//! centroid median split; traversal is iterative over an explicit stack.

use crate::math::{Aabb, Ray3};

#[derive(Debug, Clone)]
struct BvhNode {
    bounds: Aabb,
    /// Start of this node's range in the item index list.
    first: u32,
    /// Number of items if a leaf, zero for interior nodes.
    count: u32,
    /// Index of the right child for interior nodes (left child is adjacent).
    right_child: u32,
}

/// A static BVH over externally owned items.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    items: Vec<u32>,
}

/// Leaves hold at most this many items.
const LEAF_SIZE: usize = 4;

impl Bvh {
    /// Build a BVH over the given item bounds. Item `i` is reported to
    /// traversal callbacks as index `i`.
    pub fn build(bounds: &[Aabb]) -> Self {
        if bounds.is_empty() {
            return Self::default();
        }

        let mut items: Vec<u32> = (0..bounds.len() as u32).collect();
        let centroids: Vec<_> = bounds.iter().map(|b| b.center()).collect();
        let mut nodes = Vec::with_capacity(bounds.len() * 2);
        nodes.push(BvhNode {
            bounds: Aabb::EMPTY,
            first: 0,
            count: bounds.len() as u32,
            right_child: 0,
        });

        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let first = nodes[node_index].first as usize;
            let count = nodes[node_index].count as usize;

            let mut node_bounds = Aabb::EMPTY;
            for &item in &items[first..first + count] {
                node_bounds = node_bounds.union(&bounds[item as usize]);
            }
            nodes[node_index].bounds = node_bounds;

            if count <= LEAF_SIZE {
                continue;
            }

            // Split on the widest centroid axis at the median item.
            let centroid_bounds =
                Aabb::from_points(items[first..first + count].iter().map(|&i| centroids[i as usize]));
            let extent = centroid_bounds.max - centroid_bounds.min;
            let axis = if extent.x >= extent.y && extent.x >= extent.z {
                0
            } else if extent.y >= extent.z {
                1
            } else {
                2
            };
            if extent[axis] <= f32::EPSILON {
                continue;
            }

            let mid = count / 2;
            items[first..first + count].select_nth_unstable_by(mid, |&a, &b| {
                centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
            });

            let left = BvhNode {
                bounds: Aabb::EMPTY,
                first: first as u32,
                count: mid as u32,
                right_child: 0,
            };
            let right = BvhNode {
                bounds: Aabb::EMPTY,
                first: (first + mid) as u32,
                count: (count - mid) as u32,
                right_child: 0,
            };

            let left_index = nodes.len();
            nodes.push(left);
            nodes.push(right);
            nodes[node_index].count = 0;
            nodes[node_index].right_child = (left_index + 1) as u32;
            stack.push(left_index);
            stack.push(left_index + 1);
        }

        Self { nodes, items }
    }

    /// Whether the hierarchy holds no items.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visit every item whose bounds the ray may touch within `[0, t_max]`.
    ///
    /// The callback returns an updated `t_max`, letting closest-hit queries
    /// shrink the search as they go; occlusion queries can return 0.0 to
    /// stop immediately.
    pub fn traverse(&self, ray: &Ray3, mut t_max: f32, mut visit: impl FnMut(u32, f32) -> f32) {
        if self.nodes.is_empty() {
            return;
        }
        let inv_direction = ray.direction.recip();
        let mut stack = [0u32; 64];
        let mut stack_len = 1usize;
        stack[0] = 0;

        while stack_len > 0 {
            stack_len -= 1;
            let node = &self.nodes[stack[stack_len] as usize];
            if !node.bounds.intersects_ray(ray, inv_direction, t_max) {
                continue;
            }
            if node.count > 0 {
                let first = node.first as usize;
                for &item in &self.items[first..first + node.count as usize] {
                    t_max = visit(item, t_max);
                    if t_max <= 0.0 {
                        return;
                    }
                }
            } else {
                let left = node.right_child - 1;
                stack[stack_len] = left;
                stack[stack_len + 1] = node.right_child;
                stack_len += 2;
            }
        }
    }
}
