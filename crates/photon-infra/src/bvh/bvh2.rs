// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Binary BVH
//!
//! Binned SAH builder producing the packed node layout the software traversal
//! kernels read. Children of an internal node are stored next to each other, so
//! a node only records the index of its left child.

use bytemuck::{Pod, Zeroable};
use photon_core::math::{Aabb, Vec3};

/// One node as uploaded to the device. 32 bytes.
///
/// `count == 0` marks an internal node whose children sit at
/// `left_or_first` and `left_or_first + 1`. Leaves reference `count`
/// entries of the primitive index array starting at `left_or_first`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PackedNode {
    /// Lower corner.
    pub bounds_min: [f32; 3],
    /// Left child, or first primitive for leaves.
    pub left_or_first: u32,
    /// Upper corner.
    pub bounds_max: [f32; 3],
    /// Primitive count, 0 for internal nodes.
    pub count: u32,
}

impl PackedNode {
    pub(crate) fn new(bounds: &Aabb, left_or_first: u32, count: u32) -> Self {
        Self {
            bounds_min: bounds.min.to_array(),
            left_or_first,
            bounds_max: bounds.max.to_array(),
            count,
        }
    }

    /// `true` for leaves.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    /// Bounds of the node.
    pub fn bounds(&self) -> Aabb {
        Aabb {
            min: Vec3::from(self.bounds_min),
            max: Vec3::from(self.bounds_max),
        }
    }

    fn set_bounds(&mut self, bounds: &Aabb) {
        self.bounds_min = bounds.min.to_array();
        self.bounds_max = bounds.max.to_array();
    }
}

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Self {
            bounds: Aabb::INVALID,
            count: 0,
        }
    }
}

/// A static binary BVH over primitive bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh2 {
    nodes: Vec<PackedNode>,
    prim_indices: Vec<u32>,
    prim_count: usize,
}

impl Bvh2 {
    pub(crate) fn from_parts(nodes: Vec<PackedNode>, prim_indices: Vec<u32>, prim_count: usize) -> Self {
        Self {
            nodes,
            prim_indices,
            prim_count,
        }
    }

    /// Builds over `bounds`, skipping primitives whose bounds are invalid.
    ///
    /// ## Arguments
    /// * `max_leaf_size` - Ranges of at most this many primitives become leaves.
    /// * `num_bins` - SAH bins along the split axis.
    pub fn build(bounds: &[Aabb], max_leaf_size: usize, num_bins: usize) -> Self {
        let max_leaf_size = max_leaf_size.max(1);
        let num_bins = num_bins.clamp(2, 64);
        let mut indices: Vec<u32> = (0..bounds.len() as u32)
            .filter(|&i| bounds[i as usize].is_valid())
            .collect();
        let centroids: Vec<Vec3> = bounds.iter().map(|b| b.center()).collect();

        let mut nodes = Vec::with_capacity(indices.len().max(1) * 2);
        if indices.is_empty() {
            return Self::from_parts(nodes, indices, bounds.len());
        }
        nodes.push(PackedNode::zeroed());

        let mut stack = vec![(0usize, 0usize, indices.len())];
        while let Some((node, start, end)) = stack.pop() {
            let range = &indices[start..end];
            let node_bounds = range
                .iter()
                .fold(Aabb::INVALID, |acc, &i| acc.merge(&bounds[i as usize]));
            let count = end - start;

            let split = if count <= max_leaf_size {
                None
            } else {
                let centroid_bounds = Aabb::from_points(range.iter().map(|&i| centroids[i as usize]));
                Some(
                    sah_split(&mut indices[start..end], bounds, &centroids, &centroid_bounds, num_bins)
                        .unwrap_or(count / 2),
                )
            };

            match split {
                Some(mid) => {
                    let left = nodes.len();
                    nodes.push(PackedNode::zeroed());
                    nodes.push(PackedNode::zeroed());
                    nodes[node] = PackedNode::new(&node_bounds, left as u32, 0);
                    stack.push((left + 1, start + mid, end));
                    stack.push((left, start, start + mid));
                }
                None => nodes[node] = PackedNode::new(&node_bounds, start as u32, count as u32),
            }
        }

        Self::from_parts(nodes, indices, bounds.len())
    }

    /// Recomputes every node's bounds from new primitive bounds, keeping the
    /// topology. Returns the new root bounds.
    pub fn refit(&mut self, bounds: &[Aabb]) -> Aabb {
        // Children always follow their parent, so a reverse sweep sees them first.
        for index in (0..self.nodes.len()).rev() {
            let node = self.nodes[index];
            let first = node.left_or_first as usize;
            let fitted = if node.is_leaf() {
                self.prim_indices[first..first + node.count as usize]
                    .iter()
                    .fold(Aabb::INVALID, |acc, &i| {
                        acc.merge(bounds.get(i as usize).unwrap_or(&Aabb::INVALID))
                    })
            } else {
                self.nodes[first].bounds().merge(&self.nodes[first + 1].bounds())
            };
            self.nodes[index].set_bounds(&fitted);
        }
        self.root_bounds()
    }

    /// Packed nodes, root first.
    pub fn nodes(&self) -> &[PackedNode] {
        &self.nodes
    }

    /// Primitive indices referenced by leaves.
    pub fn prim_indices(&self) -> &[u32] {
        &self.prim_indices
    }

    /// Number of primitives the structure was built over, including skipped ones.
    pub fn prim_count(&self) -> usize {
        self.prim_count
    }

    /// Bounds of the root, [`Aabb::INVALID`] when empty.
    pub fn root_bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::INVALID, PackedNode::bounds)
    }

    /// Depth of the deepest leaf, 0 when empty.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push((0usize, 1usize));
        }
        while let Some((index, depth)) = stack.pop() {
            let node = &self.nodes[index];
            deepest = deepest.max(depth);
            if !node.is_leaf() {
                let left = node.left_or_first as usize;
                stack.push((left, depth + 1));
                stack.push((left + 1, depth + 1));
            }
        }
        deepest
    }

    /// Calls `visit` with every primitive whose leaf overlaps `query`.
    pub fn for_each_overlapping(&self, query: &Aabb, mut visit: impl FnMut(u32)) {
        let mut stack = Vec::with_capacity(64);
        if !self.nodes.is_empty() {
            stack.push(0usize);
        }
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bounds().intersects_aabb(query) {
                continue;
            }
            let first = node.left_or_first as usize;
            if node.is_leaf() {
                for &prim in &self.prim_indices[first..first + node.count as usize] {
                    visit(prim);
                }
            } else {
                stack.push(first);
                stack.push(first + 1);
            }
        }
    }

    /// Nodes followed by primitive indices, as uploaded to device memory.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.nodes.len() * 32 + self.prim_indices.len() * 4);
        bytes.extend_from_slice(bytemuck::cast_slice(&self.nodes));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.prim_indices));
        bytes
    }
}

/// Partitions `indices` at the cheapest binned split and returns the size of
/// the left half, or `None` when the centroids cannot be separated.
fn sah_split(
    indices: &mut [u32],
    bounds: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
    num_bins: usize,
) -> Option<usize> {
    let axis = centroid_bounds.largest_axis();
    let lo = centroid_bounds.min[axis];
    let extent = centroid_bounds.max[axis] - lo;
    if !(extent > 0.0) {
        return None;
    }
    let scale = num_bins as f32 / extent;
    let bin_of = |i: u32| (((centroids[i as usize][axis] - lo) * scale) as usize).min(num_bins - 1);

    let mut bins = vec![Bin::default(); num_bins];
    for &i in indices.iter() {
        let bin = &mut bins[bin_of(i)];
        bin.bounds = bin.bounds.merge(&bounds[i as usize]);
        bin.count += 1;
    }

    // Sweep from the right to get the cost of every right half.
    let mut right_area = vec![0.0f32; num_bins];
    let mut right_count = vec![0usize; num_bins];
    let mut acc = Bin::default();
    for b in (1..num_bins).rev() {
        acc.bounds = acc.bounds.merge(&bins[b].bounds);
        acc.count += bins[b].count;
        right_area[b] = acc.bounds.surface_area();
        right_count[b] = acc.count;
    }

    let mut best: Option<(usize, f32)> = None;
    let mut left = Bin::default();
    for split in 1..num_bins {
        left.bounds = left.bounds.merge(&bins[split - 1].bounds);
        left.count += bins[split - 1].count;
        if left.count == 0 || right_count[split] == 0 {
            continue;
        }
        let cost = left.bounds.surface_area() * left.count as f32
            + right_area[split] * right_count[split] as f32;
        if best.map_or(true, |(_, c)| cost < c) {
            best = Some((split, cost));
        }
    }
    let (split, _) = best?;

    let mut mid = 0;
    for i in 0..indices.len() {
        if bin_of(indices[i]) < split {
            indices.swap(i, mid);
            mid += 1;
        }
    }
    (mid > 0 && mid < indices.len()).then_some(mid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> Vec<Aabb> {
        (0..n)
            .map(|i| {
                let p = Vec3::new((i % 10) as f32, (i / 10) as f32, (i % 3) as f32);
                Aabb::from_sphere(p, 0.25)
            })
            .collect()
    }

    fn leaf_prims(bvh: &Bvh2) -> Vec<u32> {
        let mut prims: Vec<u32> = bvh
            .nodes()
            .iter()
            .filter(|n| n.is_leaf())
            .flat_map(|n| {
                let first = n.left_or_first as usize;
                bvh.prim_indices()[first..first + n.count as usize].to_vec()
            })
            .collect();
        prims.sort_unstable();
        prims
    }

    #[test]
    fn every_primitive_lands_in_exactly_one_leaf() {
        let bounds = grid(100);
        let bvh = Bvh2::build(&bounds, 4, 16);
        assert_eq!(leaf_prims(&bvh), (0..100).collect::<Vec<_>>());
        for node in bvh.nodes().iter().filter(|n| n.is_leaf()) {
            assert!(node.count <= 4);
        }
    }

    #[test]
    fn parents_contain_children() {
        let bounds = grid(64);
        let bvh = Bvh2::build(&bounds, 2, 8);
        for node in bvh.nodes().iter().filter(|n| !n.is_leaf()) {
            let left = &bvh.nodes()[node.left_or_first as usize];
            let right = &bvh.nodes()[node.left_or_first as usize + 1];
            assert!(node.bounds().contains_aabb(&left.bounds()));
            assert!(node.bounds().contains_aabb(&right.bounds()));
        }
        assert!(bvh.depth() < 20);
    }

    #[test]
    fn identical_centroids_fall_back_to_median() {
        let bounds = vec![Aabb::from_sphere(Vec3::ONE, 1.0); 9];
        let bvh = Bvh2::build(&bounds, 2, 16);
        assert_eq!(leaf_prims(&bvh).len(), 9);
    }

    #[test]
    fn invalid_primitives_are_skipped() {
        let mut bounds = grid(10);
        bounds[3] = Aabb::INVALID;
        let bvh = Bvh2::build(&bounds, 1, 4);
        assert!(!leaf_prims(&bvh).contains(&3));
        assert_eq!(bvh.prim_count(), 10);
    }

    #[test]
    fn refit_tracks_moved_primitives() {
        let mut bounds = grid(32);
        let mut bvh = Bvh2::build(&bounds, 4, 16);
        let topology: Vec<u32> = bvh.nodes().iter().map(|n| n.left_or_first).collect();
        for b in &mut bounds {
            *b = Aabb::from_min_max(b.min + Vec3::X * 10.0, b.max + Vec3::X * 10.0);
        }
        let root = bvh.refit(&bounds);
        assert_eq!(root, Bvh2::build(&bounds, 4, 16).root_bounds());
        let after: Vec<u32> = bvh.nodes().iter().map(|n| n.left_or_first).collect();
        assert_eq!(topology, after);
    }

    #[test]
    fn overlap_query_finds_neighbours() {
        let bounds = grid(100);
        let bvh = Bvh2::build(&bounds, 4, 16);
        let mut found = Vec::new();
        bvh.for_each_overlapping(&Aabb::from_sphere(Vec3::new(0.0, 0.0, 0.0), 0.1), |p| found.push(p));
        assert!(found.contains(&0));
        assert!(found.len() < 100);
    }

    #[test]
    fn serialized_size_matches_layout() {
        let bvh = Bvh2::build(&grid(10), 4, 16);
        assert_eq!(bvh.to_bytes().len(), bvh.nodes().len() * 32 + 40);
        assert!(Bvh2::build(&[], 4, 16).nodes().is_empty());
    }
}
