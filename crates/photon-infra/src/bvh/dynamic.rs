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

//! # Dynamic BVH
//!
//! An incrementally balanced binary tree of primitive bounds for structures
//! that are refit every frame. Leaves hold enlarged ("fat") bounds so small
//! motions refit without touching the tree; larger motions reinsert the leaf
//! at its cheapest SAH position.

use super::bvh2::{Bvh2, PackedNode};
use photon_core::math::Aabb;

const NULL_NODE: i32 = -1;

/// Fraction of a primitive's largest extent added on every side of its leaf.
const FAT_MARGIN: f32 = 0.1;

#[derive(Debug, Clone)]
struct Node {
    aabb: Aabb,
    prim: Option<u32>,
    parent: i32,
    children: [i32; 2],
    height: i32,
}

impl Node {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.children[0] == NULL_NODE
    }
}

/// A dynamic tree with one primitive per leaf.
#[derive(Debug, Clone)]
pub struct DynamicBvh {
    root: i32,
    nodes: Vec<Node>,
    free_list: i32,
    // Leaf node of each primitive, NULL_NODE for skipped primitives.
    leaves: Vec<i32>,
}

fn fatten(bounds: &Aabb) -> Aabb {
    bounds.expand(bounds.size().max_element() * FAT_MARGIN)
}

impl DynamicBvh {
    /// Inserts every primitive with valid bounds.
    pub fn build(bounds: &[Aabb]) -> Self {
        let mut tree = Self {
            root: NULL_NODE,
            nodes: Vec::with_capacity(bounds.len() * 2),
            free_list: NULL_NODE,
            leaves: vec![NULL_NODE; bounds.len()],
        };
        for (prim, b) in bounds.iter().enumerate() {
            if b.is_valid() {
                tree.leaves[prim] = tree.insert(fatten(b), prim as u32);
            }
        }
        tree
    }

    /// Number of primitives the tree was built over.
    pub fn prim_count(&self) -> usize {
        self.leaves.len()
    }

    /// Updates leaves whose primitive left its fat bounds.
    ///
    /// Returns the number of leaves that were reinserted.
    pub fn refit(&mut self, bounds: &[Aabb]) -> usize {
        let mut moved = 0;
        for (prim, b) in bounds.iter().enumerate() {
            let Some(&leaf) = self.leaves.get(prim) else {
                break;
            };
            if leaf == NULL_NODE || !b.is_valid() {
                continue;
            }
            if self.nodes[leaf as usize].aabb.contains_aabb(b) {
                continue;
            }
            self.remove_leaf(leaf);
            self.nodes[leaf as usize].aabb = fatten(b);
            self.insert_leaf(leaf);
            moved += 1;
        }
        moved
    }

    /// Bounds of the root, [`Aabb::INVALID`] when empty.
    pub fn root_bounds(&self) -> Aabb {
        if self.root == NULL_NODE {
            Aabb::INVALID
        } else {
            self.nodes[self.root as usize].aabb
        }
    }

    /// Height of the tree, 0 for a single leaf.
    pub fn height(&self) -> i32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.nodes[self.root as usize].height
        }
    }

    /// Flattens the tree into the packed layout with siblings stored together.
    pub fn pack(&self) -> Bvh2 {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut prims = Vec::with_capacity(self.leaves.len());
        if self.root == NULL_NODE {
            return Bvh2::from_parts(nodes, prims, self.leaves.len());
        }
        nodes.push(PackedNode::new(&Aabb::INVALID, 0, 0));
        let mut stack = vec![(self.root, 0usize)];
        while let Some((tree_index, packed_index)) = stack.pop() {
            let node = &self.nodes[tree_index as usize];
            match node.prim {
                Some(prim) if node.is_leaf() => {
                    nodes[packed_index] = PackedNode::new(&node.aabb, prims.len() as u32, 1);
                    prims.push(prim);
                }
                _ => {
                    let left = nodes.len();
                    nodes.push(PackedNode::new(&Aabb::INVALID, 0, 0));
                    nodes.push(PackedNode::new(&Aabb::INVALID, 0, 0));
                    nodes[packed_index] = PackedNode::new(&node.aabb, left as u32, 0);
                    stack.push((node.children[1], left + 1));
                    stack.push((node.children[0], left));
                }
            }
        }
        Bvh2::from_parts(nodes, prims, self.leaves.len())
    }

    fn insert(&mut self, aabb: Aabb, prim: u32) -> i32 {
        let leaf = self.allocate_node();
        self.nodes[leaf as usize].aabb = aabb;
        self.nodes[leaf as usize].prim = Some(prim);
        self.nodes[leaf as usize].height = 0;
        self.insert_leaf(leaf);
        leaf
    }

    fn descend_cost(&self, child: i32, leaf_aabb: &Aabb, inheritance_cost: f32) -> f32 {
        let node = &self.nodes[child as usize];
        let new_area = node.aabb.merge(leaf_aabb).surface_area();
        if node.is_leaf() {
            new_area + inheritance_cost
        } else {
            (new_area - node.aabb.surface_area()) + inheritance_cost
        }
    }

    fn insert_leaf(&mut self, leaf: i32) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        // Find the cheapest sibling.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let [child1, child2] = node.children;
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.merge(&leaf_aabb).surface_area();

            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);
            let cost1 = self.descend_cost(child1, &leaf_aabb, inheritance_cost);
            let cost2 = self.descend_cost(child2, &leaf_aabb, inheritance_cost);

            if cost < cost1 && cost < cost2 {
                break;
            }
            index = if cost1 < cost2 { child1 } else { child2 };
        }
        let sibling = index;

        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate_node();
        {
            let sibling_node = &self.nodes[sibling as usize];
            let merged = leaf_aabb.merge(&sibling_node.aabb);
            let height = sibling_node.height + 1;
            let parent = &mut self.nodes[new_parent as usize];
            parent.parent = old_parent;
            parent.prim = None;
            parent.aabb = merged;
            parent.height = height;
            parent.children = [sibling, leaf];
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else {
            self.replace_child(old_parent, sibling, new_parent);
        }

        self.refit_ancestors(new_parent);
    }

    fn remove_leaf(&mut self, leaf: i32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grand_parent = self.nodes[parent as usize].parent;
        let [c0, c1] = self.nodes[parent as usize].children;
        let sibling = if c0 == leaf { c1 } else { c0 };

        if grand_parent == NULL_NODE {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL_NODE;
            self.deallocate_node(parent);
        } else {
            self.replace_child(grand_parent, parent, sibling);
            self.nodes[sibling as usize].parent = grand_parent;
            self.deallocate_node(parent);
            self.refit_ancestors(grand_parent);
        }
    }

    fn replace_child(&mut self, parent: i32, old: i32, new: i32) {
        let children = &mut self.nodes[parent as usize].children;
        if children[0] == old {
            children[0] = new;
        } else {
            children[1] = new;
        }
    }

    fn refit_ancestors(&mut self, mut index: i32) {
        while index != NULL_NODE {
            index = self.balance(index);
            self.update_node_meta(index);
            index = self.nodes[index as usize].parent;
        }
    }

    fn allocate_node(&mut self) -> i32 {
        let fresh = Node {
            aabb: Aabb::INVALID,
            prim: None,
            parent: NULL_NODE,
            children: [NULL_NODE, NULL_NODE],
            height: 0,
        };
        if self.free_list != NULL_NODE {
            let index = self.free_list;
            self.free_list = self.nodes[index as usize].parent;
            self.nodes[index as usize] = fresh;
            index
        } else {
            self.nodes.push(fresh);
            self.nodes.len() as i32 - 1
        }
    }

    fn deallocate_node(&mut self, index: i32) {
        let node = &mut self.nodes[index as usize];
        node.parent = self.free_list;
        node.prim = None;
        node.children = [NULL_NODE, NULL_NODE];
        self.free_list = index;
    }

    /// Rotates the taller grandchild up when the subtree at `a` is unbalanced.
    /// Returns the new root of the subtree.
    fn balance(&mut self, a: i32) -> i32 {
        let node_a = &self.nodes[a as usize];
        if node_a.is_leaf() || node_a.height < 2 {
            return a;
        }
        let [b, c] = node_a.children;
        let balance = self.nodes[c as usize].height - self.nodes[b as usize].height;
        if balance > 1 {
            self.rotate_up(a, c, 1)
        } else if balance < -1 {
            self.rotate_up(a, b, 0)
        } else {
            a
        }
    }

    // Moves `child` (slot `side` of `a`) into the place of `a`. The taller of
    // `child`'s children stays with it, the other is handed to `a`.
    fn rotate_up(&mut self, a: i32, child: i32, side: usize) -> i32 {
        let [f, g] = self.nodes[child as usize].children;

        self.nodes[child as usize].children[0] = a;
        self.nodes[child as usize].parent = self.nodes[a as usize].parent;
        self.nodes[a as usize].parent = child;

        let grand = self.nodes[child as usize].parent;
        if grand == NULL_NODE {
            self.root = child;
        } else {
            self.replace_child(grand, a, child);
        }

        let (keep, give) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };
        self.nodes[child as usize].children[1] = keep;
        self.nodes[a as usize].children[side] = give;
        self.nodes[give as usize].parent = a;

        self.update_node_meta(a);
        self.update_node_meta(child);
        child
    }

    fn update_node_meta(&mut self, index: i32) {
        let [c0, c1] = self.nodes[index as usize].children;
        let aabb = self.nodes[c0 as usize].aabb.merge(&self.nodes[c1 as usize].aabb);
        let height = 1 + self.nodes[c0 as usize].height.max(self.nodes[c1 as usize].height);
        let node = &mut self.nodes[index as usize];
        node.aabb = aabb;
        node.height = height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon_core::math::Vec3;

    fn line(n: usize, offset: f32) -> Vec<Aabb> {
        (0..n)
            .map(|i| Aabb::from_sphere(Vec3::new(i as f32 * 2.0 + offset, 0.0, 0.0), 0.5))
            .collect()
    }

    #[test]
    fn small_motion_stays_in_fat_leaves() {
        let mut tree = DynamicBvh::build(&line(16, 0.0));
        assert_eq!(tree.refit(&line(16, 0.01)), 0);
        assert_eq!(tree.refit(&line(16, 3.0)), 16);
    }

    #[test]
    fn tree_stays_balanced() {
        let tree = DynamicBvh::build(&line(128, 0.0));
        assert!(tree.height() <= 24, "height {}", tree.height());
    }

    #[test]
    fn packed_tree_covers_every_primitive() {
        let mut bounds = line(33, 0.0);
        bounds[5] = Aabb::INVALID;
        let mut tree = DynamicBvh::build(&bounds);
        tree.refit(&line(33, 5.0));
        let packed = tree.pack();
        let mut prims = packed.prim_indices().to_vec();
        prims.sort_unstable();
        let expected: Vec<u32> = (0..33).filter(|&i| i != 5).collect();
        assert_eq!(prims, expected);
        assert_eq!(packed.prim_count(), 33);
        for node in packed.nodes().iter().filter(|n| !n.is_leaf()) {
            let left = packed.nodes()[node.left_or_first as usize].bounds();
            let right = packed.nodes()[node.left_or_first as usize + 1].bounds();
            assert!(node.bounds().contains_aabb(&left));
            assert!(node.bounds().contains_aabb(&right));
        }
        assert!(packed.root_bounds().contains_aabb(&line(33, 5.0)[32]));
    }

    #[test]
    fn empty_tree_packs_to_nothing() {
        let tree = DynamicBvh::build(&[]);
        assert!(tree.pack().nodes().is_empty());
        assert!(!tree.root_bounds().is_valid());
    }
}
