//! (representation) Ordered syntax trees with named child slots.
//!
//! A [`TreeNode`] owns its children exclusively and is never mutated after
//! construction; every rewrite builds a fresh tree bottom-up. Equality and
//! hashing are structural, so two trees extracted from different parses
//! compare equal whenever their shapes and payloads match.

mod symbol;
mod template;
pub use self::symbol::{Symbol, SymbolId, SymbolKind, SymbolRegistry};
pub use self::template::{
    detemplatize, templatize, ScopeMap, Variable, CHAR_LITERAL, CHAR_LITERAL_KIND, NODE_KIND,
    NUM_LITERAL, NUM_LITERAL_KIND, STRING_LITERAL, STRING_LITERAL_KIND, TOKEN, VARIABLE_KIND,
};

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// An ordered, immutable-once-built syntax tree node.
///
/// Children are partitioned into slots; each slot holds an ordered sequence
/// of subtrees and slot cardinality is not fixed. The node's size (inclusive
/// count of nodes in its subtree) and a structural fingerprint are computed
/// once at construction, so hashing a fragment is O(1) and equality checks
/// almost always short-circuit on the fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode<V> {
    value: V,
    children: Vec<Vec<TreeNode<V>>>,
    #[serde(skip)]
    size: usize,
    #[serde(skip)]
    fingerprint: u64,
}

impl<V: Hash> TreeNode<V> {
    /// Build a node from its payload and children grouped by slot.
    pub fn new(value: V, children: Vec<Vec<TreeNode<V>>>) -> Self {
        let size = 1 + children
            .iter()
            .flatten()
            .map(|child| child.size)
            .sum::<usize>();
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        children.len().hash(&mut hasher);
        for slot in &children {
            slot.len().hash(&mut hasher);
            for child in slot {
                child.fingerprint.hash(&mut hasher);
            }
        }
        TreeNode {
            value,
            children,
            size,
            fingerprint: hasher.finish(),
        }
    }

    /// A node with `n_slots` empty slots.
    pub fn leaf(value: V, n_slots: usize) -> Self {
        TreeNode::new(value, (0..n_slots).map(|_| Vec::new()).collect())
    }

    /// Rebuild the whole tree with a new payload for every node. The mapping
    /// function is called in pre-order.
    pub fn map<U, F>(&self, f: &mut F) -> TreeNode<U>
    where
        U: Hash,
        F: FnMut(&TreeNode<V>) -> U,
    {
        let value = f(self);
        let mut children = Vec::with_capacity(self.children.len());
        for slot in &self.children {
            let mut mapped = Vec::with_capacity(slot.len());
            for child in slot {
                mapped.push(child.map(f));
            }
            children.push(mapped);
        }
        TreeNode::new(value, children)
    }
}

impl<V> TreeNode<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Number of nodes in this subtree, this node included.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_slots(&self) -> usize {
        self.children.len()
    }

    /// Children held in one slot.
    pub fn children(&self, slot: usize) -> &[TreeNode<V>] {
        &self.children[slot]
    }

    /// Iterate over slots, each yielded as its ordered child sequence.
    pub fn slots(&self) -> impl Iterator<Item = &[TreeNode<V>]> {
        self.children.iter().map(Vec::as_slice)
    }

    pub fn child(&self, slot: usize, index: usize) -> Option<&TreeNode<V>> {
        self.children.get(slot).and_then(|slot| slot.get(index))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Vec::is_empty)
    }

    /// Pre-order traversal of the subtree.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter { stack: vec![self] }
    }
}

impl<V: PartialEq> PartialEq for TreeNode<V> {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
            && self.size == other.size
            && self.value == other.value
            && self.children == other.children
    }
}
impl<V: Eq> Eq for TreeNode<V> {}

impl<V> Hash for TreeNode<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint);
    }
}

/// Pre-order tree iterator.
pub struct Iter<'a, V> {
    stack: Vec<&'a TreeNode<V>>,
}
impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a TreeNode<V>;
    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for slot in node.children.iter().rev() {
            for child in slot.iter().rev() {
                self.stack.push(child);
            }
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::TreeNode;

    fn sample() -> TreeNode<u32> {
        TreeNode::new(
            0,
            vec![
                vec![TreeNode::leaf(1, 0), TreeNode::leaf(2, 1)],
                vec![TreeNode::new(3, vec![vec![TreeNode::leaf(4, 0)]])],
            ],
        )
    }

    #[test]
    fn size_counts_every_node() {
        assert_eq!(sample().size(), 5);
        assert_eq!(TreeNode::leaf(7u32, 3).size(), 1);
    }

    #[test]
    fn structural_equality_ignores_provenance() {
        assert_eq!(sample(), sample());
        let other = TreeNode::new(0u32, vec![vec![TreeNode::leaf(1, 0)]]);
        assert_ne!(sample(), other);
    }

    #[test]
    fn preorder_iteration() {
        let values: Vec<u32> = sample().iter().map(|n| *n.value()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }
}
