//! (representation) Tree substitution grammars over templatized syntax trees.
//!
//! A corpus tree becomes grammar-addressable once each node carries a
//! [`TsgNode`] payload marking fragment boundaries. Every boundary node roots
//! one maximal fragment; the grammar stores fragments structurally and keeps
//! the Dirichlet-Process sufficient statistics (per-fragment occurrence
//! counts and per-root-symbol totals) that the posterior computer consumes.

mod cfg;
mod posterior;
pub use self::cfg::{CfgPrior, Production};
pub use self::posterior::{PosteriorComputer, PosteriorProbability};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::tree::{SymbolId, SymbolRegistry, TreeNode};

/// Payload of a grammar-addressable tree node: the node's symbol and whether
/// a fragment boundary sits at this node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TsgNode {
    pub symbol: SymbolId,
    pub is_root: bool,
}

impl TsgNode {
    /// Convert a plain tree into grammar-addressable form. The tree root is
    /// always a boundary; every other node is independently marked a boundary
    /// with probability `root_probability` (the sampling sweep's usual
    /// initializer; pass `0.0` for a single whole-tree fragment).
    pub fn convert_tree<R: Rng>(
        tree: &TreeNode<SymbolId>,
        root_probability: f64,
        rng: &mut R,
    ) -> TreeNode<TsgNode> {
        let mut at_root = true;
        tree.map(&mut |node: &TreeNode<SymbolId>| {
            let is_root = std::mem::take(&mut at_root)
                || (root_probability > 0.0 && rng.gen_bool(root_probability));
            TsgNode {
                symbol: *node.value(),
                is_root,
            }
        })
    }
}

/// All maximal fragments of a marked tree, one per boundary node (the tree
/// root included). Each fragment is copied from its boundary node down to,
/// and including as leaves, the next boundary nodes.
pub fn all_fragments_of(tree: &TreeNode<TsgNode>) -> Vec<TreeNode<TsgNode>> {
    let mut fragments = vec![fragment_at(tree)];
    for node in tree.iter().skip(1) {
        if node.value().is_root {
            fragments.push(fragment_at(node));
        }
    }
    fragments
}

/// Copy the fragment rooted at `node`, cutting at boundary descendants.
/// The copy is canonical: its root is flagged as a boundary regardless of
/// how the original was marked, so structural lookup is stable.
pub fn fragment_at(node: &TreeNode<TsgNode>) -> TreeNode<TsgNode> {
    fn copy(node: &TreeNode<TsgNode>, at_root: bool) -> TreeNode<TsgNode> {
        if !at_root && node.value().is_root {
            return TreeNode::leaf(*node.value(), node.n_slots());
        }
        let value = TsgNode {
            symbol: node.value().symbol,
            is_root: at_root || node.value().is_root,
        };
        let mut children = Vec::with_capacity(node.n_slots());
        for slot in node.slots() {
            let mut copied = Vec::with_capacity(slot.len());
            for child in slot {
                copied.push(copy(child, false));
            }
            children.push(copied);
        }
        TreeNode::new(value, children)
    }
    copy(node, true)
}

/// Sufficient statistics of the Dirichlet Process, as exposed by a grammar:
/// how often a fragment is currently stored, and how much total rule mass
/// shares its root symbol.
pub trait GrammarCounts: Send + Sync {
    /// Total count of stored rules rooted at `root`.
    fn count_trees_with_root(&self, root: SymbolId) -> usize;
    /// Occurrence count of `fragment` specifically.
    fn count_tree_occurrences(&self, fragment: &TreeNode<TsgNode>) -> usize;
}

/// A tree substitution grammar's rule store.
///
/// Fragments are identified structurally, never by reference. Counters are
/// atomics so the external sampling sweep may add and remove rules while
/// posterior computations read; the write lock is taken only to insert a new
/// key. Readers tolerate the transient window where an occurrence count
/// exceeds its root total by clamping at the point of use, trading exactness
/// for throughput; the sampler's convergence is statistical, not exact.
#[derive(Debug, Default)]
pub struct TsgGrammar {
    registry: SymbolRegistry,
    rules: RwLock<HashMap<TreeNode<TsgNode>, AtomicUsize>>,
    root_totals: RwLock<HashMap<SymbolId, AtomicUsize>>,
}

impl TsgGrammar {
    pub fn new() -> Self {
        TsgGrammar::default()
    }

    /// The symbol registry this grammar's trees are expressed in.
    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    /// Record one occurrence of `fragment` as a stored rule.
    pub fn add_rule(&self, fragment: TreeNode<TsgNode>) {
        let root = fragment.value().symbol;
        let bumped = {
            let rules = self.rules.read().unwrap();
            match rules.get(&fragment) {
                Some(count) => {
                    count.fetch_add(1, Ordering::Relaxed);
                    true
                }
                None => false,
            }
        };
        if !bumped {
            self.rules
                .write()
                .unwrap()
                .entry(fragment)
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        let bumped = {
            let totals = self.root_totals.read().unwrap();
            match totals.get(&root) {
                Some(total) => {
                    total.fetch_add(1, Ordering::Relaxed);
                    true
                }
                None => false,
            }
        };
        if !bumped {
            self.root_totals
                .write()
                .unwrap()
                .entry(root)
                .or_insert_with(|| AtomicUsize::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove one occurrence of `fragment`; counts saturate at zero and the
    /// root total only drops when an occurrence was actually removed.
    pub fn remove_rule(&self, fragment: &TreeNode<TsgNode>) {
        let removed = {
            let rules = self.rules.read().unwrap();
            rules
                .get(fragment)
                .map_or(false, |count| saturating_decrement(count))
        };
        if removed {
            let totals = self.root_totals.read().unwrap();
            if let Some(total) = totals.get(&fragment.value().symbol) {
                saturating_decrement(total);
            }
        }
    }

    /// Number of distinct fragments currently stored.
    pub fn n_rules(&self) -> usize {
        self.rules
            .read()
            .unwrap()
            .values()
            .filter(|count| count.load(Ordering::Relaxed) > 0)
            .count()
    }

    /// Re-express a marked tree in this grammar's own symbol registry by
    /// re-interning every node's descriptor from `source`. Idempotent and
    /// node-count preserving; symbols unknown to `source` pass through.
    pub fn reparametrize_tree(
        &self,
        tree: &TreeNode<TsgNode>,
        source: &SymbolRegistry,
    ) -> TreeNode<TsgNode> {
        tree.map(&mut |node: &TreeNode<TsgNode>| {
            let payload = *node.value();
            match source.get(payload.symbol) {
                Some(symbol) => TsgNode {
                    symbol: self.registry.intern((*symbol).clone()),
                    is_root: payload.is_root,
                },
                None => payload,
            }
        })
    }
}

impl GrammarCounts for TsgGrammar {
    fn count_trees_with_root(&self, root: SymbolId) -> usize {
        self.root_totals
            .read()
            .unwrap()
            .get(&root)
            .map_or(0, |total| total.load(Ordering::Relaxed))
    }

    fn count_tree_occurrences(&self, fragment: &TreeNode<TsgNode>) -> usize {
        self.rules
            .read()
            .unwrap()
            .get(fragment)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }
}

/// Returns whether the counter was above zero and got decremented.
fn saturating_decrement(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
            count.checked_sub(1)
        })
        .is_ok()
}
