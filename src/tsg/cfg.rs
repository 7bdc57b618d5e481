use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::TsgNode;
use crate::tree::{SymbolId, TreeNode};

/// A flat context-free production: one grammar node's children grouped by
/// slot, keyed by each child's root symbol. This is the form the CFG prior's
/// maximum-likelihood table accumulates over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Production {
    pub root: SymbolId,
    pub children: Vec<Vec<SymbolId>>,
}

impl Production {
    /// Flatten one node of a fragment into its production.
    pub fn from_node(node: &TreeNode<TsgNode>) -> Self {
        Production {
            root: node.value().symbol,
            children: node
                .slots()
                .map(|slot| slot.iter().map(|child| child.value().symbol).collect())
                .collect(),
        }
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let consequent = self
            .children
            .iter()
            .map(|slot| format!("[{}]", slot.iter().join(" ")))
            .join(" ");
        write!(f, "{} -> {}", self.root, consequent)
    }
}

/// Empirical context-free production probabilities: the nonparametric
/// mixture's base measure.
///
/// Probabilities are maximum-likelihood estimates with pseudocount smoothing,
/// so any derivable fragment (previously observed or novel) gets a finite,
/// non-positive log2 probability.
#[derive(Debug)]
pub struct CfgPrior {
    counts: HashMap<SymbolId, HashMap<Production, usize>>,
    totals: HashMap<SymbolId, usize>,
    pseudocount: f64,
}

impl Default for CfgPrior {
    fn default() -> Self {
        CfgPrior {
            counts: HashMap::new(),
            totals: HashMap::new(),
            pseudocount: 1.0,
        }
    }
}

impl CfgPrior {
    pub fn new() -> Self {
        CfgPrior::default()
    }

    /// Accumulate every production of `tree` into the table.
    pub fn add_tree(&mut self, tree: &TreeNode<TsgNode>) {
        for node in tree.iter() {
            if node.is_leaf() {
                continue;
            }
            let production = Production::from_node(node);
            *self
                .counts
                .entry(production.root)
                .or_default()
                .entry(production)
                .or_insert(0) += 1;
            *self.totals.entry(node.value().symbol).or_insert(0) += 1;
        }
    }

    /// Smoothed maximum-likelihood log2 probability of one production.
    pub fn log2_production_probability(&self, production: &Production) -> f64 {
        let total = self.totals.get(&production.root).copied().unwrap_or(0) as f64;
        let count = self
            .counts
            .get(&production.root)
            .and_then(|productions| productions.get(production))
            .copied()
            .unwrap_or(0) as f64;
        ((count + self.pseudocount) / (total + self.pseudocount)).log2()
    }

    /// Log2 probability of generating the fragment's whole multi-level
    /// production sequence under the empirical CFG.
    pub fn log2_probability(&self, fragment: &TreeNode<TsgNode>) -> f64 {
        fragment
            .iter()
            .filter(|node| !node.is_leaf())
            .map(|node| self.log2_production_probability(&Production::from_node(node)))
            .sum()
    }

    /// Number of distinct productions observed.
    pub fn n_productions(&self) -> usize {
        self.counts.values().map(HashMap::len).sum()
    }
}
