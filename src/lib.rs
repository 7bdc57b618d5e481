//! A library for Bayesian-nonparametric induction of tree substitution
//! grammars.
//!
//! For every candidate fragment rooted at a grammar symbol, the
//! [`PosteriorComputer`] weighs "reuse an existing rule" against "draw a new
//! one from the base measure" under a Dirichlet-Process-style mixture whose
//! base measure is a maximum-likelihood context-free grammar combined with a
//! geometric prior over fragment size. The engine also tunes its own
//! hyperparameters by maximizing the corpus log-posterior with analytic
//! gradients ([`PosteriorComputer::optimize_hyperparameters`]), and
//! canonicalizes trees by rewriting variable references and literals into
//! typed placeholder nodes ([`tree::templatize`] / [`tree::detemplatize`]).
//!
//! Good places to look are [`tsg`] and [`tree`].
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use tsginduction::tree::{Symbol, TreeNode};
//! use tsginduction::tsg::{PosteriorComputer, PosteriorProbability, TsgGrammar, TsgNode};
//!
//! let grammar = Arc::new(TsgGrammar::new());
//! let block = grammar.registry().intern(Symbol::ordinary(["statements"]));
//! let call = grammar.registry().intern(Symbol::ordinary(Vec::<&str>::new()));
//!
//! // a two-node fragment: block -> call
//! let fragment = TreeNode::new(
//!     TsgNode { symbol: block, is_root: true },
//!     vec![vec![TreeNode::leaf(TsgNode { symbol: call, is_root: false }, 0)]],
//! );
//! grammar.add_rule(fragment.clone());
//!
//! let mut computer = PosteriorComputer::new(Arc::clone(&grammar), 5.0, 1.0);
//! computer.observe_tree(&fragment);
//!
//! let log2p = computer.log2_posterior_of_rule(&fragment, false);
//! assert!(log2p.is_finite() && log2p <= 0.0);
//! ```

pub mod opt;
pub mod tree;
pub mod tsg;
mod utils;

pub use crate::tree::{Symbol, SymbolId, SymbolKind, SymbolRegistry, TreeNode};
pub use crate::tsg::{GrammarCounts, PosteriorComputer, PosteriorProbability, TsgGrammar, TsgNode};
