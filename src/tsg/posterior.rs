use log::{error, info};
use rayon::prelude::*;
use std::f64::consts::LN_2;
use std::sync::Arc;

use super::{all_fragments_of, CfgPrior, GrammarCounts, Production, TsgNode};
use crate::opt::{ConjugateGradient, Objective};
use crate::tree::TreeNode;
use crate::utils::{geometric_log2_prob, log2_sum_exp};

const MIN_PARAM: f64 = 1e-6;
const GRADIENT_CHECK_DX: f64 = 1e-8;

/// Posterior scoring seam consumed by the sampling sweep.
pub trait PosteriorProbability {
    /// Log2 posterior probability that `fragment` exists as a grammar rule.
    /// With `remove`, the fragment's own occurrence is first subtracted from
    /// the evidence (leave-one-out, required during resampling).
    fn log2_posterior_of_rule(&self, fragment: &TreeNode<TsgNode>, remove: bool) -> f64;
}

/// Computes fragment posteriors under a Dirichlet-Process mixture whose base
/// measure is the empirical CFG combined with a geometric prior over
/// fragment size, and re-estimates its own hyperparameters from the corpus.
///
/// The grammar's counters may be mutated concurrently by the sampling sweep;
/// reads here clamp rather than lock (see [`TsgGrammar`]). The two
/// hyperparameters are written only by the optimizer between parallel
/// batches, so plain fields suffice.
///
/// [`TsgGrammar`]: super::TsgGrammar
#[derive(Debug)]
pub struct PosteriorComputer<G> {
    grammar: Arc<G>,
    prior: CfgPrior,
    concentration: f64,
    geometric_probability: f64,
}

impl<G: GrammarCounts> PosteriorComputer<G> {
    /// `avg_fragment_size` seeds the geometric rate at `1 / avg_fragment_size`.
    pub fn new(grammar: Arc<G>, avg_fragment_size: f64, concentration: f64) -> Self {
        let mut computer = PosteriorComputer {
            grammar,
            prior: CfgPrior::new(),
            concentration,
            geometric_probability: 1.0 / avg_fragment_size,
        };
        computer.limit_params();
        computer
    }

    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    pub fn geometric_probability(&self) -> f64 {
        self.geometric_probability
    }

    pub fn prior(&self) -> &CfgPrior {
        &self.prior
    }

    /// External calibration of the hyperparameters; values are clamped into
    /// their valid region.
    pub fn set_hyperparameters(&mut self, concentration: f64, geometric_probability: f64) {
        self.concentration = concentration;
        self.geometric_probability = geometric_probability;
        self.limit_params();
    }

    /// Feed the CFG prior's maximum-likelihood table with every production
    /// of `tree`.
    pub fn observe_tree(&mut self, tree: &TreeNode<TsgNode>) {
        self.prior.add_tree(tree);
    }

    /// Adapt one grammar node into the flat production the CFG prior
    /// accumulates over.
    pub fn production_for_node(&self, node: &TreeNode<TsgNode>) -> Production {
        Production::from_node(node)
    }

    /// The fragment's prior: geometric size prior plus CFG base measure, in
    /// log2.
    pub fn log2_prior_for_tree(&self, fragment: &TreeNode<TsgNode>) -> f64 {
        geometric_log2_prob(fragment.size(), self.geometric_probability)
            + self.prior.log2_probability(fragment)
    }

    fn limit_params(&mut self) {
        if self.concentration < MIN_PARAM {
            self.concentration = MIN_PARAM;
        }
        if self.geometric_probability >= 1.0 {
            self.geometric_probability = 1.0 - MIN_PARAM;
        } else if self.geometric_probability <= 0.0 {
            self.geometric_probability = MIN_PARAM;
        }
    }

    /// Re-estimate concentration and geometric rate by maximizing the total
    /// leave-one-out log2 posterior over every maximal fragment root in the
    /// corpus. A solver step-direction failure is logged and the best
    /// parameters found so far are kept. With `check_gradient`, the analytic
    /// gradient is first compared against finite differences (diagnostic
    /// only; results go to the log).
    pub fn optimize_hyperparameters(
        &mut self,
        corpus: &[TreeNode<TsgNode>],
        check_gradient: bool,
    ) {
        let fragments: Vec<TreeNode<TsgNode>> =
            corpus.iter().flat_map(all_fragments_of).collect();
        let mut objective = HyperparameterObjective {
            computer: self,
            fragments,
        };

        if check_gradient {
            objective.check_gradient();
        }

        match ConjugateGradient::new(1e-6).optimize(&mut objective) {
            Ok(value) => info!("hyperparameter optimization converged at value {value}"),
            Err(err) => error!("failed to optimize hyperparameters: {err}"),
        }
        info!(
            "converged at: {}, {}",
            self.concentration, self.geometric_probability
        );
    }
}

impl<G: GrammarCounts> PosteriorProbability for PosteriorComputer<G> {
    fn log2_posterior_of_rule(&self, fragment: &TreeNode<TsgNode>, remove: bool) -> f64 {
        let mut n_root = self.grammar.count_trees_with_root(fragment.value().symbol) as f64;
        let mut n_rule = self.grammar.count_tree_occurrences(fragment) as f64;
        if n_rule > n_root {
            // racing with the sampler; most likely the rule was just removed
            n_rule = n_root;
        }

        let log2_prior = self.log2_prior_for_tree(fragment);
        assert!(
            log2_prior.is_finite(),
            "prior is {log2_prior}: corrupted CFG table or invalid fragment"
        );

        if remove && n_rule > 0.0 {
            n_rule -= 1.0;
            n_root -= 1.0;
        }

        let log2_probability = log2_sum_exp(
            n_rule.log2(),
            self.concentration.log2() + log2_prior,
        ) - (n_root + self.concentration).log2();

        assert!(
            log2_probability.is_finite() && log2_probability <= 0.0,
            "posterior probability is {log2_probability}"
        );
        log2_probability
    }
}

/// The corpus-wide log2 posterior and its analytic gradient with respect to
/// the concentration parameter and the geometric rate, as a solver objective.
/// Value and gradient are each one parallel batch; cross-task communication
/// is associative summation only, merged at the rayon join barrier.
struct HyperparameterObjective<'a, G> {
    computer: &'a mut PosteriorComputer<G>,
    fragments: Vec<TreeNode<TsgNode>>,
}

impl<G: GrammarCounts> HyperparameterObjective<'_, G> {
    fn check_gradient(&mut self) {
        let mut gradient = [0.0; 2];
        self.gradient(&mut gradient);
        let base = self.value();

        self.computer.concentration += GRADIENT_CHECK_DX;
        let empirical = (self.value() - base) / GRADIENT_CHECK_DX;
        info!(
            "gradient check (concentration): computed {} empirical {}",
            gradient[0], empirical
        );
        self.computer.concentration -= GRADIENT_CHECK_DX;

        self.computer.geometric_probability += GRADIENT_CHECK_DX;
        let empirical = (self.value() - base) / GRADIENT_CHECK_DX;
        info!(
            "gradient check (geometric): computed {} empirical {}",
            gradient[1], empirical
        );
        self.computer.geometric_probability -= GRADIENT_CHECK_DX;
    }
}

impl<G: GrammarCounts> Objective for HyperparameterObjective<'_, G> {
    fn dimensions(&self) -> usize {
        2
    }

    fn params(&self, out: &mut [f64]) {
        out[0] = self.computer.concentration;
        out[1] = self.computer.geometric_probability;
    }

    fn set_params(&mut self, params: &[f64]) {
        self.computer.concentration = params[0];
        self.computer.geometric_probability = params[1];
        self.computer.limit_params();
    }

    fn value(&self) -> f64 {
        let computer = &*self.computer;
        self.fragments
            .par_iter()
            .map(|fragment| computer.log2_posterior_of_rule(fragment, true))
            .sum()
    }

    fn gradient(&self, out: &mut [f64]) {
        let computer = &*self.computer;
        let alpha = computer.concentration;
        let p = computer.geometric_probability;
        let (concentration_gradient, geometric_gradient) = self
            .fragments
            .par_iter()
            .map(|fragment| {
                let n_root =
                    computer.grammar.count_trees_with_root(fragment.value().symbol) as f64 - 1.0;
                let n_rule = computer.grammar.count_tree_occurrences(fragment) as f64 - 1.0;
                let n_root = n_root.max(0.0);
                let n_rule = n_rule.min(n_root).max(0.0);

                let size = fragment.size();
                let log2_mle = computer.prior.log2_probability(fragment);
                let geometric_log2 = geometric_log2_prob(size, p);
                let log2_denominator = log2_sum_exp(
                    n_rule.log2(),
                    geometric_log2 + log2_mle + alpha.log2(),
                );

                let d_concentration = (geometric_log2 + log2_mle - log2_denominator).exp2()
                    - 1.0 / (n_root + alpha);
                // derivative of the geometric PMF p(1-p)^(n-1) in p
                let d_pmf = (1.0 - p).powi(size as i32 - 1)
                    - (size as f64 - 1.0) * p * (1.0 - p).powi(size as i32 - 2);
                let d_geometric = alpha * (log2_mle - log2_denominator).exp2() * d_pmf;
                (d_concentration, d_geometric)
            })
            .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
        out[0] = concentration_gradient / LN_2;
        out[1] = geometric_gradient / LN_2;
    }
}

#[cfg(test)]
mod tests {
    use super::{HyperparameterObjective, PosteriorComputer, PosteriorProbability};
    use crate::opt::Objective;
    use crate::tree::{Symbol, TreeNode};
    use crate::tsg::{all_fragments_of, TsgGrammar, TsgNode};
    use std::sync::Arc;

    fn fixture() -> (Arc<TsgGrammar>, Vec<TreeNode<TsgNode>>) {
        let grammar = Arc::new(TsgGrammar::new());
        let stmt = grammar.registry().intern(Symbol::ordinary(["child"]));
        let a = grammar
            .registry()
            .intern(Symbol::ordinary(Vec::<&str>::new()).with_annotation("KIND", "A"));
        let b = grammar
            .registry()
            .intern(Symbol::ordinary(Vec::<&str>::new()).with_annotation("KIND", "B"));

        let tree = |leaf_symbol| {
            TreeNode::new(
                TsgNode {
                    symbol: stmt,
                    is_root: true,
                },
                vec![vec![TreeNode::leaf(
                    TsgNode {
                        symbol: leaf_symbol,
                        is_root: false,
                    },
                    0,
                )]],
            )
        };
        let corpus = vec![tree(a), tree(a), tree(b)];
        for tree in &corpus {
            for fragment in all_fragments_of(tree) {
                grammar.add_rule(fragment);
            }
        }
        (grammar, corpus)
    }

    #[test]
    fn analytic_gradient_matches_finite_differences() {
        let (grammar, corpus) = fixture();
        let mut computer = PosteriorComputer::new(grammar, 4.0, 1.5);
        for tree in &corpus {
            computer.observe_tree(tree);
        }
        let fragments: Vec<_> = corpus.iter().flat_map(all_fragments_of).collect();
        let mut objective = HyperparameterObjective {
            computer: &mut computer,
            fragments,
        };

        let mut analytic = [0.0; 2];
        objective.gradient(&mut analytic);

        let dx = 1e-6;
        let empirical_concentration = {
            objective.computer.concentration += dx;
            let plus = objective.value();
            objective.computer.concentration -= 2.0 * dx;
            let minus = objective.value();
            objective.computer.concentration += dx;
            (plus - minus) / (2.0 * dx)
        };
        let empirical_geometric = {
            objective.computer.geometric_probability += dx;
            let plus = objective.value();
            objective.computer.geometric_probability -= 2.0 * dx;
            let minus = objective.value();
            objective.computer.geometric_probability += dx;
            (plus - minus) / (2.0 * dx)
        };

        assert!(
            (analytic[0] - empirical_concentration).abs() < 1e-4 * (1.0 + analytic[0].abs()),
            "concentration: analytic {} empirical {}",
            analytic[0],
            empirical_concentration
        );
        assert!(
            (analytic[1] - empirical_geometric).abs() < 1e-4 * (1.0 + analytic[1].abs()),
            "geometric: analytic {} empirical {}",
            analytic[1],
            empirical_geometric
        );
    }

    #[test]
    fn optimization_never_worsens_the_corpus_posterior() {
        let (grammar, corpus) = fixture();
        let mut computer = PosteriorComputer::new(Arc::clone(&grammar), 4.0, 1.5);
        for tree in &corpus {
            computer.observe_tree(tree);
        }
        let objective_value = |computer: &PosteriorComputer<TsgGrammar>| {
            corpus
                .iter()
                .flat_map(all_fragments_of)
                .map(|fragment| computer.log2_posterior_of_rule(&fragment, true))
                .sum::<f64>()
        };

        let before = objective_value(&computer);
        computer.optimize_hyperparameters(&corpus, true);
        let after = objective_value(&computer);

        assert!(after >= before - 1e-9, "before {before}, after {after}");
        assert!(computer.concentration() > 0.0);
        assert!(
            computer.geometric_probability() > 0.0 && computer.geometric_probability() < 1.0
        );
    }
}
