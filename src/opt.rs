//! Gradient-based maximization of smooth black-box objectives.

use thiserror::Error;

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 48;

/// A differentiable objective for gradient-based maximization.
///
/// Implementations may clamp parameters inside [`set_params`] to keep them in
/// a valid region; the solver re-reads the effective values after every set.
///
/// [`set_params`]: Objective::set_params
pub trait Objective {
    /// Number of parameters.
    fn dimensions(&self) -> usize;
    /// Write the current parameter vector into `out`.
    fn params(&self, out: &mut [f64]);
    /// Replace the parameter vector.
    fn set_params(&mut self, params: &[f64]);
    /// Objective value at the current parameters.
    fn value(&self) -> f64;
    /// Write the gradient at the current parameters into `out`.
    fn gradient(&self, out: &mut [f64]);
}

#[derive(Debug, Error)]
pub enum SolverError {
    /// The line search found no ascent step along any direction. The
    /// objective is left at the best parameters seen so far.
    #[error("no valid step direction after {iterations} iterations (best value {best_value})")]
    StepDirection { iterations: usize, best_value: f64 },
}

/// Nonlinear conjugate-gradient maximizer (Polak-Ribière with automatic
/// restart) using a backtracking Armijo line search.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        ConjugateGradient {
            tolerance: 1e-6,
            max_iterations: 200,
        }
    }
}

impl ConjugateGradient {
    pub fn new(tolerance: f64) -> Self {
        ConjugateGradient {
            tolerance,
            ..ConjugateGradient::default()
        }
    }

    /// Drive `objective` to a local maximum. On success the objective holds
    /// the converged parameters and the final value is returned.
    pub fn optimize<O: Objective>(&self, objective: &mut O) -> Result<f64, SolverError> {
        let n = objective.dimensions();
        let mut x = vec![0.0; n];
        objective.params(&mut x);
        let mut value = objective.value();
        let mut gradient = vec![0.0; n];
        objective.gradient(&mut gradient);
        let mut direction = gradient.clone();

        for iteration in 0..self.max_iterations {
            let mut slope = dot(&gradient, &direction);
            if slope <= 0.0 {
                // stale conjugate direction; restart along the gradient
                direction.copy_from_slice(&gradient);
                slope = dot(&gradient, &gradient);
            }
            if slope == 0.0 {
                break; // stationary point
            }

            let mut step = 1.0;
            let mut improvement = None;
            let mut trial = vec![0.0; n];
            for _ in 0..MAX_BACKTRACKS {
                for i in 0..n {
                    trial[i] = x[i] + step * direction[i];
                }
                objective.set_params(&trial);
                objective.params(&mut trial); // respect clamping
                let trial_value = objective.value();
                if trial_value.is_finite() && trial_value > value + ARMIJO * step * slope {
                    improvement = Some(trial_value - value);
                    x.copy_from_slice(&trial);
                    value = trial_value;
                    break;
                }
                step *= 0.5;
            }
            let improvement = match improvement {
                Some(improvement) => improvement,
                None => {
                    // leave the objective at the best parameters seen
                    objective.set_params(&x);
                    return Err(SolverError::StepDirection {
                        iterations: iteration,
                        best_value: value,
                    });
                }
            };

            let mut next_gradient = vec![0.0; n];
            objective.gradient(&mut next_gradient);
            let gg = dot(&gradient, &gradient);
            let beta = if gg > 0.0 {
                ((dot(&next_gradient, &next_gradient) - dot(&next_gradient, &gradient)) / gg)
                    .max(0.0)
            } else {
                0.0
            };
            for i in 0..n {
                direction[i] = next_gradient[i] + beta * direction[i];
            }
            gradient = next_gradient;

            if improvement <= self.tolerance * (value.abs() + self.tolerance) {
                break;
            }
        }
        objective.set_params(&x);
        Ok(value)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::{ConjugateGradient, Objective, SolverError};

    struct Quadratic {
        params: Vec<f64>,
    }
    impl Objective for Quadratic {
        fn dimensions(&self) -> usize {
            2
        }
        fn params(&self, out: &mut [f64]) {
            out.copy_from_slice(&self.params);
        }
        fn set_params(&mut self, params: &[f64]) {
            self.params.copy_from_slice(params);
        }
        fn value(&self) -> f64 {
            let (x, y) = (self.params[0], self.params[1]);
            -(x - 3.0).powi(2) - 2.0 * (y + 1.0).powi(2)
        }
        fn gradient(&self, out: &mut [f64]) {
            out[0] = -2.0 * (self.params[0] - 3.0);
            out[1] = -4.0 * (self.params[1] + 1.0);
        }
    }

    #[test]
    fn maximizes_concave_quadratic() {
        let mut objective = Quadratic {
            params: vec![0.0, 0.0],
        };
        let value = ConjugateGradient::new(1e-10)
            .optimize(&mut objective)
            .unwrap();
        assert!(value > -1e-6);
        assert!((objective.params[0] - 3.0).abs() < 1e-3);
        assert!((objective.params[1] + 1.0).abs() < 1e-3);
    }

    struct Lying {
        params: Vec<f64>,
    }
    impl Objective for Lying {
        fn dimensions(&self) -> usize {
            1
        }
        fn params(&self, out: &mut [f64]) {
            out.copy_from_slice(&self.params);
        }
        fn set_params(&mut self, params: &[f64]) {
            self.params.copy_from_slice(params);
        }
        fn value(&self) -> f64 {
            0.0
        }
        fn gradient(&self, out: &mut [f64]) {
            out[0] = 1.0; // claims ascent where none exists
        }
    }

    #[test]
    fn reports_step_direction_failure_and_restores_params() {
        let mut objective = Lying { params: vec![5.0] };
        match ConjugateGradient::default().optimize(&mut objective) {
            Err(SolverError::StepDirection { best_value, .. }) => {
                assert_eq!(best_value, 0.0);
                assert_eq!(objective.params[0], 5.0);
            }
            other => panic!("expected step-direction failure, got {:?}", other.ok()),
        }
    }
}
