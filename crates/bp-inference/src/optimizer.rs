//! Box-constrained minimization.
//!
//! Thin wrapper over argmin's L-BFGS with a More-Thuente line search. Bounds
//! are enforced by clamping parameters before every evaluation and zeroing
//! gradient components that push against an active bound.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use bp_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for the L-BFGS-B optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for gradient norm
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-8, m: 10 }
    }
}

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters (clamped to bounds)
    pub parameters: Vec<f64>,
    /// Objective value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Whether the solver reported convergence
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, converged={})",
            self.fval, self.n_iter, self.converged
        )
    }
}

/// Objective function to minimize.
pub trait Objective: Send + Sync {
    /// Evaluate at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params` (central differences unless overridden).
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut probe = params.to_vec();
        for i in 0..params.len() {
            let eps = 1e-8 * params[i].abs().max(1.0);
            probe[i] = params[i] + eps;
            let f_plus = self.eval(&probe)?;
            probe[i] = params[i] - eps;
            let f_minus = self.eval(&probe)?;
            probe[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

struct BoundedProblem<'a> {
    objective: &'a dyn Objective,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        const EPS: f64 = 1e-12;
        for (gi, (&x, &(lo, hi))) in g.iter_mut().zip(clamped.iter().zip(self.bounds.iter())) {
            if (x <= lo + EPS && *gi > 0.0) || (x >= hi - EPS && *gi < 0.0) {
                *gi = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS optimizer with box constraints
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Create new optimizer with given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` starting from `init_params` within `bounds`.
    pub fn minimize(
        &self,
        objective: &dyn Objective,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);
        let problem = BoundedProblem { objective, bounds };

        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-14) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| {
                Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
            })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("Optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
        let parameters = clamp_params(best, bounds);

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            converged,
            message: termination.to_string(),
        })
    }
}
