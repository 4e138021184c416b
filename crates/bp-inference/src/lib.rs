//! # bp-inference
//!
//! Histogram fitting for the directionality analysis.
//!
//! - [`optimizer`]: box-constrained L-BFGS built on argmin
//! - [`gauss`]: bounded single-Gaussian chi-square fit with Hessian errors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gauss;
pub mod optimizer;

pub use gauss::{GaussFitConfig, GaussianFit, fit_gaussian};
pub use optimizer::{LbfgsbOptimizer, Objective, OptimizationResult, OptimizerConfig};
