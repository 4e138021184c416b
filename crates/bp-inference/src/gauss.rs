//! Bounded single-Gaussian fit.
//!
//! Minimizes
//!
//! ```text
//! χ²(A, μ, σ) = Σ_i ((y_i − A·exp(−½((x_i − μ)/σ)²)) / e_i)²
//! ```
//!
//! over the bins whose centers lie inside the fit window and whose error is
//! non-zero. Parameter uncertainties come from `cov = (½·H)⁻¹`, with `H` the
//! Hessian of χ² at the minimum.

use crate::optimizer::{LbfgsbOptimizer, Objective, OptimizerConfig};
use bp_core::{Error, FitResult, Result};
use bp_hist::Histogram;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Fit window and optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussFitConfig {
    /// Lower edge of the fit window.
    pub window_min: f64,
    /// Upper edge of the fit window.
    pub window_max: f64,
    /// Optimizer settings.
    pub optimizer: OptimizerConfig,
}

impl Default for GaussFitConfig {
    fn default() -> Self {
        Self {
            window_min: -400.0,
            window_max: 400.0,
            optimizer: OptimizerConfig { max_iter: 500, tol: 1e-6, m: 10 },
        }
    }
}

/// Result of a Gaussian fit.
#[derive(Debug, Clone, Serialize)]
pub struct GaussianFit {
    /// Peak height `A`.
    pub constant: f64,
    /// Peak location `μ`.
    pub mean: f64,
    /// Width `σ`.
    pub sigma: f64,
    /// Uncertainty of `A`.
    pub constant_error: f64,
    /// Uncertainty of `μ`.
    pub mean_error: f64,
    /// Uncertainty of `σ`.
    pub sigma_error: f64,
    /// χ² at the minimum.
    pub chi2: f64,
    /// Degrees of freedom (used bins − 3).
    pub ndf: usize,
    /// Whether the minimizer converged.
    pub converged: bool,
    /// Full result in the `(A, μ, σ)` parametrization.
    pub result: FitResult,
}

/// Points entering the χ², plus the scale used to normalise parameters.
struct GaussChi2 {
    x: Vec<f64>,
    y: Vec<f64>,
    inv_err: Vec<f64>,
    /// `(A0, μ0, σ0)`; internal parameters are `(A/A0, (μ−μ0)/σ0, σ/σ0)`.
    scale: [f64; 3],
}

impl GaussChi2 {
    fn physical(&self, p: &[f64]) -> (f64, f64, f64) {
        let [a0, mu0, s0] = self.scale;
        (p[0] * a0, mu0 + p[1] * s0, p[2] * s0)
    }
}

impl Objective for GaussChi2 {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let (a, mu, sigma) = self.physical(params);
        let mut chi2 = 0.0;
        for ((&x, &y), &w) in self.x.iter().zip(&self.y).zip(&self.inv_err) {
            let z = (x - mu) / sigma;
            let r = (y - a * (-0.5 * z * z).exp()) * w;
            chi2 += r * r;
        }
        Ok(chi2)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let (a, mu, sigma) = self.physical(params);
        let [a0, _, s0] = self.scale;
        let mut g = [0.0; 3];
        for ((&x, &y), &w) in self.x.iter().zip(&self.y).zip(&self.inv_err) {
            let z = (x - mu) / sigma;
            let e = (-0.5 * z * z).exp();
            let r = (y - a * e) * w;
            let k = -2.0 * r * w;
            g[0] += k * e;
            g[1] += k * a * e * z / sigma;
            g[2] += k * a * e * z * z / sigma;
        }
        // Chain rule into the scaled parametrization.
        Ok(vec![g[0] * a0, g[1] * s0, g[2] * s0])
    }
}

/// Fit `hist` to a single Gaussian inside the configured window.
///
/// Returns `Err(Error::Fit)` when fewer than three bins carry information,
/// when there is no positive signal to seed the fit, or when the Hessian at
/// the minimum cannot be inverted. A fit that runs but does not converge is
/// returned with `converged == false`.
pub fn fit_gaussian(hist: &Histogram, config: &GaussFitConfig) -> Result<GaussianFit> {
    let (lo, hi) = (config.window_min, config.window_max);
    if !(lo < hi) {
        return Err(Error::Validation(format!("invalid fit window [{lo}, {hi}]")));
    }

    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut inv_err = Vec::new();
    for bin in 0..hist.n_bins {
        let c = hist.bin_center(bin);
        let e = hist.bin_error(bin);
        if c < lo || c > hi || e <= 0.0 {
            continue;
        }
        x.push(c);
        y.push(hist.bin_content(bin));
        inv_err.push(1.0 / e);
    }
    if x.len() < 3 {
        return Err(Error::Fit(format!(
            "'{}': only {} usable bins in [{lo}, {hi}]",
            hist.name,
            x.len()
        )));
    }

    // Seed from the positive part of the window.
    let (mut sw, mut swx, mut swx2, mut peak) = (0.0, 0.0, 0.0, 0.0_f64);
    for (&xi, &yi) in x.iter().zip(&y) {
        if yi > 0.0 {
            sw += yi;
            swx += yi * xi;
            swx2 += yi * xi * xi;
            peak = peak.max(yi);
        }
    }
    if sw <= 0.0 {
        return Err(Error::Fit(format!("'{}': no positive content to fit", hist.name)));
    }
    let width = hist.bin_width();
    let mu0 = swx / sw;
    let sigma0 = (swx2 / sw - mu0 * mu0).abs().sqrt().max(width);

    let objective = GaussChi2 { x, y, inv_err, scale: [peak, mu0, sigma0] };
    let ndf = objective.x.len().saturating_sub(3);

    let bounds = [
        (0.0, 10.0),
        ((lo - mu0) / sigma0, (hi - mu0) / sigma0),
        (0.5 * width / sigma0, (hi - lo) / sigma0),
    ];
    let optimizer = LbfgsbOptimizer::new(config.optimizer.clone());
    let opt = optimizer.minimize(&objective, &[1.0, 0.0, 1.0], &bounds)?;

    let converged = opt.converged || {
        let g = objective.gradient(&opt.parameters)?;
        let norm = g.iter().map(|v| v * v).sum::<f64>().sqrt();
        norm <= 1e-4 * opt.fval.max(1.0)
    };

    let hessian = hessian(&objective, &opt.parameters)?;
    let cov_scaled = invert_hessian(&(hessian * 0.5)).ok_or_else(|| {
        Error::Fit(format!("'{}': Hessian at the minimum is not invertible", hist.name))
    })?;

    let (a, mu, sigma) = objective.physical(&opt.parameters);
    let jac = [objective.scale[0], objective.scale[2], objective.scale[2]];
    let mut covariance = vec![0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            covariance[i * 3 + j] = cov_scaled[(i, j)] * jac[i] * jac[j];
        }
    }
    let uncertainties: Vec<f64> = (0..3).map(|i| covariance[i * 3 + i].sqrt()).collect();

    tracing::debug!(
        hist = %hist.name,
        mean = mu,
        mean_error = uncertainties[1],
        chi2 = opt.fval,
        ndf,
        converged,
        "gaussian fit"
    );

    Ok(GaussianFit {
        constant: a,
        mean: mu,
        sigma,
        constant_error: uncertainties[0],
        mean_error: uncertainties[1],
        sigma_error: uncertainties[2],
        chi2: opt.fval,
        ndf,
        converged,
        result: FitResult::with_covariance(
            vec![a, mu, sigma],
            uncertainties,
            covariance,
            opt.fval,
            converged,
            opt.n_iter,
        ),
    })
}

/// Hessian by forward differences of the analytic gradient, symmetrised.
fn hessian(objective: &GaussChi2, params: &[f64]) -> Result<DMatrix<f64>> {
    let n = params.len();
    let g0 = objective.gradient(params)?;
    let mut h = DMatrix::zeros(n, n);
    for j in 0..n {
        let eps = 1e-5 * params[j].abs().max(1.0);
        let mut probe = params.to_vec();
        probe[j] += eps;
        let g = objective.gradient(&probe)?;
        for i in 0..n {
            h[(i, j)] = (g[i] - g0[i]) / eps;
        }
    }
    let ht = h.transpose();
    Ok((&h + &ht) * 0.5)
}

/// Damped Cholesky inverse; `None` if no positive-definite inverse exists.
fn invert_hessian(h: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = h.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| h[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut damped = h.clone();
    let mut damping = 0.0_f64;
    for _ in 0..10 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            let cov = chol.solve(&identity);
            if (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0) {
                return Some(cov);
            }
            return None;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_hist() -> Histogram {
        Histogram::new("dz", "dz", 801, -400.5, 400.5).unwrap()
    }

    fn fill_gaussian(h: &mut Histogram, amplitude: f64, mu: f64, sigma: f64) {
        for bin in 0..h.n_bins {
            let x = h.bin_center(bin);
            let z = (x - mu) / sigma;
            let n = (amplitude * (-0.5 * z * z).exp()).round() as usize;
            for _ in 0..n {
                h.fill(x);
            }
        }
    }

    #[test]
    fn recovers_peak_location() {
        let mut h = depth_hist();
        fill_gaussian(&mut h, 1000.0, 12.0, 60.0);
        let fit = fit_gaussian(&h, &GaussFitConfig::default()).unwrap();
        assert!(fit.converged);
        assert!((fit.mean - 12.0).abs() < 0.5, "mean = {}", fit.mean);
        assert!((fit.sigma - 60.0).abs() < 1.0, "sigma = {}", fit.sigma);
        assert!(fit.mean_error > 0.05 && fit.mean_error < 0.5, "err = {}", fit.mean_error);
        assert_eq!(fit.result.parameters.len(), 3);
    }

    #[test]
    fn empty_histogram_fails() {
        let err = fit_gaussian(&depth_hist(), &GaussFitConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Fit(_)));
    }

    #[test]
    fn negative_only_histogram_fails() {
        let mut h = depth_hist();
        for x in [-10.0, 0.0, 10.0, 20.0] {
            h.fill_weighted(x, -1.0);
        }
        let err = fit_gaussian(&h, &GaussFitConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no positive content"));
    }

    #[test]
    fn analytic_gradient_matches_numeric() {
        let objective = GaussChi2 {
            x: vec![-2.0, -1.0, 0.0, 1.0, 2.0],
            y: vec![1.0, 6.0, 10.0, 5.0, 2.0],
            inv_err: vec![1.0, 0.5, 0.3, 0.5, 1.0],
            scale: [10.0, 0.0, 1.0],
        };
        struct Numeric<'a>(&'a GaussChi2);
        impl Objective for Numeric<'_> {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                self.0.eval(params)
            }
        }
        let p = [0.9, 0.1, 1.2];
        let ga = objective.gradient(&p).unwrap();
        let gn = Numeric(&objective).gradient(&p).unwrap();
        for (a, n) in ga.iter().zip(&gn) {
            assert!((a - n).abs() < 1e-5 * a.abs().max(1.0), "{a} vs {n}");
        }
    }

    #[test]
    fn rejects_inverted_window() {
        let config = GaussFitConfig { window_min: 5.0, window_max: -5.0, ..Default::default() };
        assert!(fit_gaussian(&depth_hist(), &config).is_err());
    }
}
