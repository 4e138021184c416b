//! Background subtraction.
//!
//! `TotalDifference = Correlated − w·Accidental` bin by bin, where the
//! filled histograms hold exact counts and `w` is the deadtime weight of the
//! set. The weight is applied here and nowhere else.
//!
//! Per-axis displacement estimates taken here:
//! - X/Y on `Data`: mean of the net histogram and its standard error;
//! - Z on both variants: peak of a bounded Gaussian fit.
//!
//! X/Y on `DataUnbiased` are left [`EstimateStatus::Missing`] for the
//! asymmetry estimator.

use crate::accumulator::HistogramSet;
use bp_core::{Axis, DatasetVariant, EstimateStatus, Measurement, Result, SignalClass};
use bp_inference::{GaussFitConfig, GaussianFit, fit_gaussian};
use serde::Serialize;
use std::collections::BTreeMap;

/// Displacement estimate per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AxisMeasurements {
    /// X
    pub x: Measurement,
    /// Y
    pub y: Measurement,
    /// Z
    pub z: Measurement,
}

impl AxisMeasurements {
    /// Measurement on `axis`.
    pub fn get(&self, axis: Axis) -> Measurement {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Replace the measurement on `axis`.
    pub fn set(&mut self, axis: Axis, m: Measurement) {
        match axis {
            Axis::X => self.x = m,
            Axis::Y => self.y = m,
            Axis::Z => self.z = m,
        }
    }
}

/// Outcome of the depth-axis fit for one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DepthFit {
    /// Fit result, when the fit could be run
    pub fit: Option<GaussianFit>,
    /// Why the fit is unusable, if it is
    pub failure: Option<String>,
}

impl DepthFit {
    fn measurement(&self) -> Measurement {
        match &self.fit {
            Some(f) if self.failure.is_none() => Measurement::new(f.mean, f.mean_error),
            _ => Measurement::invalid(EstimateStatus::FitFailed),
        }
    }
}

/// Contents of the three diagnostic bins of one histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiagnosticBins {
    /// Bin containing +pitch
    pub plus: f64,
    /// Bin containing −pitch
    pub minus: f64,
    /// Bin containing 0
    pub zero: f64,
}

impl DiagnosticBins {
    /// Read the ±pitch and 0 bins of `h`.
    pub fn of(h: &bp_hist::Histogram, pitch: f64) -> Self {
        let content = |v: f64| h.find_bin(v).map(|b| h.bin_content(b)).unwrap_or(0.0);
        Self { plus: content(pitch), minus: content(-pitch), zero: content(0.0) }
    }
}

/// Everything background subtraction produces besides the histograms.
#[derive(Debug, Clone, Serialize)]
pub struct BackgroundSummary {
    /// Per-dataset displacement estimates
    pub estimates: BTreeMap<DatasetVariant, AxisMeasurements>,
    /// Per-dataset depth fits
    pub depth_fits: BTreeMap<DatasetVariant, DepthFit>,
}

/// Derive the `TotalDifference` histograms in place and take the naive
/// per-axis estimates.
pub fn subtract_backgrounds(
    set: &mut HistogramSet,
    pitch: f64,
    fit_config: &GaussFitConfig,
) -> Result<BackgroundSummary> {
    let mut estimates = BTreeMap::new();
    let mut depth_fits = BTreeMap::new();

    let net_class = SignalClass::TotalDifference;
    let w = set.weight(SignalClass::Accidental);
    for dataset in DatasetVariant::ALL {
        let mut axes = BTreeMap::new();
        for axis in Axis::ALL {
            let correlated = set.hist(dataset, SignalClass::Correlated, axis);
            let accidental = set.hist(dataset, SignalClass::Accidental, axis);
            let mut net =
                correlated.renamed(format!("{dataset} {net_class} {axis}"), dataset.name());
            net.add_scaled(accidental, -w)?;
            axes.insert(axis, net);
        }
        let mut mult = set
            .multiplicity(dataset, SignalClass::Correlated)
            .renamed(format!("{dataset} {net_class} Multiplicity"), dataset.name());
        mult.add_scaled(set.multiplicity(dataset, SignalClass::Accidental), -w)?;

        let mut m = AxisMeasurements::default();
        if dataset == DatasetVariant::Data {
            for axis in Axis::TRANSVERSE {
                let net = &axes[&axis];
                let mean = net.mean();
                let error = net.mean_error();
                m.set(
                    axis,
                    if mean.is_finite() && error.is_finite() {
                        Measurement::new(mean, error)
                    } else {
                        Measurement::invalid(EstimateStatus::Degenerate)
                    },
                );

                let accidental_hist = set.hist(dataset, SignalClass::Accidental, axis);
                let accidental = DiagnosticBins::of(accidental_hist, pitch);
                let diag = DiagnosticBins::of(net, pitch);
                tracing::info!(
                    axis = %axis,
                    acc_plus = w * accidental.plus,
                    acc_minus = w * accidental.minus,
                    acc_zero = w * accidental.zero,
                    acc_entries = accidental_hist.entries,
                    net_plus = diag.plus,
                    net_minus = diag.minus,
                    net_zero = diag.zero,
                    "diagnostic bins"
                );
            }
        }

        let depth = match fit_gaussian(&axes[&Axis::Z], fit_config) {
            Ok(fit) if fit.converged => DepthFit { fit: Some(fit), failure: None },
            Ok(fit) => {
                DepthFit { fit: Some(fit), failure: Some("fit did not converge".to_string()) }
            }
            Err(e) => DepthFit { fit: None, failure: Some(e.to_string()) },
        };
        if let Some(reason) = &depth.failure {
            tracing::warn!(dataset = %dataset, reason = %reason, "depth fit unusable");
        }
        m.z = depth.measurement();
        tracing::info!(dataset = %dataset, pz = %m.z, "depth fit");

        set.set_total_difference(dataset, axes, mult);
        estimates.insert(dataset, m);
        depth_fits.insert(dataset, depth);
    }

    Ok(BackgroundSummary { estimates, depth_fits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinningConfig;
    use approx::assert_relative_eq;

    const PITCH: f64 = 145.7;
    const W: f64 = 1.0 / 12.0;

    fn set() -> HistogramSet {
        HistogramSet::new(&BinningConfig::default(), W).unwrap()
    }

    #[test]
    fn total_difference_is_bin_wise_difference() {
        let mut set = set();
        let w = W;
        for (v, n) in [(0.0, 7), (PITCH, 3), (-PITCH, 2)] {
            for _ in 0..n {
                set.fill(DatasetVariant::Data, SignalClass::Correlated, Axis::X, v).unwrap();
            }
        }
        for v in [0.0, 0.0, PITCH, -PITCH, -PITCH] {
            set.fill(DatasetVariant::Data, SignalClass::Accidental, Axis::X, v).unwrap();
        }
        subtract_backgrounds(&mut set, PITCH, &GaussFitConfig::default()).unwrap();

        for dataset in DatasetVariant::ALL {
            for axis in Axis::ALL {
                let c = set.hist(dataset, SignalClass::Correlated, axis);
                let a = set.hist(dataset, SignalClass::Accidental, axis);
                let t = set.hist(dataset, SignalClass::TotalDifference, axis);
                for bin in 0..t.n_bins {
                    assert_eq!(t.bin_content(bin), c.bin_content(bin) - w * a.bin_content(bin));
                }
            }
        }
        let t = set.hist(DatasetVariant::Data, SignalClass::TotalDifference, Axis::X);
        assert_eq!(t.name, "Data Total Difference X");
        let d = DiagnosticBins::of(t, PITCH);
        assert_relative_eq!(d.plus, 3.0 - w);
        assert_relative_eq!(d.minus, 2.0 - 2.0 * w);
        assert_relative_eq!(d.zero, 7.0 - 2.0 * w);
    }

    #[test]
    fn transverse_mean_and_error() {
        let mut set = set();
        for v in [PITCH, PITCH, PITCH, 0.0, -PITCH] {
            set.fill(DatasetVariant::Data, SignalClass::Correlated, Axis::Y, v).unwrap();
        }
        let summary = subtract_backgrounds(&mut set, PITCH, &GaussFitConfig::default()).unwrap();
        let y = summary.estimates[&DatasetVariant::Data].y;
        assert!(y.is_valid());
        assert_relative_eq!(y.value, 2.0 * PITCH / 5.0, epsilon = 1e-9);
        let var = (3.0 * PITCH * PITCH + PITCH * PITCH) / 5.0 - (2.0 * PITCH / 5.0).powi(2);
        assert_relative_eq!(y.error, var.sqrt() / 5f64.sqrt(), epsilon = 1e-9);

        // Unbiased transverse slots are left for the asymmetry estimator.
        let unbiased_x = summary.estimates[&DatasetVariant::DataUnbiased].x;
        assert_eq!(unbiased_x.status, EstimateStatus::Missing);
    }

    #[test]
    fn background_dominated_axis_is_degenerate() {
        let mut set = set();
        let data = DatasetVariant::Data;
        set.fill(data, SignalClass::Correlated, Axis::X, PITCH).unwrap();
        set.fill(data, SignalClass::Correlated, Axis::X, -PITCH).unwrap();
        for _ in 0..36 {
            set.fill(data, SignalClass::Accidental, Axis::X, 0.0).unwrap();
        }
        let summary = subtract_backgrounds(&mut set, PITCH, &GaussFitConfig::default()).unwrap();
        let net = set.hist(data, SignalClass::TotalDifference, Axis::X);
        assert_relative_eq!(net.integral(), -1.0, epsilon = 1e-12);
        assert_eq!(summary.estimates[&data].x.status, EstimateStatus::Degenerate);
    }

    #[test]
    fn empty_depth_histogram_marks_fit_failed() {
        let mut set = set();
        let summary = subtract_backgrounds(&mut set, PITCH, &GaussFitConfig::default()).unwrap();
        for dataset in DatasetVariant::ALL {
            assert_eq!(summary.estimates[&dataset].z.status, EstimateStatus::FitFailed);
            assert!(summary.depth_fits[&dataset].failure.is_some());
        }
        // Empty transverse histograms have no standard error.
        assert_eq!(summary.estimates[&DatasetVariant::Data].x.status, EstimateStatus::Degenerate);
    }

    #[test]
    fn accidental_only_gives_negated_histograms() {
        let mut set = set();
        for v in [-3.0, 0.0, 5.5, 5.5] {
            set.fill(DatasetVariant::DataUnbiased, SignalClass::Accidental, Axis::Z, v).unwrap();
        }
        subtract_backgrounds(&mut set, PITCH, &GaussFitConfig::default()).unwrap();
        let a = set.hist(DatasetVariant::DataUnbiased, SignalClass::Accidental, Axis::Z);
        let t = set.hist(DatasetVariant::DataUnbiased, SignalClass::TotalDifference, Axis::Z);
        for bin in 0..t.n_bins {
            assert_eq!(t.bin_content(bin), -W * a.bin_content(bin));
        }
    }
}
