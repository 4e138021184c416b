//! Direction estimation.
//!
//! The transverse displacement of the `DataUnbiased` slot comes from the
//! asymmetry between the observed net populations at ±pitch and the
//! populations expected from neighbor availability alone:
//!
//! ```text
//! r+ = N+ / (N++ + N+-)
//! r- = N- / (N-- + N+-)
//! p  = pitch * (r+ - r-) / (r+ + r- + 1)
//! ```
//!
//! with first-order error propagation through the whole rational
//! expression. The three displacements are then turned into an azimuth
//! `φ = atan(py/px)` and a polar angle `θ' = 90° − atan(ρ/pz)`, where
//! `ρ = √(px² + py²)`. The 90° remap is a fixed convention: θ' is measured
//! from the transverse plane.

use crate::accumulator::HistogramSet;
use crate::subtract::{AxisMeasurements, BackgroundSummary};
use bp_core::{Axis, DatasetVariant, Error, EstimateStatus, Measurement, Result, SignalClass};
use bp_hist::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;

/// Net populations feeding the asymmetry estimator on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AsymmetryInputs {
    /// `Data` net content at +pitch
    pub plus: Measurement,
    /// `Data` net content at −pitch
    pub minus: Measurement,
    /// `DataUnbiased` net content at +pitch
    pub plus_plus: Measurement,
    /// `DataUnbiased` net content at −pitch
    pub minus_minus: Measurement,
    /// `DataUnbiased` net content at 0
    pub plus_minus: Measurement,
}

fn bin_at(h: &Histogram, x: f64) -> Result<Measurement> {
    let bin = h
        .find_bin(x)
        .ok_or_else(|| Error::Validation(format!("{} has no bin containing {x}", h.name)))?;
    Ok(Measurement::new(h.bin_content(bin), h.bin_error(bin)))
}

/// Read the five asymmetry inputs of `axis` from the net histograms.
///
/// Requires background subtraction to have run.
pub fn asymmetry_inputs(set: &HistogramSet, axis: Axis, pitch: f64) -> Result<AsymmetryInputs> {
    if !axis.is_transverse() {
        return Err(Error::Validation(format!("no asymmetry estimate on the {axis} axis")));
    }
    let data = set.hist(DatasetVariant::Data, SignalClass::TotalDifference, axis);
    let unbiased = set.hist(DatasetVariant::DataUnbiased, SignalClass::TotalDifference, axis);
    Ok(AsymmetryInputs {
        plus: bin_at(data, pitch)?,
        minus: bin_at(data, -pitch)?,
        plus_plus: bin_at(unbiased, pitch)?,
        minus_minus: bin_at(unbiased, -pitch)?,
        plus_minus: bin_at(unbiased, 0.0)?,
    })
}

/// Relative size below which a net count, or the cleared denominator, is
/// treated as zero.
const CANCELLATION_TOLERANCE: f64 = 1e-9;

/// Whether `value` is zero up to cancellation against `scale`.
fn negligible(value: f64, scale: f64) -> bool {
    value.abs() <= CANCELLATION_TOLERANCE * scale
}

/// Bias-corrected mean displacement from the asymmetry inputs.
///
/// Net contents come from subtracting weighted counts, so an exactly empty
/// bin can carry a rounding residue. A normalisation `N++ + N+-` or
/// `N-- + N+-` that is negligible against its own statistical error, a
/// denominator that is negligible against its terms, or non-finite inputs
/// give a [`EstimateStatus::Degenerate`] measurement.
pub fn asymmetry_displacement(n: &AsymmetryInputs, pitch: f64) -> Measurement {
    let all = [n.plus, n.minus, n.plus_plus, n.minus_minus, n.plus_minus];
    if all.iter().any(|m| !m.value.is_finite() || !m.error.is_finite()) {
        return Measurement::invalid(EstimateStatus::Degenerate);
    }
    let (np, nm) = (n.plus.value, n.minus.value);
    let (npp, nmm, npm) = (n.plus_plus.value, n.minus_minus.value, n.plus_minus.value);
    let (ep, em) = (n.plus.error, n.minus.error);
    let (epp, emm, epm) = (n.plus_plus.error, n.minus_minus.error, n.plus_minus.error);

    let plus_norm = npp + npm;
    let minus_norm = nmm + npm;
    if negligible(plus_norm, epp.hypot(epm)) || negligible(minus_norm, emm.hypot(epm)) {
        return Measurement::invalid(EstimateStatus::Degenerate);
    }

    // r+ + r- + 1 with both ratios cleared: p = pitch * num / den.
    let den = nm * plus_norm + minus_norm * (np + plus_norm);
    let den_scale =
        (nm * plus_norm).abs() + (minus_norm * np).abs() + (minus_norm * plus_norm).abs();
    if negligible(den, den_scale) {
        return Measurement::invalid(EstimateStatus::Degenerate);
    }
    let r_plus = np / plus_norm;
    let r_minus = nm / minus_norm;
    let value = pitch * (r_plus - r_minus) / (r_plus + r_minus + 1.0);

    let var = ((nmm + npm) * (npm + npp)).powi(2)
        * ((ep * (2.0 * nm + nmm + npm)).powi(2) + (em * (2.0 * np + npp + npm)).powi(2))
        + (np * (npm + nmm) * (2.0 * nm + nmm + npm) * epp).powi(2)
        + (epm
            * (np * (nmm + npm).powi(2)
                + nm * (2.0 * nmm * np - 2.0 * np * npp - (npm + npp).powi(2))))
        .powi(2)
        + (nm * (npm + npp) * (2.0 * np + npm + npp) * emm).powi(2);
    let error = pitch * (1.0 / den).powi(2) * var.sqrt();

    if !value.is_finite() || !error.is_finite() {
        return Measurement::invalid(EstimateStatus::Degenerate);
    }
    Measurement::new(value, error)
}

/// `θ' = 90° − θ`. Applying it twice gives back `θ`.
pub fn polar_remap(theta_deg: f64) -> f64 {
    90.0 - theta_deg
}

fn first_invalid(ms: &[Measurement]) -> Option<EstimateStatus> {
    ms.iter().find(|m| !m.is_valid()).map(|m| m.status)
}

/// Azimuth `φ = atan(py/px)` in degrees.
///
/// `px = py = 0` has no azimuth and gives [`EstimateStatus::Boundary`].
pub fn azimuth(px: Measurement, py: Measurement) -> Measurement {
    if let Some(status) = first_invalid(&[px, py]) {
        return Measurement::invalid(status);
    }
    let (x, y) = (px.value, py.value);
    let rho2 = x * x + y * y;
    if rho2 == 0.0 {
        return Measurement::invalid(EstimateStatus::Boundary);
    }
    let phi = (y / x).atan().to_degrees();
    let err = ((y * px.error).powi(2) + (x * py.error).powi(2)).sqrt() / rho2;
    Measurement::new(phi, err.to_degrees())
}

/// Remapped polar angle `θ' = 90° − atan(ρ/pz)` in degrees.
///
/// On the depth axis (`ρ = 0`) the value is 90° with status
/// [`EstimateStatus::Boundary`]; a zero vector is
/// [`EstimateStatus::Degenerate`].
pub fn polar(px: Measurement, py: Measurement, pz: Measurement) -> Measurement {
    if let Some(status) = first_invalid(&[px, py, pz]) {
        return Measurement::invalid(status);
    }
    let (x, y, z) = (px.value, py.value, pz.value);
    let rho = x.hypot(y);
    let r2 = rho * rho + z * z;
    if r2 == 0.0 {
        return Measurement::invalid(EstimateStatus::Degenerate);
    }
    let theta = polar_remap((rho / z).atan().to_degrees());
    if rho == 0.0 {
        return Measurement::at_boundary(theta);
    }
    let transverse = (z / (rho * r2)).powi(2)
        * ((x * px.error).powi(2) + (y * py.error).powi(2));
    let depth = (rho * pz.error / r2).powi(2);
    Measurement::new(theta, (transverse + depth).sqrt().to_degrees())
}

/// Final displacements and angles of one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DirectionEstimate {
    /// Dataset variant
    pub dataset: DatasetVariant,
    /// Mean displacement along X
    pub px: Measurement,
    /// Mean displacement along Y
    pub py: Measurement,
    /// Mean displacement along Z
    pub pz: Measurement,
    /// Azimuth φ in degrees
    pub phi: Measurement,
    /// Polar angle θ' in degrees, from the transverse plane
    pub theta: Measurement,
}

impl DirectionEstimate {
    /// Derive the angles from per-axis displacements.
    pub fn from_displacements(dataset: DatasetVariant, p: AxisMeasurements) -> Self {
        Self {
            dataset,
            px: p.x,
            py: p.y,
            pz: p.z,
            phi: azimuth(p.x, p.y),
            theta: polar(p.x, p.y, p.z),
        }
    }
}

/// Everything the direction stage produces.
#[derive(Debug, Clone, Serialize)]
pub struct DirectionSummary {
    /// One estimate per dataset
    pub directions: BTreeMap<DatasetVariant, DirectionEstimate>,
    /// Asymmetry inputs per transverse axis
    pub asymmetry: BTreeMap<Axis, AsymmetryInputs>,
}

/// Fill the `DataUnbiased` transverse slots from the asymmetry estimator,
/// copy its depth slot from `Data`, and derive the angles of both datasets.
pub fn estimate_directions(
    set: &HistogramSet,
    background: &BackgroundSummary,
    pitch: f64,
) -> Result<DirectionSummary> {
    let mut estimates = background.estimates.clone();
    let data = estimates.get(&DatasetVariant::Data).copied().unwrap_or_default();

    let mut unbiased = AxisMeasurements::default();
    let mut asymmetry = BTreeMap::new();
    for axis in Axis::TRANSVERSE {
        let inputs = asymmetry_inputs(set, axis, pitch)?;
        let p = asymmetry_displacement(&inputs, pitch);
        if !p.is_valid() {
            tracing::warn!(axis = %axis, "degenerate asymmetry inputs");
        }
        tracing::debug!(
            axis = %axis,
            n_plus = %inputs.plus,
            n_minus = %inputs.minus,
            n_plus_plus = %inputs.plus_plus,
            n_minus_minus = %inputs.minus_minus,
            n_plus_minus = %inputs.plus_minus,
            "asymmetry inputs"
        );
        unbiased.set(axis, p);
        asymmetry.insert(axis, inputs);
    }
    unbiased.z = data.z;
    estimates.insert(DatasetVariant::DataUnbiased, unbiased);

    let mut directions = BTreeMap::new();
    for dataset in DatasetVariant::ALL {
        let p = estimates.get(&dataset).copied().unwrap_or_default();
        let d = DirectionEstimate::from_displacements(dataset, p);
        tracing::info!(
            dataset = %dataset,
            px = %d.px,
            py = %d.py,
            pz = %d.pz,
            phi = %d.phi,
            theta = %d.theta,
            "direction"
        );
        directions.insert(dataset, d);
    }
    Ok(DirectionSummary { directions, asymmetry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const PITCH: f64 = 145.7;

    fn m(v: f64, e: f64) -> Measurement {
        Measurement::new(v, e)
    }

    fn reference_inputs() -> AsymmetryInputs {
        AsymmetryInputs {
            plus: m(120.0, 11.0),
            minus: m(80.0, 9.0),
            plus_plus: m(60.0, 8.0),
            minus_minus: m(40.0, 6.0),
            plus_minus: m(50.0, 7.0),
        }
    }

    #[test]
    fn asymmetry_reference_values() {
        let p = asymmetry_displacement(&reference_inputs(), PITCH);
        assert!(p.is_valid());
        let rp = 120.0 / (60.0 + 50.0);
        let rm = 80.0 / (40.0 + 50.0);
        assert_eq!(p.value, PITCH * (rp - rm) / (rp + rm + 1.0));
        assert_relative_eq!(p.value, 9.877966101694915, max_relative = 1e-15);
        assert_relative_eq!(p.error, 8.41932215650109, max_relative = 1e-13);
    }

    #[test]
    fn asymmetry_error_matches_numeric_propagation() {
        let base = reference_inputs();
        let f = |n: &AsymmetryInputs| asymmetry_displacement(n, PITCH).value;
        let h = 1e-4;
        let mut var = 0.0;
        for k in 0..5 {
            let mut up = base;
            let mut down = base;
            let (u, d, e) = match k {
                0 => (&mut up.plus, &mut down.plus, base.plus.error),
                1 => (&mut up.minus, &mut down.minus, base.minus.error),
                2 => (&mut up.plus_plus, &mut down.plus_plus, base.plus_plus.error),
                3 => (&mut up.minus_minus, &mut down.minus_minus, base.minus_minus.error),
                _ => (&mut up.plus_minus, &mut down.plus_minus, base.plus_minus.error),
            };
            u.value += h;
            d.value -= h;
            let deriv = (f(&up) - f(&down)) / (2.0 * h);
            var += (deriv * e).powi(2);
        }
        let p = asymmetry_displacement(&base, PITCH);
        assert_relative_eq!(p.error, var.sqrt(), max_relative = 1e-6);
    }

    #[test]
    fn symmetric_populations_give_zero() {
        let n = AsymmetryInputs {
            plus: m(50.0, 7.0),
            minus: m(50.0, 7.0),
            plus_plus: m(20.0, 4.0),
            minus_minus: m(20.0, 4.0),
            plus_minus: m(30.0, 5.0),
        };
        let p = asymmetry_displacement(&n, PITCH);
        assert_eq!(p.value, 0.0);
        assert!(p.error > 0.0);
    }

    #[test]
    fn degenerate_denominators() {
        let mut n = reference_inputs();
        n.plus_plus = m(0.0, 0.0);
        n.plus_minus = m(0.0, 0.0);
        assert_eq!(asymmetry_displacement(&n, PITCH).status, EstimateStatus::Degenerate);

        // r+ + r- + 1 = 0
        let n = AsymmetryInputs {
            plus: m(-1.0, 1.0),
            minus: m(0.0, 1.0),
            plus_plus: m(0.5, 1.0),
            minus_minus: m(0.5, 1.0),
            plus_minus: m(0.5, 1.0),
        };
        assert_eq!(asymmetry_displacement(&n, PITCH).status, EstimateStatus::Degenerate);

        let mut n = reference_inputs();
        n.minus = m(f64::NAN, 1.0);
        let p = asymmetry_displacement(&n, PITCH);
        assert_eq!(p.status, EstimateStatus::Degenerate);
        assert!(p.value.is_nan());
    }

    #[test]
    fn subtraction_residue_is_not_a_population() {
        // Two correlated counts minus 24 accidentals at weight 1/12.
        let residue = m(8.881784197001252e-16, (2.0 + 24.0 / 144.0_f64).sqrt());
        let mut n = AsymmetryInputs {
            plus: m(1.0, 1.0),
            minus: m(0.0, 0.0),
            plus_plus: residue,
            minus_minus: m(1.0, 1.0),
            plus_minus: m(0.0, 0.0),
        };
        let p = asymmetry_displacement(&n, PITCH);
        assert_eq!(p.status, EstimateStatus::Degenerate);
        assert!(p.value.is_nan());

        // A single weighted count is small but real.
        n.plus_plus = m(1.0 / 12.0, 1.0 / 12.0);
        assert!(asymmetry_displacement(&n, PITCH).is_valid());
    }

    #[test]
    fn angles_on_the_x_axis() {
        let phi = azimuth(m(100.0, 5.0), m(0.0, 5.0));
        let theta = polar(m(100.0, 5.0), m(0.0, 5.0), m(0.0, 5.0));
        assert_eq!(phi.value, 0.0);
        assert_abs_diff_eq!(theta.value, 0.0, epsilon = 1e-12);
        assert!(phi.is_valid() && theta.is_valid());
        assert_relative_eq!(phi.error, (5.0f64 / 100.0).to_degrees(), max_relative = 1e-12);
        assert_relative_eq!(theta.error, (5.0f64 / 100.0).to_degrees(), max_relative = 1e-12);
    }

    #[test]
    fn depth_axis_is_a_boundary() {
        let phi = azimuth(m(0.0, 5.0), m(0.0, 5.0));
        assert_eq!(phi.status, EstimateStatus::Boundary);
        assert!(phi.value.is_nan());

        let theta = polar(m(0.0, 5.0), m(0.0, 5.0), m(100.0, 5.0));
        assert_eq!(theta.status, EstimateStatus::Boundary);
        assert_eq!(theta.value, 90.0);
        assert!(theta.error.is_nan());

        assert_eq!(polar(m(0.0, 1.0), m(0.0, 1.0), m(0.0, 1.0)).status, EstimateStatus::Degenerate);
    }

    #[test]
    fn diagonal_angles_and_errors() {
        let phi = azimuth(m(100.0, 10.0), m(100.0, 10.0));
        assert_relative_eq!(phi.value, 45.0, max_relative = 1e-12);
        let expected = (1000.0f64 * 2f64.sqrt() / 20000.0).to_degrees();
        assert_relative_eq!(phi.error, expected, max_relative = 1e-12);

        // ρ = pz: θ = 45°, θ' = 45°.
        let (px, py, pz) = (30.0, 40.0, 50.0);
        let theta = polar(m(px, 1.0), m(py, 2.0), m(pz, 3.0));
        assert_relative_eq!(theta.value, 45.0, max_relative = 1e-12);
        let rho: f64 = 50.0;
        let r2 = rho * rho + pz * pz;
        let expected = ((pz / (rho * r2)).powi(2) * ((px * 1.0f64).powi(2) + (py * 2.0f64).powi(2))
            + (rho * 3.0 / r2).powi(2))
        .sqrt()
        .to_degrees();
        assert_relative_eq!(theta.error, expected, max_relative = 1e-12);
    }

    #[test]
    fn remap_is_an_involution() {
        for theta in [-30.0, 0.0, 12.5, 90.0, 135.0] {
            assert_eq!(polar_remap(polar_remap(theta)), theta);
        }
    }

    #[test]
    fn invalid_inputs_propagate_status() {
        let fit_failed = Measurement::invalid(EstimateStatus::FitFailed);
        let d = DirectionEstimate::from_displacements(
            DatasetVariant::Data,
            AxisMeasurements { x: m(1.0, 1.0), y: m(1.0, 1.0), z: fit_failed },
        );
        assert!(d.phi.is_valid());
        assert_eq!(d.theta.status, EstimateStatus::FitFailed);
    }
}
