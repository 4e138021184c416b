//! Common data types for the directionality analysis

use serde::{Deserialize, Serialize};
use std::fmt;

/// Displacement axis.
///
/// `X` and `Y` are the transverse (segment-grid) axes, `Z` is the continuous
/// depth axis along each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Grid column axis
    X,
    /// Grid row axis
    Y,
    /// Depth axis
    Z,
}

impl Axis {
    /// All axes in canonical order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// The two segment-quantized axes.
    pub const TRANSVERSE: [Axis; 2] = [Axis::X, Axis::Y];

    /// Whether this axis is quantized by the segment grid.
    pub fn is_transverse(self) -> bool {
        !matches!(self, Axis::Z)
    }

    /// Short label.
    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signal population a histogram describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalClass {
    /// True coincidences from the prompt window.
    Correlated,
    /// Random coincidences from the far window, deadtime weighted on subtraction.
    Accidental,
    /// `Correlated − Accidental`. Derived only, never filled from events.
    TotalDifference,
}

impl SignalClass {
    /// All classes in canonical order.
    pub const ALL: [SignalClass; 3] =
        [SignalClass::Correlated, SignalClass::Accidental, SignalClass::TotalDifference];

    /// Classes that are filled directly from events.
    pub const FILLED: [SignalClass; 2] = [SignalClass::Correlated, SignalClass::Accidental];

    /// Human readable label.
    pub fn name(self) -> &'static str {
        match self {
            SignalClass::Correlated => "Correlated",
            SignalClass::Accidental => "Accidental",
            SignalClass::TotalDifference => "Total Difference",
        }
    }
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Histogram set variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DatasetVariant {
    /// Filled from observed same-segment and adjacent-segment pairs.
    Data,
    /// Filled with the synthetic neighbor-availability contribution.
    DataUnbiased,
}

impl DatasetVariant {
    /// All variants in canonical order.
    pub const ALL: [DatasetVariant; 2] = [DatasetVariant::Data, DatasetVariant::DataUnbiased];

    /// Human readable label.
    pub fn name(self) -> &'static str {
        match self {
            DatasetVariant::Data => "Data",
            DatasetVariant::DataUnbiased => "Data Unbiased",
        }
    }
}

impl fmt::Display for DatasetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of one displacement histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistKey {
    /// Dataset variant
    pub dataset: DatasetVariant,
    /// Signal class
    pub signal: SignalClass,
    /// Axis
    pub axis: Axis,
}

impl HistKey {
    /// Create a key.
    pub fn new(dataset: DatasetVariant, signal: SignalClass, axis: Axis) -> Self {
        Self { dataset, signal, axis }
    }

    /// Histogram name, e.g. `"Data Unbiased Correlated X"`.
    pub fn name(&self) -> String {
        format!("{} {} {}", self.dataset, self.signal, self.axis)
    }

    /// Every (dataset, signal, axis) combination.
    pub fn all() -> impl Iterator<Item = HistKey> {
        DatasetVariant::ALL.into_iter().flat_map(|dataset| {
            SignalClass::ALL.into_iter().flat_map(move |signal| {
                Axis::ALL.into_iter().map(move |axis| HistKey::new(dataset, signal, axis))
            })
        })
    }
}

/// Validity of a derived scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    /// Value and error are usable.
    Valid,
    /// No estimate has been computed for this slot yet.
    Missing,
    /// The underlying Gaussian fit did not converge.
    FitFailed,
    /// A denominator vanished or the inputs were not finite.
    Degenerate,
    /// The value sits on a coordinate singularity (e.g. φ with px = py = 0).
    Boundary,
}

/// A value with a one-sigma uncertainty and a validity flag.
///
/// Invalid measurements carry NaN for both value and error so they cannot be
/// mistaken for a real number downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    /// Central value
    pub value: f64,
    /// One-sigma uncertainty
    pub error: f64,
    /// Validity
    pub status: EstimateStatus,
}

impl Measurement {
    /// A valid measurement.
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error, status: EstimateStatus::Valid }
    }

    /// An invalid measurement with the given reason.
    pub fn invalid(status: EstimateStatus) -> Self {
        debug_assert!(status != EstimateStatus::Valid);
        Self { value: f64::NAN, error: f64::NAN, status }
    }

    /// A value on a coordinate singularity; its uncertainty is undefined.
    pub fn at_boundary(value: f64) -> Self {
        Self { value, error: f64::NAN, status: EstimateStatus::Boundary }
    }

    /// Placeholder for a slot not yet computed.
    pub fn missing() -> Self {
        Self::invalid(EstimateStatus::Missing)
    }

    /// Whether the measurement is usable.
    pub fn is_valid(&self) -> bool {
        self.status == EstimateStatus::Valid
    }
}

impl Default for Measurement {
    fn default() -> Self {
        Self::missing()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{} ± {}", self.value, self.error)
        } else {
            write!(f, "invalid ({:?})", self.status)
        }
    }
}

/// Fit result containing parameter estimates and uncertainties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Parameter uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Objective value at minimum (chi-square for histogram fits)
    pub fval: f64,

    /// Convergence status
    pub converged: bool,

    /// Number of optimizer iterations
    pub n_iter: u64,
}

impl FitResult {
    /// Create a fit result with covariance matrix
    pub fn with_covariance(
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        fval: f64,
        converged: bool,
        n_iter: u64,
    ) -> Self {
        Self { parameters, uncertainties, covariance: Some(covariance), fval, converged, n_iter }
    }
}
