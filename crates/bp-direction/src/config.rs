//! Analysis configuration.
//!
//! Every field defaults to the values of the reference BiPo directionality
//! analysis, so an empty YAML/JSON document is a valid configuration.

use crate::topology::N_SEGMENTS;
use bp_core::{Error, Result};
use bp_inference::GaussFitConfig;
use serde::{Deserialize, Serialize};

/// Closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl Interval {
    /// Create an interval.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `min <= v <= max`
    #[inline]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    /// `min < v < max`
    #[inline]
    pub fn contains_open(&self, v: f64) -> bool {
        v > self.min && v < self.max
    }

    /// `max − min`
    #[inline]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    fn validate(&self, what: &str) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min <= self.max) {
            return Err(Error::Validation(format!(
                "{what}: invalid interval [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Detector geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Distance between neighboring segment centers (mm).
    pub segment_pitch: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self { segment_pitch: 145.7 }
    }
}

/// Segments removed from the fiducial volume on top of the fixed edge policy
/// (top row, first and last column).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiducialConfig {
    /// Additional excluded segment indices.
    pub extra_excluded: Vec<usize>,
}

impl Default for FiducialConfig {
    fn default() -> Self {
        Self { extra_excluded: vec![25, 26] }
    }
}

/// Energy, PSD and position cuts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CutConfig {
    /// Maximum |z| of either signal (mm).
    pub max_abs_z: f64,
    /// Anchor (alpha) energy window (MeV).
    pub anchor_energy: Interval,
    /// Anchor PSD window.
    pub anchor_psd: Interval,
    /// Companion (beta) energy window (MeV).
    pub companion_energy: Interval,
    /// Companion PSD window.
    pub companion_psd: Interval,
    /// Maximum anchor–companion distance (mm).
    pub max_displacement: f64,
    /// Optional |dz| pre-cut (mm), applied to both populations.
    pub max_abs_dz: Option<f64>,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            max_abs_z: 1000.0,
            anchor_energy: Interval::new(0.72, 1.0),
            anchor_psd: Interval::new(0.17, 0.34),
            companion_energy: Interval::new(0.0, 4.0),
            companion_psd: Interval::new(0.05, 0.22),
            max_displacement: 550.0,
            max_abs_dz: None,
        }
    }
}

/// Coincidence time windows (µs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Po-214 half-life.
    pub half_life: f64,
    /// Prompt window start.
    pub prompt_start: f64,
    /// Prompt window end, in mean lifetimes.
    pub prompt_lifetimes: f64,
    /// Far window start, in mean lifetimes.
    pub far_start_lifetimes: f64,
    /// Far window width as a multiple of the prompt window width.
    pub far_window_ratio: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            half_life: 0.1643,
            prompt_start: 0.01,
            prompt_lifetimes: 3.0,
            far_start_lifetimes: 10.0,
            far_window_ratio: 12.0,
        }
    }
}

impl TimingConfig {
    /// Mean lifetime τ = t½ / ln 2.
    pub fn lifetime(&self) -> f64 {
        self.half_life / std::f64::consts::LN_2
    }

    /// Open window on `anchor time − companion time` for Correlated pairs.
    pub fn prompt_window(&self) -> Interval {
        Interval::new(self.prompt_start, self.prompt_lifetimes * self.lifetime())
    }

    /// Open window on `companion time − anchor time` for Accidental pairs.
    pub fn far_window(&self) -> Interval {
        let start = self.far_start_lifetimes * self.lifetime();
        Interval::new(start, start + self.far_window_ratio * self.prompt_window().width())
    }

    /// Deadtime weight that scales the Accidental counts on subtraction.
    pub fn accidental_weight(&self) -> f64 {
        1.0 / self.far_window_ratio
    }
}

/// Binning of one displacement axis: `n_bins` over `[-max, max)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisBinning {
    /// Number of bins
    pub n_bins: usize,
    /// Half range
    pub max: f64,
}

/// Histogram binning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// X and Y.
    pub transverse: AxisBinning,
    /// Z.
    pub depth: AxisBinning,
    /// Highest companion rank in the multiplicity histograms.
    pub max_rank: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            transverse: AxisBinning { n_bins: 301, max: 150.5 },
            depth: AxisBinning { n_bins: 801, max: 400.5 },
            max_rank: 20,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Dead/excluded segments, strictly ascending.
    pub excluded_segments: Vec<usize>,
    /// Geometry.
    pub geometry: GeometryConfig,
    /// Fiducial volume.
    pub fiducial: FiducialConfig,
    /// Selection cuts.
    pub cuts: CutConfig,
    /// Time windows.
    pub timing: TimingConfig,
    /// Histogram binning.
    pub binning: BinningConfig,
    /// Depth-axis Gaussian fit.
    pub fit: GaussFitConfig,
}

impl AnalysisConfig {
    /// Check internal consistency.
    ///
    /// The exclude list itself is validated by [`crate::Topology::new`].
    pub fn validate(&self) -> Result<()> {
        let pitch = self.geometry.segment_pitch;
        if !(pitch.is_finite() && pitch > 0.0) {
            return Err(Error::Validation(format!("segment_pitch must be > 0, got {pitch}")));
        }
        if let Some(&seg) = self.fiducial.extra_excluded.iter().find(|&&s| s >= N_SEGMENTS) {
            return Err(Error::Validation(format!(
                "fiducial.extra_excluded: segment {seg} outside [0, {N_SEGMENTS})"
            )));
        }

        let cuts = &self.cuts;
        cuts.anchor_energy.validate("cuts.anchor_energy")?;
        cuts.anchor_psd.validate("cuts.anchor_psd")?;
        cuts.companion_energy.validate("cuts.companion_energy")?;
        cuts.companion_psd.validate("cuts.companion_psd")?;
        if !(cuts.max_abs_z > 0.0 && cuts.max_displacement > 0.0) {
            return Err(Error::Validation(
                "cuts.max_abs_z and cuts.max_displacement must be > 0".to_string(),
            ));
        }
        if matches!(cuts.max_abs_dz, Some(v) if !(v > 0.0)) {
            return Err(Error::Validation("cuts.max_abs_dz must be > 0".to_string()));
        }

        let t = &self.timing;
        if !(t.half_life > 0.0 && t.far_window_ratio > 0.0) {
            return Err(Error::Validation(
                "timing.half_life and timing.far_window_ratio must be > 0".to_string(),
            ));
        }
        let prompt = t.prompt_window();
        let far = t.far_window();
        prompt.validate("timing prompt window")?;
        far.validate("timing far window")?;
        if prompt.width() <= 0.0 || far.min < prompt.max {
            return Err(Error::Validation(format!(
                "timing windows must be non-empty and disjoint: prompt ({}, {}), far ({}, {})",
                prompt.min, prompt.max, far.min, far.max
            )));
        }

        let b = &self.binning;
        for (what, axis) in [("transverse", b.transverse), ("depth", b.depth)] {
            if axis.n_bins == 0 || !(axis.max > 0.0) {
                return Err(Error::Validation(format!("binning.{what}: empty range")));
            }
        }
        if b.transverse.max <= pitch {
            return Err(Error::Validation(format!(
                "binning.transverse.max ({}) must exceed the segment pitch ({pitch})",
                b.transverse.max
            )));
        }
        if b.max_rank == 0 {
            return Err(Error::Validation("binning.max_rank must be >= 1".to_string()));
        }
        if !(self.fit.window_min < self.fit.window_max) {
            return Err(Error::Validation("fit window is empty".to_string()));
        }
        Ok(())
    }
}
