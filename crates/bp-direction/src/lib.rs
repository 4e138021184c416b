//! # bp-direction
//!
//! Directionality reconstruction for correlated BiPo decay pairs in a
//! segmented detector.
//!
//! An alpha-like anchor and its beta-like companions are selected, their
//! signed displacement is histogrammed per axis for prompt (Correlated) and
//! far (Accidental) coincidences, dead neighbors are accounted for with a
//! synthetic `DataUnbiased` histogram set, backgrounds are subtracted, and
//! the net populations are turned into a mean displacement and an
//! azimuth/polar direction with propagated uncertainties.
//!
//! ```text
//! events ─► Selector ─► SignalAccumulator ─┬─► subtract_backgrounds ─► estimate_directions
//!                         ▲                │
//!                         └─ UnbiasingCorrector (same-segment pairs)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod config;
pub mod estimate;
pub mod event;
pub mod pipeline;
pub mod selection;
pub mod subtract;
pub mod topology;
pub mod unbias;

pub use accumulator::{HistogramRecord, HistogramSet, SignalAccumulator};
pub use config::{AnalysisConfig, BinningConfig, CutConfig, Interval, TimingConfig};
pub use estimate::{
    AsymmetryInputs, DirectionEstimate, asymmetry_displacement, azimuth, polar, polar_remap,
};
pub use event::{Anchor, Companion, EventCandidate, Window};
pub use pipeline::{Analysis, AnalysisResult};
pub use selection::{CutFlow, EventSelection, PairOutcome, RejectReason, Selector};
pub use subtract::{AxisMeasurements, BackgroundSummary, DepthFit, subtract_backgrounds};
pub use topology::{N_SEGMENTS, Neighbor, Topology};
pub use unbias::UnbiasingCorrector;
