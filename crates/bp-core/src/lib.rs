//! # bp-core
//!
//! Shared vocabulary for the BiPo directionality analysis: the error type,
//! the enumerations that key every histogram (dataset variant, signal class,
//! axis), scalar measurements with an explicit validity flag, and the
//! [`Merge`] trait used to combine independently accumulated shards.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::Merge;
pub use types::{
    Axis, DatasetVariant, EstimateStatus, FitResult, HistKey, Measurement, SignalClass,
};
