//! # bp-hist
//!
//! Fixed-width, weighted 1-D histograms with per-bin sum of squared weights,
//! under/overflow tracking and fill-time moments. Histograms combine
//! linearly via [`Histogram::add_scaled`], which is what background
//! subtraction and shard merging are built on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod histogram;

pub use histogram::{FixedSum, Histogram, Moments};
