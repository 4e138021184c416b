//! Core traits.
//!
//! Accumulation state is sharded across workers and recombined with
//! [`Merge`]. Implementations must be associative and commutative so the
//! merged state does not depend on how the event stream was split.

use crate::Result;

/// Bin-wise (or counter-wise) combination of two independently filled states.
pub trait Merge {
    /// Fold `other` into `self`.
    ///
    /// Fails if the two states are structurally incompatible
    /// (e.g. histograms with different binning).
    fn merge(&mut self, other: &Self) -> Result<()>;
}
