//! Detector topology: which of the 154 segments are live.
//!
//! Segments are numbered row-major on a 14-column × 11-row grid, so
//! `row = index / 14` and `column = index % 14`. The model is built once
//! from the exclude list and is immutable afterwards.
//!
//! Edge policy for [`Topology::has_live_neighbor`]:
//! - an index outside `[0, 154)` is an error;
//! - `Right`/`Left` from the last/first column would wrap into another row
//!   and is an error;
//! - `Up`/`Down` off the top/bottom row answers "not live".

use bp_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Segments per grid row.
pub const N_COLUMNS: usize = 14;
/// Grid rows.
pub const N_ROWS: usize = 11;
/// Total number of segments.
pub const N_SEGMENTS: usize = N_COLUMNS * N_ROWS;

/// Grid column of `segment`.
#[inline]
pub fn column(segment: usize) -> usize {
    segment % N_COLUMNS
}

/// Grid row of `segment`.
#[inline]
pub fn row(segment: usize) -> usize {
    segment / N_COLUMNS
}

/// Neighbor direction on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Neighbor {
    /// +1 in index (+X)
    Right,
    /// −1 in index (−X)
    Left,
    /// +14 in index (+Y)
    Up,
    /// −14 in index (−Y)
    Down,
}

/// Live/excluded map of the segment grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    live: Vec<bool>,
    excluded: Vec<usize>,
}

impl Topology {
    /// Build from a strictly ascending list of excluded indices in `[0, 154)`.
    pub fn new(excluded: &[usize]) -> Result<Self> {
        if let Some(&bad) = excluded.iter().find(|&&s| s >= N_SEGMENTS) {
            return Err(Error::Topology(format!(
                "excluded segment {bad} outside [0, {N_SEGMENTS})"
            )));
        }
        if let Some(w) = excluded.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::Topology(format!(
                "exclude list must be strictly ascending ({} then {})",
                w[0], w[1]
            )));
        }

        let mut live = vec![true; N_SEGMENTS];
        for &s in excluded {
            live[s] = false;
        }

        tracing::debug!(live = N_SEGMENTS - excluded.len(), excluded = excluded.len(), "topology");
        Ok(Self { live, excluded: excluded.to_vec() })
    }

    /// Every segment live.
    pub fn fully_live() -> Self {
        Self { live: vec![true; N_SEGMENTS], excluded: Vec::new() }
    }

    /// Excluded indices, ascending.
    pub fn excluded(&self) -> &[usize] {
        &self.excluded
    }

    /// Number of live segments.
    pub fn live_count(&self) -> usize {
        N_SEGMENTS - self.excluded.len()
    }

    /// Whether `segment` is live. Indices outside the grid are not live.
    #[inline]
    pub fn is_live(&self, segment: usize) -> bool {
        self.live.get(segment).copied().unwrap_or(false)
    }

    /// Index of the neighbor in `direction`, `None` off the top/bottom edge.
    pub fn neighbor(&self, segment: usize, direction: Neighbor) -> Result<Option<usize>> {
        if segment >= N_SEGMENTS {
            return Err(Error::Topology(format!(
                "segment {segment} outside [0, {N_SEGMENTS})"
            )));
        }
        let col = column(segment);
        match direction {
            Neighbor::Right if col + 1 == N_COLUMNS => Err(Error::Topology(format!(
                "segment {segment} is in the last column; Right would wrap rows"
            ))),
            Neighbor::Left if col == 0 => Err(Error::Topology(format!(
                "segment {segment} is in the first column; Left would wrap rows"
            ))),
            Neighbor::Right => Ok(Some(segment + 1)),
            Neighbor::Left => Ok(Some(segment - 1)),
            Neighbor::Up => Ok(Some(segment + N_COLUMNS).filter(|&s| s < N_SEGMENTS)),
            Neighbor::Down => Ok(segment.checked_sub(N_COLUMNS)),
        }
    }

    /// Whether the neighbor of `segment` in `direction` exists and is live.
    pub fn has_live_neighbor(&self, segment: usize, direction: Neighbor) -> Result<bool> {
        Ok(self.neighbor(segment, direction)?.is_some_and(|n| self.is_live(n)))
    }

    /// Grid picture, top row first: `■` live, `□` excluded.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(N_SEGMENTS * 5);
        for r in (0..N_ROWS).rev() {
            let cells: Vec<&str> = (0..N_COLUMNS)
                .map(|c| if self.live[r * N_COLUMNS + c] { "■" } else { "□" })
                .collect();
            out.push_str(&cells.join(" "));
            out.push('\n');
        }
        out
    }
}
