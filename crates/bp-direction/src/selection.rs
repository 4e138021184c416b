//! Event selection.
//!
//! Pure classification of (anchor, companion) pairs into the Correlated or
//! Accidental population. Cuts are applied in a fixed order and the first
//! failing cut is reported, which is what the [`CutFlow`] counts.
//!
//! Time lag convention: prompt companions use `anchor − companion`, far
//! companions use `companion − anchor`, each tested against its own open
//! window. A companion is only ever tested against the window it was
//! collected in.

use crate::config::{AnalysisConfig, CutConfig, Interval};
use crate::event::{Anchor, Companion, EventCandidate, Window};
use crate::topology::{N_COLUMNS, N_ROWS, column, row};
use bp_core::{Merge, Result, SignalClass};
use serde::Serialize;
use std::collections::BTreeMap;

/// Fiducial volume: the top row, the first and last column, and a list of
/// additionally flagged segments are excluded.
#[derive(Debug, Clone)]
pub struct FiducialPolicy {
    extra: Vec<usize>,
}

impl FiducialPolicy {
    /// Policy with extra excluded segments.
    pub fn new(extra_excluded: &[usize]) -> Self {
        Self { extra: extra_excluded.to_vec() }
    }

    /// Whether `segment` lies outside the fiducial volume.
    pub fn is_excluded(&self, segment: usize) -> bool {
        let col = column(segment);
        row(segment) + 1 >= N_ROWS
            || col == 0
            || col + 1 == N_COLUMNS
            || self.extra.contains(&segment)
    }
}

/// First cut a signal or pair failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Anchor segment outside the fiducial volume
    AnchorFiducial,
    /// |anchor z| too large
    AnchorDepth,
    /// Anchor energy outside window
    AnchorEnergy,
    /// Anchor PSD outside window
    AnchorPsd,
    /// Companion segment outside the fiducial volume
    CompanionFiducial,
    /// |companion z| too large
    CompanionDepth,
    /// Companion energy outside window
    CompanionEnergy,
    /// Companion PSD outside window
    CompanionPsd,
    /// Cluster multiplicity fields disagree
    MultiplicityMismatch,
    /// |dz| above the optional pre-cut
    DepthDifference,
    /// Anchor–companion distance too large
    Displacement,
    /// Time lag outside the window
    TimeWindow,
}

/// Anchor minus companion position (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Displacement {
    /// `pitch · (anchor column − companion column)`
    pub dx: f64,
    /// `pitch · (anchor row − companion row)`
    pub dy: f64,
    /// `anchor z − companion z`
    pub dz: f64,
}

impl Displacement {
    /// Euclidean length.
    pub fn magnitude(&self) -> f64 {
        (self.dx * self.dx + self.dy * self.dy + self.dz * self.dz).sqrt()
    }
}

/// Relative placement of the two segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairGeometry {
    /// Same segment
    SameSegment,
    /// Same row, neighboring columns
    AdjacentColumn,
    /// Same column, neighboring rows
    AdjacentRow,
    /// Anything else (diagonal or further)
    Other,
}

impl PairGeometry {
    /// Classify two segment indices.
    pub fn of(anchor: usize, companion: usize) -> Self {
        let same_row = row(anchor) == row(companion);
        let same_col = column(anchor) == column(companion);
        if anchor == companion {
            PairGeometry::SameSegment
        } else if same_row && column(anchor).abs_diff(column(companion)) == 1 {
            PairGeometry::AdjacentColumn
        } else if same_col && row(anchor).abs_diff(row(companion)) == 1 {
            PairGeometry::AdjacentRow
        } else {
            PairGeometry::Other
        }
    }
}

/// Classification of one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Accepted into the given population (`Correlated` or `Accidental`).
    Accepted(SignalClass),
    /// Dropped at the given cut.
    Rejected(RejectReason),
}

/// Outcome for one (anchor, companion) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairOutcome {
    /// Window the companion came from
    pub window: Window,
    /// Index of the companion within its window's list
    pub index: usize,
    /// Result of the cuts
    pub classification: Classification,
    /// Displacement, once the companion passed its single-signal cuts
    pub displacement: Option<Displacement>,
    /// Segment relation
    pub geometry: PairGeometry,
}

impl PairOutcome {
    /// 1-based rank of the companion in its list.
    pub fn rank(&self) -> usize {
        self.index + 1
    }

    /// Accepted population, if any.
    pub fn signal(&self) -> Option<SignalClass> {
        match self.classification {
            Classification::Accepted(s) => Some(s),
            Classification::Rejected(_) => None,
        }
    }
}

/// Selection result for one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSelection {
    /// The anchor failed a cut; companions were not examined.
    AnchorRejected(RejectReason),
    /// Per-companion outcomes, prompt list first.
    Pairs(Vec<PairOutcome>),
}

/// Applies the selection cuts.
#[derive(Debug, Clone)]
pub struct Selector {
    fiducial: FiducialPolicy,
    cuts: CutConfig,
    pitch: f64,
    prompt_window: Interval,
    far_window: Interval,
}

impl Selector {
    /// Build from a (validated) configuration.
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            fiducial: FiducialPolicy::new(&config.fiducial.extra_excluded),
            cuts: config.cuts.clone(),
            pitch: config.geometry.segment_pitch,
            prompt_window: config.timing.prompt_window(),
            far_window: config.timing.far_window(),
        }
    }

    /// Fiducial policy in use.
    pub fn fiducial(&self) -> &FiducialPolicy {
        &self.fiducial
    }

    /// Anchor cuts: fiducial, |z|, energy, PSD.
    pub fn check_anchor(&self, anchor: &Anchor) -> std::result::Result<(), RejectReason> {
        if self.fiducial.is_excluded(anchor.segment) {
            return Err(RejectReason::AnchorFiducial);
        }
        if !(anchor.z.abs() <= self.cuts.max_abs_z) {
            return Err(RejectReason::AnchorDepth);
        }
        if !self.cuts.anchor_energy.contains(anchor.energy) {
            return Err(RejectReason::AnchorEnergy);
        }
        if !self.cuts.anchor_psd.contains(anchor.psd) {
            return Err(RejectReason::AnchorPsd);
        }
        Ok(())
    }

    fn check_companion(&self, companion: &Companion) -> std::result::Result<(), RejectReason> {
        if self.fiducial.is_excluded(companion.segment) {
            return Err(RejectReason::CompanionFiducial);
        }
        if !(companion.z.abs() <= self.cuts.max_abs_z) {
            return Err(RejectReason::CompanionDepth);
        }
        if !self.cuts.companion_energy.contains(companion.energy) {
            return Err(RejectReason::CompanionEnergy);
        }
        if !self.cuts.companion_psd.contains(companion.psd) {
            return Err(RejectReason::CompanionPsd);
        }
        if companion.mult_clust != companion.mult_clust_ioni {
            return Err(RejectReason::MultiplicityMismatch);
        }
        Ok(())
    }

    /// Displacement of `companion` relative to `anchor`.
    pub fn displacement(&self, anchor: &Anchor, companion: &Companion) -> Displacement {
        let dcol = column(anchor.segment) as f64 - column(companion.segment) as f64;
        let drow = row(anchor.segment) as f64 - row(companion.segment) as f64;
        Displacement { dx: self.pitch * dcol, dy: self.pitch * drow, dz: anchor.z - companion.z }
    }

    /// Classify one pair. Assumes the anchor already passed [`Self::check_anchor`].
    pub fn classify_pair(
        &self,
        anchor: &Anchor,
        window: Window,
        index: usize,
        companion: &Companion,
    ) -> PairOutcome {
        let geometry = PairGeometry::of(anchor.segment, companion.segment);
        let rejected = |reason, displacement| PairOutcome {
            window,
            index,
            classification: Classification::Rejected(reason),
            displacement,
            geometry,
        };

        if let Err(reason) = self.check_companion(companion) {
            return rejected(reason, None);
        }

        let d = self.displacement(anchor, companion);
        if let Some(max_dz) = self.cuts.max_abs_dz
            && d.dz.abs() > max_dz
        {
            return rejected(RejectReason::DepthDifference, Some(d));
        }
        if d.magnitude() > self.cuts.max_displacement {
            return rejected(RejectReason::Displacement, Some(d));
        }

        let (lag, interval, signal) = match window {
            Window::Prompt => {
                (anchor.time - companion.time, self.prompt_window, SignalClass::Correlated)
            }
            Window::Far => (companion.time - anchor.time, self.far_window, SignalClass::Accidental),
        };
        if !interval.contains_open(lag) {
            return rejected(RejectReason::TimeWindow, Some(d));
        }

        PairOutcome {
            window,
            index,
            classification: Classification::Accepted(signal),
            displacement: Some(d),
            geometry,
        }
    }

    /// Classify every companion of `event`.
    pub fn select(&self, event: &EventCandidate) -> EventSelection {
        if let Err(reason) = self.check_anchor(&event.anchor) {
            return EventSelection::AnchorRejected(reason);
        }
        EventSelection::Pairs(
            event
                .iter_companions()
                .map(|(window, index, c)| self.classify_pair(&event.anchor, window, index, c))
                .collect(),
        )
    }
}

/// Selection counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CutFlow {
    /// Events seen
    pub events: u64,
    /// Events whose anchor passed
    pub anchors_accepted: u64,
    /// Anchor rejections by first failing cut
    pub anchor_rejections: BTreeMap<RejectReason, u64>,
    /// Pair rejections by first failing cut
    pub pair_rejections: BTreeMap<RejectReason, u64>,
    /// Accepted Correlated pairs
    pub correlated: u64,
    /// Accepted Accidental pairs
    pub accidental: u64,
}

impl CutFlow {
    /// Count one event's selection.
    pub fn record(&mut self, selection: &EventSelection) {
        self.events += 1;
        match selection {
            EventSelection::AnchorRejected(reason) => {
                *self.anchor_rejections.entry(*reason).or_default() += 1;
            }
            EventSelection::Pairs(pairs) => {
                self.anchors_accepted += 1;
                for pair in pairs {
                    match pair.classification {
                        Classification::Accepted(SignalClass::Correlated) => self.correlated += 1,
                        Classification::Accepted(_) => self.accidental += 1,
                        Classification::Rejected(reason) => {
                            *self.pair_rejections.entry(reason).or_default() += 1;
                        }
                    }
                }
            }
        }
    }
}

impl Merge for CutFlow {
    fn merge(&mut self, other: &Self) -> Result<()> {
        self.events += other.events;
        self.anchors_accepted += other.anchors_accepted;
        for (reason, n) in &other.anchor_rejections {
            *self.anchor_rejections.entry(*reason).or_default() += n;
        }
        for (reason, n) in &other.pair_rejections {
            *self.pair_rejections.entry(*reason).or_default() += n;
        }
        self.correlated += other.correlated;
        self.accidental += other.accidental;
        Ok(())
    }
}
