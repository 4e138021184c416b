//! End-to-end analysis.
//!
//! [`Analysis`] owns the validated configuration, the detector topology and
//! the selector. Events are folded into a [`SignalAccumulator`], either
//! sequentially with [`Analysis::accumulate`] or sharded across the rayon
//! pool with [`Analysis::accumulate_parallel`]; [`Analysis::finish`] then
//! derives the net histograms and the direction estimates.

use crate::accumulator::{HistogramSet, SignalAccumulator};
use crate::config::AnalysisConfig;
use crate::estimate::{AsymmetryInputs, DirectionEstimate, estimate_directions};
use crate::event::EventCandidate;
use crate::selection::{CutFlow, EventSelection, PairGeometry, Selector};
use crate::subtract::{DepthFit, subtract_backgrounds};
use crate::topology::Topology;
use crate::unbias::UnbiasingCorrector;
use bp_core::{Axis, DatasetVariant, Error, Merge, Result};
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Output of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    /// Excluded segments of the topology used
    pub excluded_segments: Vec<usize>,
    /// Displacements and angles per dataset
    pub directions: BTreeMap<DatasetVariant, DirectionEstimate>,
    /// Asymmetry inputs per transverse axis
    pub asymmetry: BTreeMap<Axis, AsymmetryInputs>,
    /// Depth-axis fits per dataset
    pub depth_fits: BTreeMap<DatasetVariant, DepthFit>,
    /// Selection counters
    pub cutflow: CutFlow,
    /// Finished histograms, written separately when persisted
    #[serde(skip)]
    pub histograms: HistogramSet,
}

/// A configured analysis.
#[derive(Debug, Clone)]
pub struct Analysis {
    config: AnalysisConfig,
    topology: Topology,
    selector: Selector,
}

impl Analysis {
    /// Analysis with an explicit topology. `config.excluded_segments` is ignored.
    pub fn new(config: AnalysisConfig, topology: Topology) -> Result<Self> {
        config.validate()?;
        let selector = Selector::new(&config);
        Ok(Self { config, topology, selector })
    }

    /// Analysis whose topology is built from `config.excluded_segments`.
    pub fn from_config(config: AnalysisConfig) -> Result<Self> {
        let topology = Topology::new(&config.excluded_segments)?;
        Self::new(config, topology)
    }

    /// Configuration in use.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Detector topology in use.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Empty accumulator matching this analysis.
    pub fn accumulator(&self) -> Result<SignalAccumulator> {
        SignalAccumulator::new(&self.config.binning, self.config.timing.accidental_weight())
    }

    /// Select one event and fold it into `acc`.
    pub fn process(&self, acc: &mut SignalAccumulator, event: &EventCandidate) -> Result<()> {
        let selection = self.selector.select(event);
        acc.cutflow.record(&selection);
        let EventSelection::Pairs(pairs) = &selection else {
            return Ok(());
        };

        let segment = event.anchor.segment;
        if self.selector.fiducial().is_excluded(segment) {
            return Err(Error::Computation(format!(
                "anchor in segment {segment} passed selection outside the fiducial volume"
            )));
        }
        let corrector = UnbiasingCorrector::new(&self.topology, self.config.geometry.segment_pitch);
        for pair in pairs {
            acc.accumulate_pair(pair)?;
            if pair.geometry == PairGeometry::SameSegment {
                corrector.contribute(acc, segment, pair)?;
            }
        }
        Ok(())
    }

    /// Fold `events` in order into a fresh accumulator.
    pub fn accumulate<I>(&self, events: I) -> Result<SignalAccumulator>
    where
        I: IntoIterator,
        I::Item: Borrow<EventCandidate>,
    {
        let mut acc = self.accumulator()?;
        for event in events {
            self.process(&mut acc, event.borrow())?;
        }
        tracing::debug!(events = acc.cutflow.events, "accumulated");
        Ok(acc)
    }

    /// Same as [`Self::accumulate`], sharded over the current rayon pool.
    ///
    /// Shards are merged bin by bin. Filled histograms hold exact counts and
    /// fixed-point moments, so the result is bit-identical to the sequential
    /// path for any shard layout.
    pub fn accumulate_parallel(&self, events: &[EventCandidate]) -> Result<SignalAccumulator> {
        use rayon::prelude::*;

        let template = self.accumulator()?;
        let acc = events
            .par_iter()
            .try_fold(
                || template.clone(),
                |mut acc, event| {
                    self.process(&mut acc, event)?;
                    Ok::<_, Error>(acc)
                },
            )
            .try_reduce(
                || template.clone(),
                |mut a, b| {
                    a.merge(&b)?;
                    Ok(a)
                },
            )?;
        tracing::debug!(
            events = acc.cutflow.events,
            threads = rayon::current_num_threads(),
            "accumulated in parallel"
        );
        Ok(acc)
    }

    /// Subtract backgrounds and estimate directions from a filled accumulator.
    pub fn finish(&self, acc: SignalAccumulator) -> Result<AnalysisResult> {
        let SignalAccumulator { mut histograms, cutflow, .. } = acc;
        log_cutflow(&cutflow);

        let pitch = self.config.geometry.segment_pitch;
        let background = subtract_backgrounds(&mut histograms, pitch, &self.config.fit)?;
        let summary = estimate_directions(&histograms, &background, pitch)?;

        Ok(AnalysisResult {
            excluded_segments: self.topology.excluded().to_vec(),
            directions: summary.directions,
            asymmetry: summary.asymmetry,
            depth_fits: background.depth_fits,
            cutflow,
            histograms,
        })
    }

    /// [`Self::accumulate`] followed by [`Self::finish`].
    pub fn run<I>(&self, events: I) -> Result<AnalysisResult>
    where
        I: IntoIterator,
        I::Item: Borrow<EventCandidate>,
    {
        let acc = self.accumulate(events)?;
        self.finish(acc)
    }
}

fn log_cutflow(cf: &CutFlow) {
    tracing::info!(
        events = cf.events,
        anchors = cf.anchors_accepted,
        correlated = cf.correlated,
        accidental = cf.accidental,
        "cut flow"
    );
    for (reason, n) in &cf.anchor_rejections {
        tracing::debug!(reason = ?reason, n, "anchor rejected");
    }
    for (reason, n) in &cf.pair_rejections {
        tracing::debug!(reason = ?reason, n, "pair rejected");
    }
}
