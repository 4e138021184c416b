//! Dead-neighbor bias estimate.
//!
//! For every accepted same-segment pair, fill the `DataUnbiased` histograms
//! with what the pair would contribute if the only information were which
//! neighbors of the anchor are live:
//!
//! | +side | −side | fill |
//! |-------|-------|------|
//! | live  | dead  | +pitch |
//! | dead  | live  | −pitch |
//! | live  | live  | 0 |
//! | dead  | dead  | none |
//!
//! X uses Right/Left, Y uses Up/Down. Z gets the true `dz`. Each
//! contribution is one count of the pair's signal class.

use crate::accumulator::SignalAccumulator;
use crate::selection::{PairGeometry, PairOutcome};
use crate::topology::{Neighbor, Topology};
use bp_core::{Axis, DatasetVariant, Error, Result};

/// Fills the `DataUnbiased` histograms from the topology.
#[derive(Debug, Clone, Copy)]
pub struct UnbiasingCorrector<'t> {
    topology: &'t Topology,
    pitch: f64,
}

impl<'t> UnbiasingCorrector<'t> {
    /// Corrector for `topology` with the given segment pitch.
    pub fn new(topology: &'t Topology, pitch: f64) -> Self {
        Self { topology, pitch }
    }

    fn side_value(&self, segment: usize, plus: Neighbor, minus: Neighbor) -> Result<Option<f64>> {
        let p = self.topology.has_live_neighbor(segment, plus)?;
        let m = self.topology.has_live_neighbor(segment, minus)?;
        Ok(match (p, m) {
            (true, false) => Some(self.pitch),
            (false, true) => Some(-self.pitch),
            (true, true) => Some(0.0),
            (false, false) => None,
        })
    }

    /// Synthetic X and Y fill values for an anchor in `segment`.
    ///
    /// Errors if `segment` sits in the first or last column: such anchors are
    /// outside the fiducial volume and must never reach this point.
    pub fn transverse_values(&self, segment: usize) -> Result<(Option<f64>, Option<f64>)> {
        let x = self.side_value(segment, Neighbor::Right, Neighbor::Left)?;
        let y = self.side_value(segment, Neighbor::Up, Neighbor::Down)?;
        Ok((x, y))
    }

    /// Add the synthetic contribution of one accepted same-segment pair.
    pub fn contribute(
        &self,
        acc: &mut SignalAccumulator,
        anchor_segment: usize,
        pair: &PairOutcome,
    ) -> Result<()> {
        let (Some(signal), Some(d)) = (pair.signal(), pair.displacement) else {
            return Ok(());
        };
        if pair.geometry != PairGeometry::SameSegment {
            return Err(Error::Validation(format!(
                "unbiasing only applies to same-segment pairs, got {:?}",
                pair.geometry
            )));
        }

        let ds = DatasetVariant::DataUnbiased;
        let (x, y) = self.transverse_values(anchor_segment)?;
        if let Some(x) = x {
            acc.fill(ds, signal, Axis::X, x)?;
        }
        if let Some(y) = y {
            acc.fill(ds, signal, Axis::Y, y)?;
        }
        acc.fill(ds, signal, Axis::Z, d.dz)?;
        acc.fill_multiplicity(ds, signal, pair.rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinningConfig;
    use crate::event::Window;
    use crate::selection::{Classification, Displacement};
    use bp_core::SignalClass;

    const PITCH: f64 = 145.7;

    fn same_segment(signal: SignalClass, dz: f64) -> PairOutcome {
        PairOutcome {
            window: Window::Prompt,
            index: 1,
            classification: Classification::Accepted(signal),
            displacement: Some(Displacement { dx: 0.0, dy: 0.0, dz }),
            geometry: PairGeometry::SameSegment,
        }
    }

    #[test]
    fn fully_live_neighborhood_fills_center() {
        let topo = Topology::fully_live();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        assert_eq!(c.transverse_values(50).unwrap(), (Some(0.0), Some(0.0)));
    }

    #[test]
    fn one_dead_side_points_away_from_it() {
        // 50: right = 51, left = 49, up = 64, down = 36
        let topo = Topology::new(&[49, 64]).unwrap();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        assert_eq!(c.transverse_values(50).unwrap(), (Some(PITCH), Some(-PITCH)));

        let topo = Topology::new(&[36, 49, 51, 64]).unwrap();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        assert_eq!(c.transverse_values(50).unwrap(), (None, None));
    }

    #[test]
    fn bottom_row_counts_missing_neighbor_as_dead() {
        let topo = Topology::fully_live();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        assert_eq!(c.transverse_values(5).unwrap(), (Some(0.0), Some(PITCH)));
    }

    #[test]
    fn edge_column_anchor_is_an_error() {
        let topo = Topology::fully_live();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        assert!(c.transverse_values(28).is_err());
    }

    #[test]
    fn contribute_counts_in_source_class() {
        let topo = Topology::new(&[51]).unwrap();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        let mut acc = SignalAccumulator::new(&BinningConfig::default(), 1.0 / 12.0).unwrap();
        c.contribute(&mut acc, 50, &same_segment(SignalClass::Accidental, 7.0)).unwrap();

        let h = &acc.histograms;
        let ds = DatasetVariant::DataUnbiased;
        let s = SignalClass::Accidental;
        assert_eq!(h.hist(ds, s, Axis::X).bin_content(4), 1.0);
        assert_eq!(h.hist(ds, s, Axis::Y).bin_content(150), 1.0);
        assert_eq!(h.hist(ds, s, Axis::Z).mean(), 7.0);
        assert_eq!(h.multiplicity(ds, s).bin_content(1), 1.0);
        assert_eq!(h.weight(s), 1.0 / 12.0);
        // Data histograms untouched.
        assert_eq!(h.hist(DatasetVariant::Data, s, Axis::X).entries, 0.0);
    }

    #[test]
    fn contribute_rejects_neighbor_pairs() {
        let topo = Topology::fully_live();
        let c = UnbiasingCorrector::new(&topo, PITCH);
        let mut acc = SignalAccumulator::new(&BinningConfig::default(), 1.0 / 12.0).unwrap();
        let mut pair = same_segment(SignalClass::Correlated, 0.0);
        pair.geometry = PairGeometry::AdjacentColumn;
        assert!(c.contribute(&mut acc, 50, &pair).is_err());
    }
}
