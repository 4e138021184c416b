//! Histogram accumulation.
//!
//! [`HistogramSet`] holds one displacement histogram per
//! (dataset, signal, axis) and one companion-rank histogram per
//! (dataset, signal). [`SignalAccumulator`] routes accepted pairs into the
//! `Data` histograms. Filled histograms hold unit counts; the Accidental
//! deadtime weight is kept alongside and applied when the net histograms are
//! derived. Unit fills are exact, so shards can be filled independently and
//! combined with [`Merge`] into the same bits as a single sequential pass.

use crate::config::BinningConfig;
use crate::selection::{CutFlow, PairGeometry, PairOutcome};
use bp_core::{Axis, DatasetVariant, Error, HistKey, Merge, Result, SignalClass};
use bp_hist::Histogram;
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;

/// All histograms of one analysis.
///
/// Every key is populated at construction; `TotalDifference` entries stay
/// empty until background subtraction derives them.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSet {
    accidental_weight: f64,
    displacement: BTreeMap<HistKey, Histogram>,
    multiplicity: BTreeMap<(DatasetVariant, SignalClass), Histogram>,
}

/// Flat view of one histogram for persistence.
#[derive(Debug, serde::Serialize)]
pub struct HistogramRecord<'a> {
    /// Dataset variant
    pub dataset: DatasetVariant,
    /// Signal class
    pub signal: SignalClass,
    /// Displacement axis; `None` for the multiplicity histogram
    pub axis: Option<Axis>,
    /// Scale that turns the stored contents into rate-matched contents
    pub weight: f64,
    /// The histogram
    pub histogram: &'a Histogram,
}

impl HistogramSet {
    /// Empty set with the given binning and Accidental deadtime weight.
    pub fn new(binning: &BinningConfig, accidental_weight: f64) -> Result<Self> {
        let mut displacement = BTreeMap::new();
        for key in HistKey::all() {
            let b = if key.axis.is_transverse() { binning.transverse } else { binning.depth };
            let h = Histogram::new(key.name(), key.dataset.name(), b.n_bins, -b.max, b.max)?;
            displacement.insert(key, h);
        }

        let mut multiplicity = BTreeMap::new();
        let top = binning.max_rank as f64 + 0.5;
        for dataset in DatasetVariant::ALL {
            for signal in SignalClass::ALL {
                let name = format!("{dataset} {signal} Multiplicity");
                let h = Histogram::new(name, dataset.name(), binning.max_rank, 0.5, top)?;
                multiplicity.insert((dataset, signal), h);
            }
        }
        Ok(Self { accidental_weight, displacement, multiplicity })
    }

    /// Displacement histogram for `key`.
    pub fn get(&self, key: HistKey) -> &Histogram {
        &self.displacement[&key]
    }

    /// Displacement histogram for (dataset, signal, axis).
    pub fn hist(&self, dataset: DatasetVariant, signal: SignalClass, axis: Axis) -> &Histogram {
        self.get(HistKey::new(dataset, signal, axis))
    }

    /// Multiplicity histogram for (dataset, signal).
    pub fn multiplicity(&self, dataset: DatasetVariant, signal: SignalClass) -> &Histogram {
        &self.multiplicity[&(dataset, signal)]
    }

    /// Scale applied to the stored `signal` contents when deriving net
    /// histograms: the deadtime weight for Accidental, 1 otherwise.
    pub fn weight(&self, signal: SignalClass) -> f64 {
        match signal {
            SignalClass::Accidental => self.accidental_weight,
            _ => 1.0,
        }
    }

    fn check_filled_class(signal: SignalClass) -> Result<()> {
        if !SignalClass::FILLED.contains(&signal) {
            return Err(Error::Validation(format!(
                "{signal} histograms are derived and cannot be filled"
            )));
        }
        Ok(())
    }

    /// Count `value` in the (dataset, signal, axis) histogram.
    pub fn fill(
        &mut self,
        dataset: DatasetVariant,
        signal: SignalClass,
        axis: Axis,
        value: f64,
    ) -> Result<()> {
        Self::check_filled_class(signal)?;
        if let Some(h) = self.displacement.get_mut(&HistKey::new(dataset, signal, axis)) {
            h.fill(value);
        }
        Ok(())
    }

    /// Count a companion's 1-based `rank` in the (dataset, signal)
    /// multiplicity histogram.
    pub fn fill_multiplicity(
        &mut self,
        dataset: DatasetVariant,
        signal: SignalClass,
        rank: usize,
    ) -> Result<()> {
        Self::check_filled_class(signal)?;
        if let Some(h) = self.multiplicity.get_mut(&(dataset, signal)) {
            h.fill(rank as f64);
        }
        Ok(())
    }

    /// Replace the derived `TotalDifference` histograms of `dataset`.
    pub(crate) fn set_total_difference(
        &mut self,
        dataset: DatasetVariant,
        axes: BTreeMap<Axis, Histogram>,
        multiplicity: Histogram,
    ) {
        for (axis, h) in axes {
            self.displacement.insert(HistKey::new(dataset, SignalClass::TotalDifference, axis), h);
        }
        self.multiplicity.insert((dataset, SignalClass::TotalDifference), multiplicity);
    }

    /// Every histogram, displacement histograms first, in key order.
    pub fn records(&self) -> Vec<HistogramRecord<'_>> {
        let disp = self.displacement.iter().map(|(k, h)| HistogramRecord {
            dataset: k.dataset,
            signal: k.signal,
            axis: Some(k.axis),
            weight: self.weight(k.signal),
            histogram: h,
        });
        let mult = self.multiplicity.iter().map(|(&(dataset, signal), h)| HistogramRecord {
            dataset,
            signal,
            axis: None,
            weight: self.weight(signal),
            histogram: h,
        });
        disp.chain(mult).collect()
    }
}

impl Serialize for HistogramSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.records())
    }
}

impl Merge for HistogramSet {
    fn merge(&mut self, other: &Self) -> Result<()> {
        if self.accidental_weight != other.accidental_weight {
            return Err(Error::Validation(format!(
                "cannot merge histogram sets with accidental weights {} and {}",
                self.accidental_weight, other.accidental_weight
            )));
        }
        for (key, h) in &other.displacement {
            match self.displacement.get_mut(key) {
                Some(dst) => dst.merge(h)?,
                None => {
                    self.displacement.insert(*key, h.clone());
                }
            }
        }
        for (key, h) in &other.multiplicity {
            match self.multiplicity.get_mut(key) {
                Some(dst) => dst.merge(h)?,
                None => {
                    self.multiplicity.insert(*key, h.clone());
                }
            }
        }
        Ok(())
    }
}

/// Per-shard accumulation state: histograms plus selection counters.
#[derive(Debug, Clone)]
pub struct SignalAccumulator {
    /// Histograms
    pub histograms: HistogramSet,
    /// Selection counters
    pub cutflow: CutFlow,
}

impl SignalAccumulator {
    /// Empty accumulator.
    pub fn new(binning: &BinningConfig, accidental_weight: f64) -> Result<Self> {
        Ok(Self {
            histograms: HistogramSet::new(binning, accidental_weight)?,
            cutflow: CutFlow::default(),
        })
    }

    /// Count `value` in the (dataset, signal, axis) histogram.
    pub fn fill(
        &mut self,
        dataset: DatasetVariant,
        signal: SignalClass,
        axis: Axis,
        value: f64,
    ) -> Result<()> {
        self.histograms.fill(dataset, signal, axis, value)
    }

    /// Record a companion rank.
    pub fn fill_multiplicity(
        &mut self,
        dataset: DatasetVariant,
        signal: SignalClass,
        rank: usize,
    ) -> Result<()> {
        self.histograms.fill_multiplicity(dataset, signal, rank)
    }

    /// Fill the `Data` histograms for one pair. Rejected pairs are ignored.
    ///
    /// Same-segment pairs put 0 into X and Y and `dz` into Z; column
    /// neighbors put `dx` into X only; row neighbors put `dy` into Y only.
    pub fn accumulate_pair(&mut self, pair: &PairOutcome) -> Result<()> {
        let (Some(signal), Some(d)) = (pair.signal(), pair.displacement) else {
            return Ok(());
        };
        let data = DatasetVariant::Data;
        match pair.geometry {
            PairGeometry::SameSegment => {
                self.fill(data, signal, Axis::X, 0.0)?;
                self.fill(data, signal, Axis::Y, 0.0)?;
                self.fill(data, signal, Axis::Z, d.dz)?;
            }
            PairGeometry::AdjacentColumn => self.fill(data, signal, Axis::X, d.dx)?,
            PairGeometry::AdjacentRow => self.fill(data, signal, Axis::Y, d.dy)?,
            PairGeometry::Other => {}
        }
        self.fill_multiplicity(data, signal, pair.rank())
    }
}

impl Merge for SignalAccumulator {
    fn merge(&mut self, other: &Self) -> Result<()> {
        self.histograms.merge(&other.histograms)?;
        self.cutflow.merge(&other.cutflow)
    }
}
