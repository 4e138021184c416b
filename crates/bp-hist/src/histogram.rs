//! Fixed-width weighted histogram.

use bp_core::{Error, Merge, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fixed-point sum with [`FixedSum::FRAC_BITS`] fractional bits.
///
/// Terms are rounded onto the fixed grid once and then added as integers, so
/// the sum does not depend on the order of the terms. Serialized as `f64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedSum(i128);

impl FixedSum {
    /// Fractional bits of the fixed-point representation.
    pub const FRAC_BITS: u32 = 40;
    const SCALE: f64 = (1u64 << Self::FRAC_BITS) as f64;

    /// Nearest grid value to `x`.
    pub fn from_f64(x: f64) -> Self {
        Self((x * Self::SCALE).round() as i128)
    }

    /// Value as `f64`.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE
    }

    fn add(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }

    fn scaled(self, c: f64) -> Self {
        if c == 1.0 {
            self
        } else if c == -1.0 {
            Self(self.0.saturating_neg())
        } else {
            Self((self.0 as f64 * c).round() as i128)
        }
    }
}

impl Serialize for FixedSum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for FixedSum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Self::from_f64)
    }
}

/// Fill-time statistics over in-range entries.
///
/// Mean and standard deviation are computed from these rather than from bin
/// centers, so they keep the full resolution of the filled values. With unit
/// weights every field is exact, and merging shards gives the same bits as
/// filling in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// Σw
    pub sumw: f64,
    /// Σw²
    pub sumw2: f64,
    /// Σw·x
    pub sumwx: FixedSum,
    /// Σw·x²
    pub sumwx2: FixedSum,
}

impl Moments {
    fn record(&mut self, x: f64, w: f64) {
        self.sumw += w;
        self.sumw2 += w * w;
        self.sumwx.add(FixedSum::from_f64(w * x));
        self.sumwx2.add(FixedSum::from_f64(w * x * x));
    }

    fn add_scaled(&mut self, other: &Moments, c: f64) {
        self.sumw += c * other.sumw;
        self.sumw2 += c * c * other.sumw2;
        self.sumwx.add(other.sumwx.scaled(c));
        self.sumwx2.add(other.sumwx2.scaled(c));
    }
}

/// A 1D histogram with uniform bin width.
///
/// Bins are addressed 0-based; values below `x_min` or at/above `x_max` are
/// recorded in `underflow`/`overflow` and do not contribute to the moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    pub title: String,
    /// Number of bins (excluding under/overflow).
    pub n_bins: usize,
    /// Lower edge of first bin.
    pub x_min: f64,
    /// Upper edge of last bin.
    pub x_max: f64,
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    pub underflow: f64,
    /// Overflow sum of weights.
    pub overflow: f64,
    /// Underflow sum of weights squared.
    pub underflow_sumw2: f64,
    /// Overflow sum of weights squared.
    pub overflow_sumw2: f64,
    /// Number of fills, flows included. Added (not scaled) by `add_scaled`.
    pub entries: f64,
    /// In-range fill statistics.
    pub moments: Moments,
}

impl Histogram {
    /// Create an empty histogram with `n_bins` equal bins over `[x_min, x_max)`.
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        n_bins: usize,
        x_min: f64,
        x_max: f64,
    ) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Validation("histogram needs at least one bin".to_string()));
        }
        if !(x_min.is_finite() && x_max.is_finite() && x_min < x_max) {
            return Err(Error::Validation(format!(
                "invalid histogram range [{x_min}, {x_max})"
            )));
        }
        Ok(Self {
            name: name.into(),
            title: title.into(),
            n_bins,
            x_min,
            x_max,
            bin_content: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            underflow: 0.0,
            overflow: 0.0,
            underflow_sumw2: 0.0,
            overflow_sumw2: 0.0,
            entries: 0.0,
            moments: Moments::default(),
        })
    }

    /// Bin width.
    #[inline]
    pub fn bin_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.n_bins as f64
    }

    /// Center of `bin`.
    #[inline]
    pub fn bin_center(&self, bin: usize) -> f64 {
        self.x_min + self.bin_width() * (bin as f64 + 0.5)
    }

    /// Find the bin index for a value.
    ///
    /// Returns `None` for underflow/overflow and NaN.
    pub fn find_bin(&self, val: f64) -> Option<usize> {
        if !(val >= self.x_min && val < self.x_max) {
            return None;
        }
        let idx = ((val - self.x_min) / self.bin_width()).floor() as usize;
        Some(idx.min(self.n_bins - 1))
    }

    /// Content of `bin`; 0 outside the histogram.
    #[inline]
    pub fn bin_content(&self, bin: usize) -> f64 {
        self.bin_content.get(bin).copied().unwrap_or(0.0)
    }

    /// Statistical error of `bin` (`sqrt(sumw2)`); 0 outside the histogram.
    #[inline]
    pub fn bin_error(&self, bin: usize) -> f64 {
        self.sumw2.get(bin).map(|v| v.sqrt()).unwrap_or(0.0)
    }

    /// Fill with unit weight.
    pub fn fill(&mut self, val: f64) {
        self.fill_weighted(val, 1.0);
    }

    /// Fill with weight `w`.
    ///
    /// Unit (and other dyadic) weights keep bin contents exact, so the result
    /// does not depend on fill order.
    pub fn fill_weighted(&mut self, val: f64, w: f64) {
        let w2 = w * w;
        self.entries += 1.0;

        if val < self.x_min {
            self.underflow += w;
            self.underflow_sumw2 += w2;
            return;
        }
        match self.find_bin(val) {
            Some(b) => {
                self.bin_content[b] += w;
                self.sumw2[b] += w2;
                self.moments.record(val, w);
            }
            None => {
                // NaN lands here as well.
                self.overflow += w;
                self.overflow_sumw2 += w2;
            }
        }
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Weighted mean of in-range fills (0 for an empty histogram).
    pub fn mean(&self) -> f64 {
        if self.moments.sumw == 0.0 {
            return 0.0;
        }
        self.moments.sumwx.to_f64() / self.moments.sumw
    }

    /// Weighted standard deviation of in-range fills (0 for an empty histogram).
    ///
    /// NaN when the weighted variance is negative beyond rounding, which a
    /// net histogram with negative weights can produce.
    pub fn std_dev(&self) -> f64 {
        if self.moments.sumw == 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        let second = self.moments.sumwx2.to_f64() / self.moments.sumw;
        let var = second - mean * mean;
        if var < -1e-12 * second.abs() {
            return f64::NAN;
        }
        var.max(0.0).sqrt()
    }

    /// Effective number of entries, `(Σw)² / Σw²`.
    pub fn effective_entries(&self) -> f64 {
        if self.moments.sumw2 == 0.0 {
            return 0.0;
        }
        self.moments.sumw * self.moments.sumw / self.moments.sumw2
    }

    /// Standard error of the mean, `std_dev / sqrt(effective_entries)`.
    pub fn mean_error(&self) -> f64 {
        let n_eff = self.effective_entries();
        if n_eff <= 0.0 {
            return f64::NAN;
        }
        self.std_dev() / n_eff.sqrt()
    }

    /// Whether `other` has identical binning.
    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.n_bins == other.n_bins && self.x_min == other.x_min && self.x_max == other.x_max
    }

    /// `self += c · other`, bin by bin.
    ///
    /// Contents, flows and first moments scale with `c`, squared weights with
    /// `c²`. Entry counts are summed. `c = ±1` is exact on the moments.
    pub fn add_scaled(&mut self, other: &Histogram, c: f64) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::Validation(format!(
                "cannot add '{}' ({} bins, [{}, {})) to '{}' ({} bins, [{}, {}))",
                other.name,
                other.n_bins,
                other.x_min,
                other.x_max,
                self.name,
                self.n_bins,
                self.x_min,
                self.x_max
            )));
        }
        let c2 = c * c;
        for (dst, src) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *dst += c * src;
        }
        for (dst, src) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *dst += c2 * src;
        }
        self.underflow += c * other.underflow;
        self.overflow += c * other.overflow;
        self.underflow_sumw2 += c2 * other.underflow_sumw2;
        self.overflow_sumw2 += c2 * other.overflow_sumw2;
        self.entries += other.entries;
        self.moments.add_scaled(&other.moments, c);
        Ok(())
    }

    /// A renamed copy.
    pub fn renamed(&self, name: impl Into<String>, title: impl Into<String>) -> Self {
        let mut h = self.clone();
        h.name = name.into();
        h.title = title.into();
        h
    }
}

impl Merge for Histogram {
    fn merge(&mut self, other: &Self) -> Result<()> {
        self.add_scaled(other, 1.0)
    }
}
