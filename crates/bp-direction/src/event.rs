//! Decoded event records.
//!
//! One [`EventCandidate`] per row of the upstream coincidence tree: an
//! alpha-like anchor plus the beta-like companions found in the prompt and
//! far time windows. Times are in µs, positions in mm, energies in MeV.

use serde::{Deserialize, Serialize};

/// The anchor (alpha candidate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Segment index
    pub segment: usize,
    /// Energy
    pub energy: f64,
    /// Pulse-shape discrimination value
    pub psd: f64,
    /// Depth position
    pub z: f64,
    /// Time
    pub time: f64,
}

/// A companion (beta candidate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    /// Segment index
    pub segment: usize,
    /// Total cluster energy
    pub energy: f64,
    /// Pulse-shape discrimination value
    pub psd: f64,
    /// Depth position
    pub z: f64,
    /// Cluster multiplicity
    pub mult_clust: i32,
    /// Cluster multiplicity counting ionization-like hits only
    pub mult_clust_ioni: i32,
    /// Time
    pub time: f64,
}

/// Time window a companion was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Window {
    /// Short window around the anchor; source of Correlated pairs.
    Prompt,
    /// Displaced window; source of Accidental pairs.
    Far,
}

/// Anchor with its companion lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    /// Anchor signal
    pub anchor: Anchor,
    /// Prompt-window companions, in reported order
    #[serde(default)]
    pub prompt: Vec<Companion>,
    /// Far-window companions, in reported order
    #[serde(default)]
    pub far: Vec<Companion>,
}

impl EventCandidate {
    /// Companions of `window`.
    pub fn companions(&self, window: Window) -> &[Companion] {
        match window {
            Window::Prompt => &self.prompt,
            Window::Far => &self.far,
        }
    }

    /// Every companion with its window and index within that window's list.
    pub fn iter_companions(&self) -> impl Iterator<Item = (Window, usize, &Companion)> {
        let prompt = self.prompt.iter().enumerate().map(|(i, c)| (Window::Prompt, i, c));
        let far = self.far.iter().enumerate().map(|(i, c)| (Window::Far, i, c));
        prompt.chain(far)
    }
}
