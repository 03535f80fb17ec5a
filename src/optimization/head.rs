//! Fipple head geometry, folded into the bore before a whistle is scored.
//!
//! A whistle does not sound from the top of its bore. The block fills the
//! last part of it and the window above acts as a short narrow tube, so the
//! scored instrument loses `boreless` bore diameters of length and gains a
//! tube of the window's effective diameter instead.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;
use crate::profile::Profile;

/// Window proportions of a fipple head, relative to the bore diameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhistleHead {
    /// Windway width across the bore.
    pub gap_width: f64,
    /// Window length along the axis.
    pub gap_length: f64,
    /// Extra window tube length, in effective window diameters.
    pub gap_extra: f64,
    /// Bore length taken up by the block, in bore diameters.
    pub boreless: f64,
}

impl Default for WhistleHead {
    fn default() -> Self {
        Self {
            gap_width: 0.6,
            gap_length: 0.25,
            gap_extra: 0.6,
            boreless: 0.3,
        }
    }
}

impl WhistleHead {
    /// Diameter of the circle with the window's area.
    pub fn effective_gap_diameter(&self, bore: f64) -> f64 {
        let area = (bore * self.gap_length) * (bore * self.gap_width);
        (area / PI).sqrt() * 2.0
    }

    /// Window height: the wall is this high on one side of the window and a
    /// blade on the other, so half of it counts.
    pub fn effective_gap_height(&self, bore: f64, outside: f64) -> f64 {
        (outside - bore) * 0.25
    }

    /// Acoustic length of the window tube.
    pub fn window_length(&self, bore: f64, outside: f64) -> f64 {
        self.effective_gap_height(bore, outside) + self.effective_gap_diameter(bore) * self.gap_extra
    }

    /// `inst` as it sounds with this head on a bore of diameter `bore` in a
    /// body of diameter `outside`.
    pub fn apply(&self, inst: &Instrument, bore: f64, outside: f64) -> Instrument {
        let mut patched = inst.clone();
        patched.length -= inst.inner.value_at(inst.length, false) * self.boreless;

        let diameter = self.effective_gap_diameter(bore);
        let window = self.window_length(bore, outside);
        let mut triples: Vec<(f64, f64, f64)> = inst.inner.clipped(0.0, patched.length).breakpoints().collect();
        if let Some(top) = triples.last_mut() {
            top.2 = diameter;
        }
        triples.push((patched.length + window, diameter, diameter));

        patched.inner = Profile::from_triples(&triples);
        patched.length += window;
        patched
    }
}
