//! Bore geometry and its conversion into a transform chain.

use serde::{Deserialize, Serialize};

use crate::profile::Profile;
use crate::waveguide::{circle_area, ChainOp, EndCorrections, TransformChain};

/// Default staircase step for conical bore sections (mm of diameter).
pub const DEFAULT_CONE_STEP: f64 = 0.125;

/// A concrete instrument: bore, wall and tone holes.
///
/// Positions are measured from the bottom end. Hole vectors are ordered
/// bottom first and all have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub length: f64,
    /// Bore diameters.
    pub inner: Profile,
    /// External diameters.
    pub outer: Profile,
    /// Hole centres on the outside surface.
    pub hole_positions: Vec<f64>,
    /// Where each hole meets the bore.
    pub inner_hole_positions: Vec<f64>,
    pub hole_diameters: Vec<f64>,
    /// Tilt along the axis in degrees, up positive.
    pub hole_angles: Vec<f64>,
    /// Rotation around the axis in degrees. Carried for the CAD layer only.
    pub hole_horiz_angles: Vec<f64>,
    /// Acoustic length of each hole before end corrections.
    pub hole_lengths: Vec<f64>,
    pub inner_kinks: Vec<f64>,
    pub outer_kinks: Vec<f64>,
    pub closed_top: bool,
    pub cone_step: f64,
}

impl Instrument {
    /// Plain cylinder without holes.
    pub fn cylinder(length: f64, bore: f64, outer: f64, closed_top: bool) -> Self {
        Self {
            length,
            inner: Profile::continuous(vec![0.0, length], vec![bore, bore]),
            outer: Profile::continuous(vec![0.0, length], vec![outer, outer]),
            hole_positions: Vec::new(),
            inner_hole_positions: Vec::new(),
            hole_diameters: Vec::new(),
            hole_angles: Vec::new(),
            hole_horiz_angles: Vec::new(),
            hole_lengths: Vec::new(),
            inner_kinks: Vec::new(),
            outer_kinks: Vec::new(),
            closed_top,
            cone_step: DEFAULT_CONE_STEP,
        }
    }

    /// Add a straight-through hole at `position` whose length is the wall
    /// thickness there.
    pub fn with_hole(mut self, position: f64, diameter: f64) -> Self {
        let thickness = 0.5 * (self.outer.value_at(position, false) - self.inner.value_at(position, false));
        self.hole_positions.push(position);
        self.inner_hole_positions.push(position);
        self.hole_diameters.push(diameter);
        self.hole_angles.push(0.0);
        self.hole_horiz_angles.push(0.0);
        self.hole_lengths.push(thickness);
        self
    }

    pub fn n_holes(&self) -> usize {
        self.hole_diameters.len()
    }

    /// Correction added below the bottom end.
    pub fn flange_correction(&self, corrections: &EndCorrections) -> f64 {
        corrections.flange(self.outer.value_at(0.0, true), self.inner.value_at(0.0, true))
    }

    /// Build the transform chain for this geometry.
    ///
    /// Conical parts of the bore are approximated by cylinders no more than
    /// `cone_step` apart in diameter. Events are ordered by position; holes
    /// are clamped into `[0, length]`.
    pub fn prepare(&self, corrections: &EndCorrections) -> TransformChain {
        #[derive(Clone, Copy)]
        enum Event {
            End,
            Step(usize),
            Hole(usize),
        }

        let stepped = self.inner.as_stepped(self.cone_step);
        let breakpoints: Vec<(f64, f64, f64)> = stepped.breakpoints().collect();

        let mut events = vec![(self.length, Event::End)];
        events.extend(
            breakpoints
                .iter()
                .enumerate()
                .filter(|(_, bp)| bp.0 > 0.0 && bp.0 < self.length)
                .map(|(i, bp)| (bp.0, Event::Step(i))),
        );
        events.extend(
            self.inner_hole_positions
                .iter()
                .enumerate()
                .map(|(i, &pos)| (pos.clamp(0.0, self.length.max(0.0)), Event::Hole(i))),
        );
        events.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut ops = Vec::with_capacity(2 * events.len());
        let mut position = -self.flange_correction(corrections);
        let mut diameter = stepped.value_at(0.0, true);
        let end_area = circle_area(diameter);

        for (pos, event) in events {
            ops.push(ChainOp::Segment {
                length: pos - position,
            });
            position = pos;

            match event {
                Event::End => {}
                Event::Step(i) => {
                    let area_below = circle_area(diameter);
                    diameter = breakpoints[i].2;
                    ops.push(ChainOp::Step {
                        area: circle_area(diameter),
                        area_below,
                    });
                }
                Event::Hole(i) => {
                    let hole_diameter = self.hole_diameters[i];
                    let length = self.hole_lengths[i];
                    ops.push(ChainOp::Hole {
                        area: circle_area(diameter),
                        hole_area: circle_area(hole_diameter),
                        open_length: length + corrections.hole(hole_diameter, diameter, false),
                        closed_length: length + corrections.hole(hole_diameter, diameter, true),
                        hole: i,
                    });
                }
            }
        }

        TransformChain::new(ops, self.closed_top, end_area, circle_area(diameter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resonance::{locate_resonance, SearchParameters};

    const LENGTH_TOL: f64 = 0.05;

    #[test]
    fn closed_cylinder_is_a_quarter_wave_resonator() {
        let corrections = EndCorrections::default();
        let inst = Instrument::cylinder(300.0, 15.0, 22.0, true);
        let chain = inst.prepare(&corrections);
        let expected = 4.0 * (300.0 + inst.flange_correction(&corrections));

        let found = locate_resonance(&chain, expected * 1.02, &[], &SearchParameters::default());
        assert!(found.converged);
        assert!((found.wavelength - expected).abs() < LENGTH_TOL);
    }

    #[test]
    fn events_are_ordered_and_clamped() {
        let mut inst = Instrument::cylinder(200.0, 15.0, 22.0, false).with_hole(120.0, 6.0);
        inst.inner = Profile::continuous(vec![0.0, 100.0, 200.0], vec![15.0, 15.0, 12.0]);
        inst.inner_hole_positions[0] = 250.0;
        let chain = inst.prepare(&EndCorrections::default());

        let mut position = -inst.flange_correction(&EndCorrections::default());
        let mut saw_hole = false;
        for op in chain.ops() {
            match op {
                ChainOp::Segment { length } => {
                    assert!(*length >= 0.0);
                    position += length;
                }
                ChainOp::Step { .. } => assert!(position > 0.0 && position < 200.0),
                ChainOp::Hole { .. } => {
                    saw_hole = true;
                    assert!((position - 200.0).abs() < 1e-9);
                }
            }
        }
        assert!(saw_hole);
        assert!((position - 200.0).abs() < 1e-9);
        assert_eq!(chain.hole_count(), 1);
    }

    #[test]
    fn taper_is_staircased() {
        let mut inst = Instrument::cylinder(200.0, 15.0, 22.0, true);
        inst.inner = Profile::continuous(vec![0.0, 200.0], vec![10.0, 15.0]);
        let steps = inst
            .prepare(&EndCorrections::default())
            .ops()
            .iter()
            .filter(|op| matches!(op, ChainOp::Step { .. }))
            .count();
        assert_eq!(steps, 40);
    }
}
