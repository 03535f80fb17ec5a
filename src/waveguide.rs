//! One-dimensional transmission-line model of the bore.
//!
//! The bore is evaluated from the bottom end (an open termination, reflection
//! −1) toward the mouthpiece. Each [`ChainOp`] updates the reflection
//! coefficient seen looking down the bore. Two equivalent evaluations are
//! offered:
//!
//! - **reflection form**: complex reflection coefficient, whose angle at the
//!   mouth crosses zero at resonance;
//! - **phase form**: the same angle tracked in cycles with an exact integer
//!   winding, so a specific resonance mode can be targeted.
//!
//! Junctions conserve pressure and volume flow. With `r = exp(2πiφ)` the
//! normalised admittance of a port of area `a` is `−i·a·tan(πφ)`, which gives
//! the tangent form of the junction equations used by [`TransformChain::phase`].

use std::f64::consts::PI;

use nalgebra::Complex;
use serde::{Deserialize, Serialize};

const FOUR_PI: f64 = 4.0 * PI;

/// Floor on `|1 + r|` when transferring wave amplitude across a junction.
const MIN_PRESSURE_FACTOR: f64 = 1e-9;

/// Area of a circle of the given diameter.
#[inline]
pub fn circle_area(diameter: f64) -> f64 {
    let radius = diameter * 0.5;
    PI * radius * radius
}

/// Propagate a reflection coefficient along a uniform pipe.
///
/// A pure rotation by `4π·L/λ`; the magnitude of `reply_end` is preserved.
#[inline]
pub fn pipe_reply(reply_end: Complex<f64>, length_on_wavelength: f64) -> Complex<f64> {
    Complex::from_polar(1.0, FOUR_PI * length_on_wavelength) * reply_end
}

/// Reflection seen from a port of `area` joined to branches of the given
/// areas and reflections.
pub fn junction_reply(area: f64, branches: &[(f64, Complex<f64>)]) -> Complex<f64> {
    let total_area = area + branches.iter().map(|b| b.0).sum::<f64>();
    let one = Complex::new(1.0, 0.0);
    let mut denom = Complex::new(0.5, 0.0);
    for &(a, r) in branches {
        denom -= Complex::new(a, 0.0) / ((one / r + one) * total_area);
    }
    Complex::new(area, 0.0) / (denom * total_area) - one
}

/// Two-port junction (a change of bore area).
#[inline]
pub fn junction2_reply(area: f64, area1: f64, reply1: Complex<f64>) -> Complex<f64> {
    junction_reply(area, &[(area1, reply1)])
}

/// Three-port junction (bore continuing below plus a side branch).
#[inline]
pub fn junction3_reply(
    area: f64,
    area1: f64,
    area2: f64,
    reply1: Complex<f64>,
    reply2: Complex<f64>,
) -> Complex<f64> {
    junction_reply(area, &[(area1, reply1), (area2, reply2)])
}

/// Empirical length corrections at openings.
///
/// Every coefficient is overridable; the defaults follow Nederveen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndCorrections {
    /// Flanged open end: `a·(flange_base − flange_scale·(flange_offset + w/a)^flange_power)`.
    pub flange_base: f64,
    pub flange_scale: f64,
    pub flange_offset: f64,
    pub flange_power: f64,
    /// Open hole inner correction: `hole_inner_base − hole_inner_slope·d_h/d_b`.
    pub hole_inner_base: f64,
    pub hole_inner_slope: f64,
    /// Open hole outer (radiation) correction, in hole radii.
    pub hole_outer: f64,
    /// Closed hole correction: `closed_hole_scale·(d_h/d_b)²` hole radii.
    pub closed_hole_scale: f64,
}

impl Default for EndCorrections {
    fn default() -> Self {
        Self {
            flange_base: 0.821,
            flange_scale: 0.13,
            flange_offset: 0.42,
            flange_power: -0.54,
            hole_inner_base: 1.3,
            hole_inner_slope: 0.9,
            hole_outer: 0.7,
            closed_hole_scale: 0.25,
        }
    }
}

impl EndCorrections {
    /// Correction for the bottom opening, given outer and inner diameters there.
    pub fn flange(&self, outer_diameter: f64, inner_diameter: f64) -> f64 {
        let a = inner_diameter / 2.0;
        let w = (outer_diameter - inner_diameter) / 2.0;
        a * (self.flange_base - self.flange_scale * (self.flange_offset + w / a).powf(self.flange_power))
    }

    /// Correction added to a tone hole's length, open or closed.
    pub fn hole(&self, hole_diameter: f64, bore_diameter: f64, closed: bool) -> f64 {
        let a = hole_diameter / 2.0;
        let ratio = hole_diameter / bore_diameter;
        if closed {
            a * self.closed_hole_scale * ratio * ratio
        } else {
            a * ((self.hole_inner_base - self.hole_inner_slope * ratio) + self.hole_outer)
        }
    }
}

/// One step of the transform chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainOp {
    /// Uniform pipe of the given length.
    Segment { length: f64 },
    /// Change of bore area from `area_below` to `area`.
    Step { area: f64, area_below: f64 },
    /// Tone hole `hole` branching from a bore of cross-section `area`.
    Hole {
        area: f64,
        hole_area: f64,
        open_length: f64,
        closed_length: f64,
        hole: usize,
    },
}

/// Ordered transform chain for a prepared instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformChain {
    ops: Vec<ChainOp>,
    closed_top: bool,
    end_area: f64,
    mouth_area: f64,
}

impl TransformChain {
    /// # Arguments
    /// * `ops` - operations ordered from the bottom end upward
    /// * `closed_top` - reed-like closed mouthpiece
    /// * `end_area` - bore cross-section at the bottom opening
    /// * `mouth_area` - bore cross-section at the mouthpiece
    pub fn new(ops: Vec<ChainOp>, closed_top: bool, end_area: f64, mouth_area: f64) -> Self {
        Self {
            ops,
            closed_top,
            end_area,
            mouth_area,
        }
    }

    pub fn ops(&self) -> &[ChainOp] {
        &self.ops
    }

    pub fn closed_top(&self) -> bool {
        self.closed_top
    }

    /// Highest hole index referenced by the chain, plus one.
    pub fn hole_count(&self) -> usize {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ChainOp::Hole { hole, .. } => Some(hole + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Reflection coefficient seen at the mouth, after the open-top flip.
    pub fn reflection(&self, wavelength: f64, fingers: &[bool]) -> Complex<f64> {
        let mut reply = Complex::new(-1.0, 0.0);
        for op in &self.ops {
            reply = match *op {
                ChainOp::Segment { length } => pipe_reply(reply, length / wavelength),
                ChainOp::Step { area, area_below } => junction2_reply(area, area_below, reply),
                ChainOp::Hole {
                    area,
                    hole_area,
                    open_length,
                    closed_length,
                    hole,
                } => {
                    let hole_reply = hole_reply(fingers[hole], open_length, closed_length, wavelength);
                    junction3_reply(area, area, hole_area, reply, hole_reply)
                }
            };
        }
        if self.closed_top {
            reply
        } else {
            -reply
        }
    }

    /// Resonance criterion in `[−1, 1)`: angle of the mouth reflection in
    /// units of π. Zero at resonance, positive just below a resonant
    /// wavelength and negative just above it.
    pub fn resonance_score(&self, wavelength: f64, fingers: &[bool]) -> f64 {
        let score = self.reflection(wavelength, fingers).arg() / PI;
        if score >= 1.0 {
            score - 2.0
        } else {
            score
        }
    }

    /// Unwrapped phase of the mouth reflection, in cycles.
    ///
    /// Decreases monotonically with wavelength toward [`Self::phase_at_infinity`]
    /// and passes through an integer at each resonance.
    pub fn phase(&self, wavelength: f64, fingers: &[bool]) -> f64 {
        let mut phase = 0.5;
        for op in &self.ops {
            match *op {
                ChainOp::Segment { length } => phase += 2.0 * length / wavelength,
                ChainOp::Step { area, area_below } => {
                    let (winding, frac) = split_phase(phase);
                    phase = winding + ((area_below / area) * (PI * frac).tan()).atan() / PI;
                }
                ChainOp::Hole {
                    area,
                    hole_area,
                    open_length,
                    closed_length,
                    hole,
                } => {
                    let (winding, frac) = split_phase(phase);
                    let (hole_windings, hole_phase) =
                        hole_phase(fingers[hole], open_length, closed_length, wavelength);
                    let admittance = area * (PI * frac).tan() + hole_area * (PI * hole_phase).tan();
                    phase = winding + hole_windings + (admittance / area).atan() / PI;
                }
            }
        }
        if self.closed_top {
            phase
        } else {
            phase + 0.5
        }
    }

    /// Limit of [`Self::phase`] as wavelength grows without bound.
    pub fn phase_at_infinity(&self) -> f64 {
        if self.closed_top {
            0.5
        } else {
            1.0
        }
    }

    /// Radiated power from the bottom opening and all open holes relative to
    /// the power travelling down the mouth pipe, at the given wavelength.
    pub fn emission(&self, wavelength: f64, fingers: &[bool]) -> f64 {
        let k = 2.0 * PI / wavelength;
        let mut reply = Complex::new(-1.0, 0.0);
        let mut amplitude = 1.0;
        let end_flow = 2.0 * self.end_area * amplitude;
        let mut radiated = end_flow * end_flow;

        for op in &self.ops {
            match *op {
                ChainOp::Segment { length } => reply = pipe_reply(reply, length / wavelength),
                ChainOp::Step { area, area_below } => {
                    let new_reply = junction2_reply(area, area_below, reply);
                    amplitude = transfer_amplitude(amplitude, reply, new_reply);
                    reply = new_reply;
                }
                ChainOp::Hole {
                    area,
                    hole_area,
                    open_length,
                    closed_length,
                    hole,
                } => {
                    let closed = fingers[hole];
                    let branch = hole_reply(closed, open_length, closed_length, wavelength);
                    let new_reply = junction3_reply(area, area, hole_area, reply, branch);
                    if !closed {
                        let hole_amplitude = transfer_amplitude(amplitude, reply, branch);
                        let flow = 2.0 * hole_area * hole_amplitude;
                        radiated += flow * flow;
                    }
                    amplitude = transfer_amplitude(amplitude, reply, new_reply);
                    reply = new_reply;
                }
            }
        }

        k * k * radiated / (4.0 * PI * self.mouth_area * amplitude * amplitude)
    }
}

fn hole_reply(closed: bool, open_length: f64, closed_length: f64, wavelength: f64) -> Complex<f64> {
    if closed {
        pipe_reply(Complex::new(1.0, 0.0), closed_length / wavelength)
    } else {
        pipe_reply(Complex::new(-1.0, 0.0), open_length / wavelength)
    }
}

/// Phase of a hole branch, with the number of admittance poles it has
/// passed since zero frequency.
fn hole_phase(closed: bool, open_length: f64, closed_length: f64, wavelength: f64) -> (f64, f64) {
    if closed {
        let travel = 2.0 * closed_length / wavelength;
        ((travel + 0.5).floor(), travel)
    } else {
        let travel = 2.0 * open_length / wavelength;
        (travel.floor(), 0.5 + travel)
    }
}

fn split_phase(phase: f64) -> (f64, f64) {
    let winding = phase.round();
    (winding, phase - winding)
}

/// Wave amplitude on the far side of a junction, from pressure continuity.
fn transfer_amplitude(amplitude: f64, reply_from: Complex<f64>, reply_to: Complex<f64>) -> f64 {
    let one = Complex::new(1.0, 0.0);
    amplitude * (one + reply_from).norm() / (one + reply_to).norm().max(MIN_PRESSURE_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    fn cylinder(length: f64, closed_top: bool) -> TransformChain {
        let area = circle_area(15.0);
        TransformChain::new(vec![ChainOp::Segment { length }], closed_top, area, area)
    }

    #[test]
    fn pipe_reply_is_a_rotation() {
        let r = Complex::new(0.3, -0.4);
        for &ratio in &[0.0, 0.01, 0.25, 0.37, 1.9] {
            assert!((pipe_reply(r, ratio).norm() - r.norm()).abs() < TOL);
        }
        assert!((pipe_reply(r, 0.0) - r).norm() < TOL);
    }

    #[test]
    fn equal_area_junction_is_transparent() {
        let r = Complex::from_polar(1.0, 0.7);
        assert!((junction2_reply(5.0, 5.0, r) - r).norm() < TOL);
    }

    #[test]
    fn lossless_junctions_keep_unit_magnitude() {
        let r1 = Complex::from_polar(1.0, 1.1);
        let r2 = Complex::from_polar(1.0, -2.3);
        assert!((junction2_reply(3.0, 7.0, r1).norm() - 1.0).abs() < 1e-9);
        assert!((junction3_reply(3.0, 3.0, 1.5, r1, r2).norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn closed_hole_correction_is_never_zero() {
        let corrections = EndCorrections::default();
        assert!(corrections.hole(5.0, 15.0, true) > 0.0);
        assert!(corrections.hole(5.0, 15.0, false) > corrections.hole(5.0, 15.0, true));
        let flange = corrections.flange(25.0, 15.0);
        assert!(flange > 0.0 && flange < 15.0);
    }

    #[test]
    fn phase_and_reflection_agree() {
        let area = circle_area(15.0);
        let chain = TransformChain::new(
            vec![
                ChainOp::Segment { length: 80.0 },
                ChainOp::Hole {
                    area,
                    hole_area: circle_area(6.0),
                    open_length: 9.0,
                    closed_length: 4.5,
                    hole: 0,
                },
                ChainOp::Segment { length: 60.0 },
                ChainOp::Step {
                    area: circle_area(18.0),
                    area_below: area,
                },
                ChainOp::Segment { length: 120.0 },
            ],
            false,
            area,
            circle_area(18.0),
        );
        for fingers in [[true], [false]] {
            for &w in &[150.0, 333.0, 700.0, 1234.0] {
                let reflection = chain.reflection(w, &fingers);
                let phase = chain.phase(w, &fingers);
                let from_phase = Complex::from_polar(1.0, 2.0 * PI * phase);
                assert!((reflection - from_phase).norm() < 1e-8);
            }
        }
    }

    #[test]
    fn closed_cylinder_resonates_at_quarter_wave() {
        let chain = cylinder(100.0, true);
        assert!(chain.resonance_score(400.0, &[]).abs() < TOL);
        assert!(chain.resonance_score(399.0, &[]) > 0.0);
        assert!(chain.resonance_score(401.0, &[]) < 0.0);
        assert!((chain.phase(400.0, &[]) - 1.0).abs() < TOL);
    }

    #[test]
    fn open_cylinder_resonates_at_half_wave() {
        let chain = cylinder(100.0, false);
        assert!(chain.resonance_score(200.0, &[]).abs() < TOL);
        assert!((chain.phase(200.0, &[]) - 2.0).abs() < TOL);
        assert!((chain.phase(1e12, &[]) - chain.phase_at_infinity()).abs() < 1e-6);
    }

    #[test]
    fn emission_grows_with_frequency() {
        let chain = cylinder(100.0, true);
        let low = chain.emission(800.0, &[]);
        let high = chain.emission(200.0, &[]);
        assert!(low > 0.0);
        assert!(high > low);
    }
}
