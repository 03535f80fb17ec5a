//! Piecewise-linear diameter profiles along the instrument axis.
//!
//! Each breakpoint carries a `low` diameter (approached from below) and a
//! `high` diameter (leaving upward), so a profile can describe an abrupt
//! step as well as a smooth taper.

use serde::{Deserialize, Serialize};

/// Position → diameter map with low/high values at each breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pos: Vec<f64>,
    low: Vec<f64>,
    high: Vec<f64>,
}

impl Profile {
    /// Create a profile.
    ///
    /// # Panics
    /// If the three vectors differ in length, are empty, or `pos` is not
    /// non-decreasing.
    pub fn new(pos: Vec<f64>, low: Vec<f64>, high: Vec<f64>) -> Self {
        assert!(!pos.is_empty(), "profile needs at least one breakpoint");
        assert_eq!(pos.len(), low.len(), "pos and low must have equal length");
        assert_eq!(pos.len(), high.len(), "pos and high must have equal length");
        assert!(
            pos.windows(2).all(|w| w[0] <= w[1]),
            "profile positions must be non-decreasing"
        );
        Self { pos, low, high }
    }

    /// Profile whose low and high diameters coincide at every breakpoint.
    pub fn continuous(pos: Vec<f64>, diameters: Vec<f64>) -> Self {
        let high = diameters.clone();
        Self::new(pos, diameters, high)
    }

    /// Build from `(position, low, high)` triples.
    pub fn from_triples(triples: &[(f64, f64, f64)]) -> Self {
        let pos = triples.iter().map(|t| t.0).collect();
        let low = triples.iter().map(|t| t.1).collect();
        let high = triples.iter().map(|t| t.2).collect();
        Self::new(pos, low, high)
    }

    /// Diameter at `position`. Exactly at a breakpoint, `high` selects the
    /// upward-side value. Outside the profile the end values are held, and
    /// a NaN position reads the bottom end.
    pub fn value_at(&self, position: f64, high: bool) -> f64 {
        let last = self.pos.len() - 1;
        if position.is_nan() || position < self.pos[0] {
            return self.low[0];
        }
        if position > self.pos[last] {
            return self.high[last];
        }
        let i = self.pos.partition_point(|&p| p < position);
        if self.pos[i] == position || i == 0 {
            return if high { self.high[i] } else { self.low[i] };
        }
        let t = (position - self.pos[i - 1]) / (self.pos[i] - self.pos[i - 1]);
        (1.0 - t) * self.high[i - 1] + t * self.low[i]
    }

    /// `(position, low, high)` for every breakpoint.
    pub fn breakpoints(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.pos
            .iter()
            .zip(&self.low)
            .zip(&self.high)
            .map(|((&p, &l), &h)| (p, l, h))
    }

    pub fn positions(&self) -> &[f64] {
        &self.pos
    }

    pub fn start(&self) -> f64 {
        self.pos[0]
    }

    pub fn end(&self) -> f64 {
        self.pos[self.pos.len() - 1]
    }

    /// Largest diameter anywhere on the profile.
    pub fn maximum(&self) -> f64 {
        self.low
            .iter()
            .chain(&self.high)
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Pointwise sum, sampled at the union of both profiles' breakpoints.
    pub fn add(&self, other: &Profile) -> Profile {
        let mut pos: Vec<f64> = self.pos.iter().chain(&other.pos).copied().collect();
        pos.sort_by(|a, b| a.total_cmp(b));
        pos.dedup();
        let low = pos
            .iter()
            .map(|&p| self.value_at(p, false) + other.value_at(p, false))
            .collect();
        let high = pos
            .iter()
            .map(|&p| self.value_at(p, true) + other.value_at(p, true))
            .collect();
        Profile::new(pos, low, high)
    }

    /// Restrict (or extend) the profile to `[start, end]`.
    pub fn clipped(&self, start: f64, end: f64) -> Profile {
        let mut pos = vec![start];
        let first = self.value_at(start, true);
        let mut low = vec![first];
        let mut high = vec![first];

        for (p, l, h) in self.breakpoints() {
            if p <= start || p >= end {
                continue;
            }
            pos.push(p);
            low.push(l);
            high.push(h);
        }

        let last = self.value_at(end, false);
        pos.push(end);
        low.push(last);
        high.push(last);
        Profile::new(pos, low, high)
    }

    /// Staircase approximation: every tapered span is cut into enough
    /// cylinders that no step changes diameter by more than `max_step`.
    /// Each cylinder takes the diameter at its midpoint.
    pub fn as_stepped(&self, max_step: f64) -> Profile {
        assert!(max_step > 0.0, "max_step must be positive");
        let mut pos = Vec::new();
        for i in 0..self.pos.len() - 1 {
            let (ax, ay) = (self.pos[i], self.high[i]);
            let (bx, by) = (self.pos[i + 1], self.low[i + 1]);
            pos.push(ax);
            let n = ((by - ay).abs() / max_step) as usize + 1;
            pos.extend((1..n).map(|j| (bx - ax) * j as f64 / n as f64 + ax));
        }
        pos.push(self.end());

        if pos.len() == 1 {
            let d = self.high[0];
            return Profile::new(pos, vec![d], vec![d]);
        }

        let diams: Vec<f64> = pos
            .windows(2)
            .map(|w| self.value_at(0.5 * (w[0] + w[1]), false))
            .collect();
        let mut low = Vec::with_capacity(pos.len());
        low.push(diams[0]);
        low.extend_from_slice(&diams);
        let mut high = diams.clone();
        high.push(diams[diams.len() - 1]);
        Profile::new(pos, low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    fn taper() -> Profile {
        Profile::from_triples(&[(0.0, 10.0, 10.0), (100.0, 20.0, 15.0), (200.0, 15.0, 15.0)])
    }

    #[test]
    fn interpolates_between_breakpoints() {
        let p = taper();
        assert!((p.value_at(50.0, false) - 15.0).abs() < TOL);
        assert!((p.value_at(150.0, true) - 15.0).abs() < TOL);
    }

    #[test]
    fn breakpoint_side_selection() {
        let p = taper();
        assert!((p.value_at(100.0, false) - 20.0).abs() < TOL);
        assert!((p.value_at(100.0, true) - 15.0).abs() < TOL);
    }

    #[test]
    fn holds_end_values_outside_range() {
        let p = taper();
        assert!((p.value_at(-5.0, true) - 10.0).abs() < TOL);
        assert!((p.value_at(500.0, false) - 15.0).abs() < TOL);
        assert!((p.maximum() - 20.0).abs() < TOL);
    }

    #[test]
    fn non_finite_positions_hold_end_values() {
        let p = taper();
        assert_eq!(p.value_at(f64::NAN, false), 10.0);
        assert_eq!(p.value_at(f64::NAN, true), 10.0);
        assert_eq!(p.value_at(f64::NEG_INFINITY, true), 10.0);
        assert_eq!(p.value_at(f64::INFINITY, false), 15.0);
    }

    #[test]
    #[should_panic]
    fn rejects_non_monotonic_positions() {
        Profile::continuous(vec![0.0, 2.0, 1.0], vec![1.0, 1.0, 1.0]);
    }

    #[test]
    #[should_panic]
    fn rejects_mismatched_arity() {
        Profile::new(vec![0.0, 1.0], vec![1.0], vec![1.0, 1.0]);
    }

    #[test]
    fn stepped_profile_limits_step_size() {
        let cone = Profile::continuous(vec![0.0, 100.0], vec![10.0, 14.0]);
        let stepped = cone.as_stepped(0.5);
        let bps: Vec<_> = stepped.breakpoints().collect();
        assert!(bps.len() > 2);
        for (_, low, high) in &bps[1..bps.len() - 1] {
            assert!((high - low).abs() <= 0.5 + TOL);
        }
        // Each cylinder is flat.
        for w in bps.windows(2) {
            assert!((w[0].2 - w[1].1).abs() < TOL);
        }
    }

    #[test]
    fn cylinder_steps_to_a_single_span() {
        let pipe = Profile::continuous(vec![0.0, 300.0], vec![12.0, 12.0]);
        let stepped = pipe.as_stepped(0.125);
        assert_eq!(stepped.positions(), &[0.0, 300.0]);
        assert!((stepped.value_at(150.0, false) - 12.0).abs() < TOL);
    }

    #[test]
    fn add_and_clip() {
        let bore = Profile::continuous(vec![0.0, 100.0], vec![10.0, 20.0]);
        let wall = Profile::continuous(vec![0.0, 50.0, 100.0], vec![4.0, 4.0, 8.0]);
        let outer = bore.add(&wall);
        assert_eq!(outer.positions(), &[0.0, 50.0, 100.0]);
        assert!((outer.value_at(50.0, false) - 19.0).abs() < TOL);

        let clipped = outer.clipped(25.0, 75.0);
        assert_eq!(clipped.positions(), &[25.0, 50.0, 75.0]);
        assert!((clipped.value_at(25.0, true) - outer.value_at(25.0, true)).abs() < TOL);
    }
}
