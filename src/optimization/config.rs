//! Static designer configuration and built-in presets.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::instrument::{Instrument, DEFAULT_CONE_STEP};
use crate::resonance::SearchParameters;
use crate::types::{Fingering, NoteSpec};
use crate::waveguide::EndCorrections;

use super::head::WhistleHead;
use super::objective::ObjectiveWeights;
use super::types::PoolParameters;

/// A bore or wall diameter at a profile breakpoint: either one value, or a
/// distinct value below and above the breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Diameter {
    Same(f64),
    Step(f64, f64),
}

impl Diameter {
    pub fn low(&self) -> f64 {
        match *self {
            Diameter::Same(d) | Diameter::Step(d, _) => d,
        }
    }

    pub fn high(&self) -> f64 {
        match *self {
            Diameter::Same(d) | Diameter::Step(_, d) => d,
        }
    }
}

/// Everything needed to design one instrument.
///
/// Diameters and spacings are in mm and already scaled for `transpose`.
/// Fractions are relative to the instrument length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignerConfig {
    pub name: String,
    pub closed_top: bool,
    /// Semitones; positive shrinks the instrument.
    #[serde(default)]
    pub transpose: i32,
    /// Starting length (mm) before transposition.
    pub initial_length: f64,
    pub fingerings: Vec<Fingering>,

    /// Bore diameters from the bottom end to the top.
    pub inner_diameters: Vec<Diameter>,
    /// Outer diameters, or wall thickness on both sides when `outer_add`.
    pub outer_diameters: Vec<Diameter>,
    #[serde(default)]
    pub outer_add: bool,
    pub initial_inner_fractions: Vec<f64>,
    pub min_inner_fraction_sep: Vec<f64>,
    #[serde(default)]
    pub max_inner_fraction_sep: Option<Vec<f64>>,
    pub initial_outer_fractions: Vec<f64>,
    pub min_outer_fraction_sep: Vec<f64>,
    #[serde(default)]
    pub max_outer_fraction_sep: Option<Vec<f64>>,

    pub min_hole_diameters: Vec<f64>,
    pub max_hole_diameters: Vec<f64>,
    pub initial_hole_fractions: Vec<f64>,
    pub initial_hole_diameter_fractions: Vec<f64>,
    pub min_hole_spacing: Vec<Option<f64>>,
    pub max_hole_spacing: Vec<Option<f64>>,
    pub balance: Vec<Option<f64>>,
    pub hole_angles: Vec<f64>,
    pub hole_horiz_angles: Vec<f64>,
    pub hole_extra_height_by_diameter: Vec<f64>,
    #[serde(default)]
    pub bottom_clearance_fraction: f64,
    #[serde(default)]
    pub top_clearance_fraction: f64,

    #[serde(default = "default_cone_step")]
    pub cone_step: f64,
    #[serde(default)]
    pub corrections: EndCorrections,
    #[serde(default)]
    pub search: SearchParameters,
    #[serde(default)]
    pub weights: ObjectiveWeights,
    #[serde(default)]
    pub pool: PoolParameters,
    /// Fipple head folded into the bore before scoring. The head sits on the
    /// top inner and outer diameters.
    #[serde(default)]
    pub head: Option<WhistleHead>,
}

fn default_cone_step() -> f64 {
    DEFAULT_CONE_STEP
}

/// Evenly spread interior breakpoint fractions for `n` diameters.
fn even_fractions(n: usize) -> Vec<f64> {
    (0..n.saturating_sub(2))
        .map(|i| (i as f64 + 1.0) / (n as f64 - 1.0))
        .collect()
}

fn scale_all(values: &[f64], factor: f64) -> Vec<f64> {
    values.iter().map(|v| v * factor).collect()
}

fn scale_some(values: &[Option<f64>], factor: f64) -> Vec<Option<f64>> {
    values.iter().map(|v| v.map(|v| v * factor)).collect()
}

fn scale_diameters(values: &[f64], factor: f64) -> Vec<Diameter> {
    values.iter().map(|&v| Diameter::Same(v * factor)).collect()
}

impl DesignerConfig {
    /// Configuration with every optional table at its default, for a bore
    /// described by `inner`/`outer` diameters and `n_holes` holes whose
    /// maximum diameters are given.
    pub fn new(
        name: impl Into<String>,
        initial_length: f64,
        inner_diameters: Vec<Diameter>,
        outer_diameters: Vec<Diameter>,
        max_hole_diameters: Vec<f64>,
    ) -> Self {
        let n = max_hole_diameters.len();
        let n_inner = inner_diameters.len();
        let n_outer = outer_diameters.len();
        Self {
            name: name.into(),
            closed_top: false,
            transpose: 0,
            initial_length,
            fingerings: Vec::new(),
            initial_inner_fractions: even_fractions(n_inner),
            min_inner_fraction_sep: vec![0.0; n_inner.saturating_sub(1)],
            max_inner_fraction_sep: None,
            initial_outer_fractions: even_fractions(n_outer),
            min_outer_fraction_sep: vec![0.0; n_outer.saturating_sub(1)],
            max_outer_fraction_sep: None,
            inner_diameters,
            outer_diameters,
            outer_add: false,
            min_hole_diameters: vec![0.5; n],
            max_hole_diameters,
            initial_hole_fractions: (0..n)
                .map(|i| (i as f64 + 3.0) / (n as f64 + 2.0) * 0.5)
                .collect(),
            initial_hole_diameter_fractions: vec![0.75; n],
            min_hole_spacing: vec![Some(0.0); n.saturating_sub(1)],
            max_hole_spacing: vec![Some(initial_length); n.saturating_sub(1)],
            balance: vec![None; n.saturating_sub(2)],
            hole_angles: vec![0.0; n],
            hole_horiz_angles: vec![0.0; n],
            hole_extra_height_by_diameter: vec![0.0; n],
            bottom_clearance_fraction: 0.0,
            top_clearance_fraction: 0.0,
            cone_step: DEFAULT_CONE_STEP,
            corrections: EndCorrections::default(),
            search: SearchParameters::default(),
            weights: ObjectiveWeights::default(),
            pool: PoolParameters::default(),
            head: None,
        }
    }

    pub fn with_fingerings(mut self, fingerings: Vec<Fingering>) -> Self {
        self.fingerings = fingerings;
        self
    }

    pub fn with_closed_top(mut self, closed_top: bool) -> Self {
        self.closed_top = closed_top;
        self
    }

    pub fn with_pool(mut self, pool: PoolParameters) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_head(mut self, head: WhistleHead) -> Self {
        self.head = Some(head);
        self
    }

    /// The instrument as scored: `inst` itself, or with the whistle head
    /// folded in.
    pub fn patched<'a>(&self, inst: &'a Instrument) -> Cow<'a, Instrument> {
        let (Some(head), Some(bore), Some(outer)) = (
            &self.head,
            self.inner_diameters.last(),
            self.outer_diameters.last(),
        ) else {
            return Cow::Borrowed(inst);
        };
        let bore = bore.high();
        let outside = if self.outer_add {
            outer.high() + bore
        } else {
            outer.high()
        };
        Cow::Owned(head.apply(inst, bore, outside))
    }

    pub fn n_holes(&self) -> usize {
        self.max_hole_diameters.len()
    }

    /// Length multiplier implied by `transpose`.
    pub fn scale(&self) -> f64 {
        2f64.powf(-self.transpose as f64 / 12.0)
    }

    /// Number of entries in a design state vector.
    pub fn state_len(&self) -> usize {
        1 + 2 * self.n_holes() + self.inner_diameters.len() - 2 + self.outer_diameters.len() - 2
    }

    /// Check that every table has the arity the hole and breakpoint counts
    /// require, and that every target note parses.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_holes();
        let check = |what: &str, got: usize, want: usize| -> Result<()> {
            if got == want {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "{what} has {got} entries, expected {want}"
                )))
            }
        };

        if !(self.initial_length > 0.0) {
            return Err(Error::Config("initial_length must be positive".to_string()));
        }
        if !(self.cone_step > 0.0) {
            return Err(Error::Config("cone_step must be positive".to_string()));
        }
        if self.inner_diameters.len() < 2 {
            return Err(Error::Config("inner_diameters needs at least 2 entries".to_string()));
        }
        if self.outer_diameters.len() < 2 {
            return Err(Error::Config("outer_diameters needs at least 2 entries".to_string()));
        }
        if self.fingerings.is_empty() {
            return Err(Error::Config("no fingerings to design for".to_string()));
        }

        let n_inner = self.inner_diameters.len();
        let n_outer = self.outer_diameters.len();
        check("initial_inner_fractions", self.initial_inner_fractions.len(), n_inner - 2)?;
        check("min_inner_fraction_sep", self.min_inner_fraction_sep.len(), n_inner - 1)?;
        if let Some(max) = &self.max_inner_fraction_sep {
            check("max_inner_fraction_sep", max.len(), n_inner - 1)?;
        }
        check("initial_outer_fractions", self.initial_outer_fractions.len(), n_outer - 2)?;
        check("min_outer_fraction_sep", self.min_outer_fraction_sep.len(), n_outer - 1)?;
        if let Some(max) = &self.max_outer_fraction_sep {
            check("max_outer_fraction_sep", max.len(), n_outer - 1)?;
        }

        check("min_hole_diameters", self.min_hole_diameters.len(), n)?;
        check("initial_hole_fractions", self.initial_hole_fractions.len(), n)?;
        check(
            "initial_hole_diameter_fractions",
            self.initial_hole_diameter_fractions.len(),
            n,
        )?;
        check("hole_angles", self.hole_angles.len(), n)?;
        check("hole_horiz_angles", self.hole_horiz_angles.len(), n)?;
        check(
            "hole_extra_height_by_diameter",
            self.hole_extra_height_by_diameter.len(),
            n,
        )?;
        check("min_hole_spacing", self.min_hole_spacing.len(), n.saturating_sub(1))?;
        check("max_hole_spacing", self.max_hole_spacing.len(), n.saturating_sub(1))?;
        check("balance", self.balance.len(), n.saturating_sub(2))?;

        for (i, fingering) in self.fingerings.iter().enumerate() {
            if fingering.fingers.len() != n {
                return Err(Error::Config(format!(
                    "fingering {i} ({:?}) has {} holes, expected {n}",
                    fingering.note,
                    fingering.fingers.len()
                )));
            }
            if fingering.harmonic == Some(0) {
                return Err(Error::Config(format!("fingering {i} targets harmonic 0")));
            }
            fingering.note.frequency()?;
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Six-hole tin whistle in D with pennywhistle fingering.
    pub fn folk_whistle() -> Self {
        let transpose = 12;
        let scale = 2f64.powf(-transpose as f64 / 12.0);
        let bore = scale.sqrt() * 1.1;
        let initial_length = note_wavelength("D4") * 0.5;

        let mut config = Self::new(
            "folk whistle",
            initial_length,
            scale_diameters(&[14.0, 14.0, 20.0, 22.0, 22.0, 20.0, 20.0], bore),
            scale_diameters(&[40.0, 28.0, 28.0, 32.0, 32.0], bore),
            vec![(12.0 * bore).min(12.0); 6],
        );
        config.transpose = transpose;
        config.head = Some(WhistleHead::default());
        config.initial_inner_fractions = vec![0.2, 0.6, 0.65, 0.7, 0.75];
        config.min_inner_fraction_sep = vec![0.01, 0.5, 0.01, 0.01, 0.01, 0.01];
        config.initial_outer_fractions = vec![0.15, 0.5, 0.85];
        config.min_outer_fraction_sep = vec![0.15, 0.3, 0.35, 0.15];
        config.min_hole_diameters = scale_all(&[3.0; 6], bore);
        config.balance = vec![Some(0.05), None, None, Some(0.05)];
        config.min_hole_spacing = scale_some(&[None, None, Some(35.0), None, None], scale);
        config.max_hole_spacing = scale_some(
            &[Some(35.0), Some(35.0), None, Some(35.0), Some(35.0)],
            scale.sqrt(),
        );
        config.fingerings = patterns(&[
            ("D4", &[1, 1, 1, 1, 1, 1]),
            ("E4", &[0, 1, 1, 1, 1, 1]),
            ("F#4", &[0, 0, 1, 1, 1, 1]),
            ("G4", &[0, 0, 0, 1, 1, 1]),
            ("A4", &[0, 0, 0, 0, 1, 1]),
            ("B4", &[0, 0, 0, 0, 0, 1]),
            ("C5", &[0, 0, 0, 1, 1, 0]),
            ("C#5", &[0, 0, 0, 0, 0, 0]),
            ("D5", &[1, 1, 1, 1, 1, 0]),
            ("E5", &[0, 1, 1, 1, 1, 1]),
            ("F#5", &[0, 0, 1, 1, 1, 1]),
            ("G5", &[0, 0, 0, 1, 1, 1]),
            ("A5", &[0, 0, 0, 0, 1, 1]),
            ("B5", &[0, 0, 0, 0, 0, 1]),
            ("D6", &[1, 1, 1, 1, 1, 1]),
        ]);
        config
    }

    /// Side-blown flute with a straight bore and folk fingering. The
    /// seventh hole is the embouchure and is always open.
    pub fn straight_folk_flute() -> Self {
        let initial_length = note_wavelength("D4") * 0.5;
        let mut config = Self::new(
            "straight folk flute",
            initial_length,
            scale_diameters(&[18.4, 18.4, 21.0, 18.4, 18.4], 1.0),
            scale_diameters(&[28.0, 28.0], 1.0),
            vec![11.4, 11.4, 11.4, 11.4, 11.4, 11.4, 13.9],
        );
        config.closed_top = true;
        config.initial_inner_fractions = vec![0.7, 0.8, 0.9];
        config.min_inner_fraction_sep = vec![0.5, 0.03, 0.0, 0.0];
        config.min_hole_diameters = vec![7.5, 7.5, 7.5, 7.5, 7.5, 7.5, 12.2];
        config.initial_hole_fractions = (0..6)
            .map(|i| 0.175 + 0.5 * i as f64 / 6.0)
            .chain(std::iter::once(0.97))
            .collect();
        config.balance = vec![Some(0.05), None, None, Some(0.05), None];
        config.hole_angles = vec![-30.0, 30.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        config.hole_extra_height_by_diameter = vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.53];
        config.fingerings = patterns(&[
            ("D4", &[1, 1, 1, 1, 1, 1, 0]),
            ("E4", &[0, 1, 1, 1, 1, 1, 0]),
            ("F#4", &[0, 0, 1, 1, 1, 1, 0]),
            ("G4", &[0, 0, 0, 1, 1, 1, 0]),
            ("A4", &[0, 0, 0, 0, 1, 1, 0]),
            ("B4", &[0, 0, 0, 0, 0, 1, 0]),
            ("C5", &[0, 0, 0, 1, 1, 0, 0]),
            ("C#5", &[0, 0, 0, 0, 0, 0, 0]),
            ("D5", &[1, 1, 1, 1, 1, 0, 0]),
            ("E5", &[0, 1, 1, 1, 1, 1, 0]),
            ("F#5", &[0, 0, 1, 1, 1, 1, 0]),
            ("G5", &[0, 0, 0, 1, 1, 1, 0]),
            ("A5", &[0, 0, 0, 0, 1, 1, 0]),
            ("B5", &[0, 0, 0, 0, 0, 1, 0]),
            ("C#6", &[1, 1, 1, 0, 0, 0, 0]),
            ("D6", &[1, 1, 1, 1, 1, 0, 0]),
        ]);
        config
    }

    /// Three-hole pipe as played with a tabor, overblown for most notes.
    pub fn three_hole_pipe() -> Self {
        let transpose = 20;
        let scale = 2f64.powf(-transpose as f64 / 12.0);
        let bore = scale.sqrt() * 1.2;
        let initial_length = note_wavelength("D3") * 0.5;

        let mut config = Self::new(
            "three hole pipe",
            initial_length,
            scale_diameters(&[10.0, 10.0, 12.5, 15.0, 17.5, 20.0, 20.0], bore),
            scale_diameters(&[45.0, 32.0, 32.0], bore),
            scale_all(&[14.0; 3], bore),
        );
        config.transpose = transpose;
        config.head = Some(WhistleHead::default());
        config.initial_inner_fractions = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        config.min_inner_fraction_sep = vec![0.01; 6];
        config.initial_outer_fractions = vec![0.1];
        config.min_outer_fraction_sep = vec![0.095, 0.0];
        config.max_outer_fraction_sep = Some(vec![0.105, 1.0]);
        config.min_hole_diameters = scale_all(&[3.0; 3], bore);
        config.max_hole_spacing = scale_some(&[Some(100.0), Some(100.0)], scale);
        config.top_clearance_fraction = 0.6;
        config.hole_angles = vec![-30.0, 30.0, 30.0];
        config.hole_horiz_angles = vec![0.0, 0.0, 180.0];
        config.initial_hole_fractions = vec![0.1, 0.15, 0.2];
        config.fingerings = patterns(&[
            ("D3", &[1, 1, 1]),
            ("E3", &[0, 1, 1]),
            ("F#3", &[0, 0, 1]),
            ("G3", &[0, 0, 0]),
            ("D4", &[1, 1, 1]),
            ("E4", &[0, 1, 1]),
            ("F#4", &[0, 0, 1]),
            ("G4", &[0, 0, 0]),
            ("A4", &[1, 1, 1]),
            ("B4", &[0, 1, 1]),
            ("C#5", &[0, 0, 1]),
            ("D5", &[0, 0, 0]),
            ("D5", &[1, 1, 1]),
            ("E5", &[0, 1, 1]),
            ("F#5", &[0, 0, 1]),
            ("G5", &[0, 0, 0]),
        ]);
        config
    }

    /// Shawm with recorder-like fingering and a flared bell. The flare is
    /// decorative; the bore breakpoint spacing is chosen to draw it.
    pub fn shawm() -> Self {
        const INNER: [f64; 16] = [
            75.0, 70.0, 65.0, 60.0, 55.0, 50.0, 45.0, 40.0, 35.0, 30.0, 25.0, 20.0, 15.0, 10.0, 6.0, 6.0,
        ];
        // Reed diameter over the 6 mm the tables are drawn for.
        let bore = 4.0 / 6.0;

        let flare: Vec<f64> = INNER.iter().map(|d| (1.0 - d / INNER[0]).powi(2)).collect();
        let mut min_inner_fraction_sep: Vec<f64> = flare
            .windows(2)
            .take(INNER.len() - 2)
            .map(|w| ((w[0] + w[1]) * (w[1] - w[0])).min(0.05))
            .collect();
        min_inner_fraction_sep.push(0.1);
        let mut floor: Vec<f64> = min_inner_fraction_sep.iter().map(|sep| sep + 0.01).collect();
        for i in 1..floor.len() {
            floor[i] += floor[i - 1];
        }
        let initial_inner_fractions = (1..INNER.len() - 1)
            .map(|i| floor[i - 1].max(1.0 - 2.0 * INNER[i] / INNER[0]))
            .collect();

        let mut config = Self::new(
            "shawm",
            note_wavelength("C4") * 0.4,
            scale_diameters(&INNER, bore),
            scale_diameters(&[16.0, 10.0], bore),
            scale_all(&[12.0; 8], bore),
        );
        config.closed_top = true;
        config.outer_add = true;
        config.initial_inner_fractions = initial_inner_fractions;
        config.min_inner_fraction_sep = min_inner_fraction_sep;
        config.min_hole_diameters = scale_all(&[4.5; 8], bore);
        config.initial_hole_diameter_fractions = vec![0.25; 8];
        config.initial_hole_fractions = [6, 5, 4, 3, 2, 1, 0, 0]
            .iter()
            .map(|&i| 0.5 - 0.06 * i as f64)
            .collect();
        config.max_hole_spacing = vec![
            Some(40.0),
            Some(40.0),
            Some(40.0),
            None,
            Some(40.0),
            Some(40.0),
            Some(20.0),
        ];
        config.balance = vec![Some(0.2), Some(0.1), Some(0.3), Some(0.3), Some(0.1), None];
        config.hole_angles = vec![-30.0, -30.0, -30.0, 30.0, 0.0, 0.0, 0.0, 0.0];
        config.hole_horiz_angles = vec![-20.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 180.0];
        config.search.max_grad = 10.0;
        config.fingerings = patterns(&[
            ("C4", &[1, 1, 1, 1, 1, 1, 1, 1]),
            ("D4", &[0, 1, 1, 1, 1, 1, 1, 1]),
            ("E4", &[0, 0, 1, 1, 1, 1, 1, 1]),
            ("F4", &[1, 1, 0, 1, 1, 1, 1, 1]),
            ("F#4", &[0, 1, 1, 0, 1, 1, 1, 1]),
            ("G4", &[0, 0, 0, 0, 1, 1, 1, 1]),
            ("G#4", &[0, 1, 1, 1, 0, 1, 1, 1]),
            ("A4", &[0, 0, 0, 0, 0, 1, 1, 1]),
            ("Bb4", &[0, 0, 0, 1, 1, 0, 1, 1]),
            ("B4", &[0, 0, 0, 0, 0, 0, 1, 1]),
            ("C5", &[0, 0, 0, 0, 0, 1, 0, 1]),
            ("C#5", &[0, 0, 0, 0, 0, 1, 1, 0]),
            ("D5", &[0, 0, 0, 0, 0, 1, 0, 0]),
            ("C5", &[1, 1, 1, 1, 1, 1, 1, 1]),
            ("D5", &[0, 1, 1, 1, 1, 1, 1, 1]),
            ("E5", &[0, 0, 1, 1, 1, 1, 1, 1]),
            // Register hole right at the node for E.
            ("E5", &[0, 0, 1, 1, 1, 1, 1, 0]),
            ("F5", &[0, 1, 0, 1, 1, 1, 1, 1]),
            ("F#5", &[0, 0, 1, 0, 1, 1, 1, 1]),
            ("G5", &[0, 0, 0, 0, 1, 1, 1, 1]),
            ("A5", &[0, 0, 0, 0, 0, 1, 1, 1]),
            ("C4*3", &[1, 1, 1, 1, 1, 1, 1, 1]),
            ("C4*4", &[1, 1, 1, 1, 1, 1, 1, 1]),
        ]);
        config
    }

    /// Look up a built-in preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "folk_whistle" | "folk whistle" => Some(Self::folk_whistle()),
            "straight_folk_flute" | "straight folk flute" => Some(Self::straight_folk_flute()),
            "three_hole_pipe" | "three hole pipe" => Some(Self::three_hole_pipe()),
            "shawm" => Some(Self::shawm()),
            _ => None,
        }
    }
}

fn patterns(table: &[(&str, &[u8])]) -> Vec<Fingering> {
    table
        .iter()
        .map(|(note, pattern)| Fingering::from_pattern(note, pattern))
        .collect()
}

/// Untransposed wavelength of a hard-coded preset note.
fn note_wavelength(name: &str) -> f64 {
    // Preset note names are literals known to parse.
    NoteSpec::name(name).wavelength(0).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for config in [
            DesignerConfig::folk_whistle(),
            DesignerConfig::straight_folk_flute(),
            DesignerConfig::three_hole_pipe(),
            DesignerConfig::shawm(),
        ] {
            config.validate().unwrap();
        }
        assert!(DesignerConfig::preset("folk_whistle").is_some());
        assert!(DesignerConfig::preset("bagpipe").is_none());
    }

    #[test]
    fn state_len_counts_every_parameter() {
        let config = DesignerConfig::folk_whistle();
        assert_eq!(config.state_len(), 1 + 6 + 6 + 5 + 3);
    }

    #[test]
    fn shawm_bore_table_is_consistent() {
        let config = DesignerConfig::shawm();
        assert_eq!(config.state_len(), 1 + 16 + 14);
        assert_eq!(config.min_inner_fraction_sep.last(), Some(&0.1));
        assert!(config.min_inner_fraction_sep.iter().all(|&sep| (0.0..=0.1).contains(&sep)));
        // Every initial breakpoint clears the cumulative minimum spacing.
        let mut floor = 0.0;
        for (fraction, sep) in config.initial_inner_fractions.iter().zip(&config.min_inner_fraction_sep) {
            floor += sep + 0.01;
            assert!(*fraction >= floor - 1e-12);
        }
        assert!(config.head.is_none());
    }

    #[test]
    fn defaults_follow_hole_count() {
        let config = DesignerConfig::new(
            "test",
            300.0,
            vec![Diameter::Same(15.0), Diameter::Same(15.0)],
            vec![Diameter::Same(25.0), Diameter::Same(25.0)],
            vec![8.0; 4],
        );
        assert_eq!(config.initial_hole_fractions.len(), 4);
        assert!((config.initial_hole_fractions[0] - 0.25).abs() < 1e-12);
        assert_eq!(config.max_hole_spacing, vec![Some(300.0); 3]);
        assert_eq!(config.balance.len(), 2);
        assert!(config.initial_inner_fractions.is_empty());
    }

    #[test]
    fn arity_errors_are_reported() {
        let mut config = DesignerConfig::folk_whistle();
        config.hole_angles.pop();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = DesignerConfig::folk_whistle();
        config.fingerings[3].fingers.push(true);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = DesignerConfig::folk_whistle();
        config.fingerings[0].note = NoteSpec::name("X9");
        assert!(matches!(config.validate(), Err(Error::Note(_))));
    }

    #[test]
    fn json_round_trip() {
        let config = DesignerConfig::three_hole_pipe();
        let json = config.to_json().unwrap();
        let back = DesignerConfig::from_json(&json).unwrap();
        assert_eq!(back.fingerings, config.fingerings);
        assert_eq!(back.max_outer_fraction_sep.as_ref().map(Vec::len), Some(2));
        assert_eq!(back.hole_horiz_angles, config.hole_horiz_angles);
        assert_eq!(back.state_len(), config.state_len());
        assert_eq!(back.head, Some(WhistleHead::default()));
    }

    #[test]
    fn whistle_presets_carry_a_head() {
        assert!(DesignerConfig::folk_whistle().head.is_some());
        assert!(DesignerConfig::three_hole_pipe().head.is_some());
        assert!(DesignerConfig::straight_folk_flute().head.is_none());
    }

    #[test]
    fn patching_uses_the_top_diameters() {
        let config = DesignerConfig::folk_whistle();
        let inst = Instrument::cylinder(250.0, 20.0, 30.0, false);
        let bore = config.inner_diameters[6].high();
        let outside = config.outer_diameters[4].high();
        let head = WhistleHead::default();
        let expected = 250.0 - 0.3 * 20.0 + head.window_length(bore, outside);
        assert!((config.patched(&inst).length - expected).abs() < 1e-9);

        let flute = DesignerConfig::straight_folk_flute();
        assert!(matches!(flute.patched(&inst), Cow::Borrowed(_)));
    }
}
