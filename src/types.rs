//! Units, constants, and note handling shared across the crate.
//!
//! Units used throughout:
//! - distance: mm
//! - time: seconds
//! - frequency: Hz
//!
//! Positions are measured from the bottom end of the instrument; the
//! mouthpiece sits at `instrument.length`. Finger holes are enumerated from
//! the bottom (end-most) to the top.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Speed of sound in mm/s at 25°C (30°C would be 349000).
pub const SPEED_OF_SOUND: f64 = 346_100.0;

/// Cents per natural-log unit of frequency ratio (1200 / ln 2).
pub const CENTS_PER_NEPER: f64 = 1200.0 / std::f64::consts::LN_2;

/// Semitone offset of A4 from C0.
const A4_SEMITONE: i32 = 57;

/// Reference pitch of A4 (Hz).
const A4_HZ: f64 = 440.0;

const SEMITONE_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "G#", "A", "Bb", "B",
];

/// A target note, either by name (`"F#4"`, `"D5*2"`) or as an explicit frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoteSpec {
    Frequency(f64),
    Name(String),
}

impl NoteSpec {
    pub fn name(name: impl Into<String>) -> Self {
        NoteSpec::Name(name.into())
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> Result<f64> {
        match self {
            NoteSpec::Frequency(hz) if *hz > 0.0 => Ok(*hz),
            NoteSpec::Frequency(hz) => Err(Error::Note(format!("non-positive frequency {hz}"))),
            NoteSpec::Name(name) => note_frequency(name),
        }
    }

    /// Wavelength in mm after transposing by `transpose` semitones.
    pub fn wavelength(&self, transpose: i32) -> Result<f64> {
        Ok(transposed_wavelength(SPEED_OF_SOUND / self.frequency()?, transpose))
    }
}

impl From<&str> for NoteSpec {
    fn from(name: &str) -> Self {
        NoteSpec::Name(name.to_string())
    }
}

/// A note the design must play, and the finger pattern that plays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingering {
    pub note: NoteSpec,
    /// One entry per hole, bottom first. `true` = closed.
    pub fingers: Vec<bool>,
    /// Resonance mode to target, 1 = first resonance above zero frequency.
    /// `None` targets whichever resonance lies nearest the note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harmonic: Option<u32>,
}

impl Fingering {
    pub fn new(note: impl Into<NoteSpec>, fingers: Vec<bool>) -> Self {
        Self {
            note: note.into(),
            fingers,
            harmonic: None,
        }
    }

    /// Build from a 0/1 pattern as usually written in fingering charts.
    pub fn from_pattern(note: &str, pattern: &[u8]) -> Self {
        Self::new(note, pattern.iter().map(|&p| p != 0).collect())
    }

    pub fn with_harmonic(mut self, harmonic: u32) -> Self {
        self.harmonic = Some(harmonic);
        self
    }
}

/// Parse a note name such as `"C4"`, `"F#5"`, `"Bb3"` or `"D4*2"` into Hz.
pub fn note_frequency(note: &str) -> Result<f64> {
    let (name, mult) = match note.split_once('*') {
        Some((name, mult)) => {
            let mult: f64 = mult
                .trim()
                .parse()
                .map_err(|_| Error::Note(format!("bad multiplier in {note:?}")))?;
            (name.trim(), mult)
        }
        None => (note.trim(), 1.0),
    };

    let mut chars = name.chars();
    let letter = chars
        .next()
        .ok_or_else(|| Error::Note("empty note name".to_string()))?;
    let mut semitone: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(Error::Note(format!("unknown note letter in {note:?}"))),
    };

    let mut rest = chars.as_str();
    if let Some(stripped) = rest.strip_prefix('b') {
        semitone -= 1;
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_prefix('#') {
        semitone += 1;
        rest = stripped;
    }
    let octave: i32 = rest
        .parse()
        .map_err(|_| Error::Note(format!("bad octave in {note:?}")))?;
    semitone += 12 * octave;

    Ok(A4_HZ * 2f64.powf((semitone - A4_SEMITONE) as f64 / 12.0) * mult)
}

/// Shift a wavelength by `transpose` semitones (positive = higher pitch).
pub fn transposed_wavelength(wavelength: f64, transpose: i32) -> f64 {
    wavelength / 2f64.powf(transpose as f64 / 12.0)
}

/// Nearest note name for a wavelength in mm.
pub fn describe(wavelength: f64) -> String {
    let freq = SPEED_OF_SOUND / wavelength;
    let s = ((freq / A4_HZ).log2() * 12.0 + A4_SEMITONE as f64).round() as i32;
    let octave = s.div_euclid(12);
    format!("{}{}", SEMITONE_NAMES[s.rem_euclid(12) as usize], octave)
}

/// Signed error in cents of `actual` relative to `target` wavelength.
/// Positive means flat (actual wavelength too long).
#[inline]
pub fn cents_between(target: f64, actual: f64) -> f64 {
    (actual / target).ln() * CENTS_PER_NEPER
}
