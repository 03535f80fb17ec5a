//! Wind instrument bore design.
//!
//! An [`Instrument`] (bore and wall profiles plus tone holes) is turned into a
//! [`TransformChain`] of reflection transforms, whose resonances are located
//! per fingering. A [`Designer`] searches hole placement, hole sizes, length
//! and bore breakpoints with a population optimizer until each fingering
//! sounds its target note. Candidate evaluation can be spread across worker
//! threads managed by a [`Coordinator`], each of which may hand its jobs to a
//! `windbore-worker` child process.
//!
//! Lengths are in millimetres. Wavelengths stand in for pitch throughout;
//! [`SPEED_OF_SOUND`] converts.
//!
//! # Example
//!
//! ```
//! use windbore::{locate_resonance, EndCorrections, Instrument, SearchParameters};
//!
//! let pipe = Instrument::cylinder(300.0, 15.0, 22.0, true);
//! let chain = pipe.prepare(&EndCorrections::default());
//! let found = locate_resonance(&chain, 1250.0, &[], &SearchParameters::default());
//! assert!(found.converged);
//! assert!((found.wavelength / 4.0 - 300.0).abs() < 15.0);
//! ```

pub mod concurrency;
pub mod error;
pub mod instrument;
pub mod optimization;
pub mod profile;
pub mod resonance;
pub mod types;
pub mod waveguide;

pub use concurrency::{Coordinator, Evaluator, FutureHandle, FutureId, WorkerFault, WorkerPool};
pub use error::{Error, Result};
pub use instrument::Instrument;
pub use optimization::{DesignOutcome, Designer, DesignerConfig};
pub use profile::Profile;
pub use resonance::{locate_harmonic, locate_resonance, Resonance, SearchParameters};
pub use types::{describe, note_frequency, Fingering, NoteSpec, SPEED_OF_SOUND};
pub use waveguide::{EndCorrections, TransformChain};
