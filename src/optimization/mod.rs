//! Bore optimization.
//!
//! A design is a flat state vector (see [`encoding`]). The designer scores
//! vectors by geometric feasibility first and tuning error second, and the
//! pool optimizer in [`pool`] searches the vector space.
//!
//! # Example
//!
//! ```no_run
//! use windbore::optimization::{Designer, DesignerConfig, PoolParameters, ProgressUpdate};
//!
//! let config = DesignerConfig::three_hole_pipe()
//!     .with_pool(PoolParameters::default().with_workers(4));
//! let designer = Designer::new(config).unwrap();
//!
//! let outcome = designer
//!     .design(Some(|update: ProgressUpdate| {
//!         println!("best so far: {}", update.best.score);
//!     }))
//!     .unwrap();
//!
//! for entry in &outcome.report {
//!     println!("{} -> {} ({:+.1} cents)", entry.target_note, entry.actual_note, entry.cents);
//! }
//! ```

pub mod config;
pub mod constraints;
pub mod designer;
pub mod encoding;
pub mod head;
pub mod objective;
pub mod pool;
pub mod proposal;
pub mod types;

pub use config::{Diameter, DesignerConfig};
pub use constraints::{constraint_checks, constraint_score};
pub use designer::{DesignOutcome, Designer};
pub use encoding::{initial_state_vec, signed_sqrt, unpack};
pub use head::WhistleHead;
pub use objective::{cents_error, fingering_report, score, FingeringReport, ObjectiveWeights};
pub use pool::{improve, improve_on, improve_with};
pub use proposal::make_update;
pub use types::{
    Candidate, PoolOutcome, PoolParameters, ProgressUpdate, Score, Termination,
};
