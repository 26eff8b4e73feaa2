//! StarTrack Batch - directory-level particle tracking
//!
//! Drives the core engine over every `.tif` stack of an input directory and
//! writes the results next to it:
//!
//! ```text
//! <input>/
//!   cell1.tif
//!   TrackMateAnalysis/
//!     cell1.tif_Overlay.tif   tracks drawn over the detection channel
//!     cell1.tif_Links.txt     edge table
//!     cell1.tif_Spots.txt     spot table
//!     cell1.tif_Tracks.txt    track table
//!     Log.txt                 settings + per-file progress
//! ```
//!
//! Parameters come from defaults, a JSON config, flags or the interactive
//! prompt ([`config`], [`prompt`]). [`synth`] produces seeded demo stacks.
//!
//! # Usage
//!
//! ```ignore
//! use startrack_batch::run_batch;
//! use startrack_core::TrackingParameters;
//!
//! let report = run_batch("/data/movies", TrackingParameters::default())?;
//! println!("{} processed, {} failed", report.processed(), report.failed());
//! ```

pub mod config;
mod log;
pub mod prompt;
mod runner;
pub mod synth;

pub use config::{resolve_parameters, ConfigError, ParameterOverrides};
pub use log::{RunLog, LOG_FILE_NAME};
pub use runner::{run_batch, BatchError, BatchRunner, FailurePolicy, FileOutcome, FileReport, RunReport, Stage};
