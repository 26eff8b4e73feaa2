//! StarTrack Environment Abstraction Layer
//!
//! This crate isolates everything the pipeline reads from or writes to the
//! outside world, so the detection and tracking engines stay pure:
//! - **Images**: calibrated XYCZT stacks ([`ImageStack`]) and rendered
//!   overlays ([`RgbStack`])
//! - **Storage**: the [`ImageStore`] trait, with a filesystem implementation
//!   ([`FsStore`]) and an in-memory one ([`MemoryStore`])
//! - **Codecs**: multi-page TIFF with ImageJ hyperstack metadata ([`tiff_io`])
//!
//! # Example
//!
//! ```ignore
//! use startrack_env::{FsStore, ImageStore};
//!
//! let store = FsStore::open("/data/movies")?;
//! for name in store.list_inputs(".tif")? {
//!     let stack = store.open_stack(&name)?;
//!     println!("{}: {:?}", name, stack.dims());
//! }
//! ```

mod error;
mod fs_impl;
mod memory;
mod store;
pub mod tiff_io;
mod types;

pub use error::EnvError;
pub use fs_impl::{FsStore, OUTPUT_DIR_NAME};
pub use memory::{Artifact, MemoryStore};
pub use store::{select_inputs, EntryKind, ImageStore};
pub use types::{Calibration, Dimensions, ImageStack, RgbStack};
