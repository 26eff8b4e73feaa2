//! StarTrack Core - Particle Detection and Tracking Engine
//!
//! Turns a calibrated time-lapse stack into tracks and statistics:
//! 1. **Detection**: Laplacian-of-Gaussian blob finder ([`LogDetector`])
//! 2. **Tracking**: LAP frame-to-frame linking, gap closing and splitting ([`LapTracker`])
//! 3. **Statistics**: spot, edge and track tables ([`export_statistics`])
//! 4. **Overlay**: tracks drawn over the detection channel ([`OverlayRenderer`])
//!
//! Track merging is never performed.

pub mod assignment;
pub mod detection;
pub mod features;
pub mod model;
pub mod overlay;
pub mod params;
pub mod table;
pub mod tracking;

// Re-export key types for convenience
pub use detection::{measure_intensities, resolve_channel, DetectionError, LogDetector, ResolvedChannel, SpotDetector};
pub use model::{ChannelIntensity, Edge, Spot, SpotId, SpotsByFrame, Track, TrackModel};
pub use overlay::{OverlayRenderer, OverlayStack};
pub use params::{DetectorSettings, ParamError, TrackingParameters};
pub use table::{export_statistics, Cell, StatisticsTables, Table, TableError};
pub use tracking::{LapTracker, SpotTracker, TrackingError};
