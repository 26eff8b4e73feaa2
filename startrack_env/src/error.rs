//! Error types for the StarTrack environment layer.

use thiserror::Error;

/// Errors raised while reading inputs or persisting outputs.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Underlying filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TIFF decoding/encoding failure
    #[error("TIFF error in {path}: {message}")]
    Tiff { path: String, message: String },

    /// Image content does not describe a usable stack
    #[error("Invalid image {name}: {reason}")]
    InvalidImage { name: String, reason: String },

    /// Requested entry does not exist in the store
    #[error("Not found: {0}")]
    NotFound(String),
}

impl EnvError {
    /// Creates an I/O error bound to a path.
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    /// Creates a TIFF error bound to a path.
    pub fn tiff(path: impl std::fmt::Display, err: tiff::TiffError) -> Self {
        Self::Tiff {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// Creates an invalid-image error.
    pub fn invalid_image(name: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
