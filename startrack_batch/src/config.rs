//! Parameter sources: JSON config file and command-line overrides.
//!
//! Precedence, lowest first: built-in defaults, `--config` file, explicit
//! flags. The interactive prompt replaces all three.

use std::fs;
use std::path::{Path, PathBuf};

use startrack_core::{ParamError, TrackingParameters};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error(transparent)]
    Invalid(#[from] ParamError),
}

/// Parameters given explicitly on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterOverrides {
    pub linking_max_distance: Option<f64>,
    pub allow_gap_closing: Option<bool>,
    pub gap_closing_max_distance: Option<f64>,
    pub max_frame_gap: Option<u32>,
    pub allow_track_splitting: Option<bool>,
    pub splitting_max_distance: Option<f64>,
}

impl ParameterOverrides {
    pub fn apply(&self, mut params: TrackingParameters) -> TrackingParameters {
        if let Some(v) = self.linking_max_distance {
            params.linking_max_distance = v;
        }
        if let Some(v) = self.allow_gap_closing {
            params.allow_gap_closing = v;
        }
        if let Some(v) = self.gap_closing_max_distance {
            params.gap_closing_max_distance = v;
        }
        if let Some(v) = self.max_frame_gap {
            params.max_frame_gap = v;
        }
        if let Some(v) = self.allow_track_splitting {
            params.allow_track_splitting = v;
        }
        if let Some(v) = self.splitting_max_distance {
            params.splitting_max_distance = v;
        }
        params
    }
}

/// Reads tracking parameters from a JSON file; missing fields take defaults.
pub fn load_config(path: &Path) -> Result<TrackingParameters, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merges defaults, an optional config file and overrides, then validates.
pub fn resolve_parameters(
    config: Option<&Path>,
    overrides: &ParameterOverrides,
) -> Result<TrackingParameters, ConfigError> {
    let base = match config {
        Some(path) => load_config(path)?,
        None => TrackingParameters::default(),
    };
    Ok(overrides.apply(base).validated()?)
}
