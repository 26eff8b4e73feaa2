//! Detection and tracking parameters.
//!
//! `TrackingParameters` is captured once per batch (flags, config file or the
//! interactive prompt), validated, and then shared read-only by every file.
//! `DetectorSettings` holds the fixed detector constants of this pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// TRACKING PARAMETERS
// ============================================================================

/// Linking, gap-closing and splitting limits for the LAP tracker.
///
/// Distances are in the calibrated spatial unit of the stack. Track merging
/// is not a field: it is always disabled (see [`Self::allow_track_merging`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingParameters {
    /// Maximum frame-to-frame link distance (default: 20.0)
    pub linking_max_distance: f64,

    /// Bridge missing detections (default: true)
    pub allow_gap_closing: bool,

    /// Maximum distance of a gap-closing link (default: 20.0)
    pub gap_closing_max_distance: f64,

    /// Maximum frame difference of a gap-closing link (default: 2)
    pub max_frame_gap: u32,

    /// Allow one track to branch into two (default: true)
    pub allow_track_splitting: bool,

    /// Maximum distance of a splitting link (default: 20.0)
    pub splitting_max_distance: f64,
}

impl Default for TrackingParameters {
    fn default() -> Self {
        Self {
            linking_max_distance: 20.0,
            allow_gap_closing: true,
            gap_closing_max_distance: 20.0,
            max_frame_gap: 2,
            allow_track_splitting: true,
            splitting_max_distance: 20.0,
        }
    }
}

impl TrackingParameters {
    /// Track merging is never allowed by this pipeline.
    #[inline]
    pub fn allow_track_merging(&self) -> bool {
        false
    }

    /// Checks every range constraint.
    ///
    /// Limits of a disabled feature are still required to be valid numbers
    /// but not positive, so a disabled feature never blocks a run.
    pub fn validate(&self) -> Result<(), ParamError> {
        check_positive("linking_max_distance", self.linking_max_distance)?;

        if self.allow_gap_closing {
            check_positive("gap_closing_max_distance", self.gap_closing_max_distance)?;
        } else {
            check_finite("gap_closing_max_distance", self.gap_closing_max_distance)?;
        }

        if self.allow_track_splitting {
            check_positive("splitting_max_distance", self.splitting_max_distance)?;
        } else {
            check_finite("splitting_max_distance", self.splitting_max_distance)?;
        }

        Ok(())
    }

    /// Returns the parameters after validation.
    pub fn validated(self) -> Result<Self, ParamError> {
        self.validate()?;
        Ok(self)
    }

    /// Whether the second (segment linking) LAP is needed at all.
    pub fn needs_segment_linking(&self) -> bool {
        (self.allow_gap_closing && self.max_frame_gap >= 1) || self.allow_track_splitting
    }

    /// Converts a frame gap typed as a number (the dialog collects floats).
    pub fn frame_gap_from_f64(value: f64) -> Result<u32, ParamError> {
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
            return Err(ParamError::InvalidFrameGap(value));
        }
        Ok(value as u32)
    }
}

fn check_finite(name: &'static str, value: f64) -> Result<(), ParamError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParamError::NotFinite { name, value })
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ParamError> {
    check_finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ParamError::NotPositive { name, value })
    }
}

// ============================================================================
// DETECTOR SETTINGS
// ============================================================================

/// LoG detector settings.
///
/// Sub-pixel localisation and median pre-filtering are never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// Expected blob radius in calibrated units (default: 2.0)
    pub radius: f64,

    /// 1-based channel to detect in (default: 3)
    pub target_channel: usize,

    /// Minimum LoG response for a spot (default: 0.001)
    pub threshold: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            radius: 2.0,
            target_channel: 3,
            threshold: 0.001,
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<(), ParamError> {
        check_positive("radius", self.radius)?;
        check_finite("threshold", self.threshold)?;
        if self.target_channel == 0 {
            return Err(ParamError::InvalidChannel(self.target_channel));
        }
        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Parameter range violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("{name} must be a finite number, got {value}")]
    NotFinite { name: &'static str, value: f64 },

    #[error("{name} must be > 0, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("max frame gap must be a non-negative integer, got {0}")]
    InvalidFrameGap(f64),

    #[error("target channel is 1-based, got {0}")]
    InvalidChannel(usize),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_match_dialog() {
        let params = TrackingParameters::default();
        assert_eq!(params.linking_max_distance, 20.0);
        assert!(params.allow_gap_closing);
        assert_eq!(params.gap_closing_max_distance, 20.0);
        assert_eq!(params.max_frame_gap, 2);
        assert!(params.allow_track_splitting);
        assert_eq!(params.splitting_max_distance, 20.0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_detector_defaults() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.radius, 2.0);
        assert_eq!(settings.target_channel, 3);
        assert_eq!(settings.threshold, 0.001);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_linking_distance() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let params = TrackingParameters {
                linking_max_distance: bad,
                ..Default::default()
            };
            assert!(params.validate().is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_disabled_feature_limits_not_required_positive() {
        let params = TrackingParameters {
            allow_gap_closing: false,
            gap_closing_max_distance: 0.0,
            allow_track_splitting: false,
            splitting_max_distance: -5.0,
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        let enabled = TrackingParameters {
            allow_gap_closing: true,
            ..params
        };
        assert_eq!(
            enabled.validate(),
            Err(ParamError::NotPositive {
                name: "gap_closing_max_distance",
                value: 0.0
            })
        );
    }

    #[test]
    fn test_frame_gap_from_f64() {
        assert_eq!(TrackingParameters::frame_gap_from_f64(2.0), Ok(2));
        assert_eq!(TrackingParameters::frame_gap_from_f64(0.0), Ok(0));
        assert!(TrackingParameters::frame_gap_from_f64(2.5).is_err());
        assert!(TrackingParameters::frame_gap_from_f64(-1.0).is_err());
        assert!(TrackingParameters::frame_gap_from_f64(f64::NAN).is_err());
    }

    #[test]
    fn test_json_partial_config_uses_defaults() {
        let params: TrackingParameters =
            serde_json::from_str(r#"{ "linking_max_distance": 5.0, "allow_track_splitting": false }"#)
                .unwrap();
        assert_eq!(params.linking_max_distance, 5.0);
        assert!(!params.allow_track_splitting);
        assert_eq!(params.max_frame_gap, 2);
    }

    #[test]
    fn test_json_cannot_enable_merging() {
        let result: Result<TrackingParameters, _> =
            serde_json::from_str(r#"{ "allow_track_merging": true }"#);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_merging_never_enabled(
            gap in any::<bool>(),
            split in any::<bool>(),
            link in 0.1f64..100.0,
            frame_gap in 0u32..10,
        ) {
            let params = TrackingParameters {
                linking_max_distance: link,
                allow_gap_closing: gap,
                max_frame_gap: frame_gap,
                allow_track_splitting: split,
                ..Default::default()
            };
            prop_assert!(!params.allow_track_merging());
        }
    }
}
