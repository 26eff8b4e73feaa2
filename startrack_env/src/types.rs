//! Common image types shared by every StarTrack stage.

use serde::{Deserialize, Serialize};

use crate::EnvError;

/// Physical calibration of an image stack.
///
/// Mirrors what ImageJ stores next to a hyperstack: a spatial unit with the
/// pixel/voxel size, and a time unit with the frame interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Pixel width in `unit`
    pub pixel_width: f64,

    /// Pixel height in `unit`
    pub pixel_height: f64,

    /// Z spacing in `unit`
    pub voxel_depth: f64,

    /// Spatial unit name (e.g. "micron")
    pub unit: String,

    /// Time between two frames in `time_unit`
    pub frame_interval: f64,

    /// Time unit name (e.g. "sec")
    pub time_unit: String,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pixel_width: 1.0,
            pixel_height: 1.0,
            voxel_depth: 1.0,
            unit: "pixel".to_string(),
            frame_interval: 1.0,
            time_unit: "frame".to_string(),
        }
    }
}

/// Stack dimensions in XYCZT order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub depth: usize,
    pub frames: usize,
}

impl Dimensions {
    /// Creates dimensions for a single-channel 2D time-lapse.
    pub fn time_lapse(width: usize, height: usize, frames: usize) -> Self {
        Self {
            width,
            height,
            channels: 1,
            depth: 1,
            frames,
        }
    }

    /// Number of samples in one plane.
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    /// Number of planes in the stack (C × Z × T).
    pub fn plane_count(&self) -> usize {
        self.channels * self.depth * self.frames
    }

    /// Index of the (c, z, t) plane, channel varying fastest (ImageJ order).
    pub fn plane_index(&self, channel: usize, z: usize, frame: usize) -> usize {
        channel + self.channels * (z + self.depth * frame)
    }

    /// A stack with one time point and several slices is a time-lapse
    /// saved with the wrong axis: treat the slices as frames.
    ///
    /// The plane layout is unchanged because Z and T are adjacent in CZT order.
    pub fn swap_z_into_t(self) -> Self {
        if self.frames == 1 && self.depth > 1 {
            Self {
                depth: 1,
                frames: self.depth,
                ..self
            }
        } else {
            self
        }
    }
}

/// A calibrated multi-dimensional image, one `f32` per sample.
///
/// Immutable once loaded. Dropping it releases the pixel buffer.
#[derive(Debug, Clone)]
pub struct ImageStack {
    name: String,
    dims: Dimensions,
    calibration: Calibration,
    data: Vec<f32>,
}

impl ImageStack {
    /// Creates a stack from planes laid out in CZT order.
    pub fn new(
        name: impl Into<String>,
        dims: Dimensions,
        calibration: Calibration,
        data: Vec<f32>,
    ) -> Result<Self, EnvError> {
        let name = name.into();
        if dims.width == 0 || dims.height == 0 || dims.plane_count() == 0 {
            return Err(EnvError::invalid_image(&name, "empty dimensions"));
        }
        let expected = dims.plane_len() * dims.plane_count();
        if data.len() != expected {
            return Err(EnvError::invalid_image(
                &name,
                format!("expected {} samples, found {}", expected, data.len()),
            ));
        }

        Ok(Self {
            name,
            dims,
            calibration,
            data,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Samples of one plane, row-major.
    pub fn plane(&self, channel: usize, z: usize, frame: usize) -> &[f32] {
        let len = self.dims.plane_len();
        let start = self.dims.plane_index(channel, z, frame) * len;
        &self.data[start..start + len]
    }

    /// Single sample lookup.
    #[inline]
    pub fn value(&self, x: usize, y: usize, channel: usize, z: usize, frame: usize) -> f32 {
        self.plane(channel, z, frame)[y * self.dims.width + x]
    }

    /// Applies the single-time-point Z/T swap (see [`Dimensions::swap_z_into_t`]).
    pub fn with_z_as_time(mut self) -> Self {
        self.dims = self.dims.swap_z_into_t();
        self
    }
}

/// An 8-bit RGB multi-frame image, the rendered overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbStack {
    pub width: u32,
    pub height: u32,

    /// Interleaved RGB bytes, one buffer per frame
    pub frames: Vec<Vec<u8>>,
}

impl RgbStack {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: Vec::new(),
        }
    }

    /// Appends a frame; the buffer must hold `width × height × 3` bytes.
    pub fn push_frame(&mut self, frame: Vec<u8>) -> Result<(), EnvError> {
        let expected = self.width as usize * self.height as usize * 3;
        if frame.len() != expected {
            return Err(EnvError::invalid_image(
                "overlay",
                format!("frame has {} bytes, expected {}", frame.len(), expected),
            ));
        }
        self.frames.push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_index_is_czt() {
        let dims = Dimensions {
            width: 2,
            height: 2,
            channels: 3,
            depth: 2,
            frames: 4,
        };
        assert_eq!(dims.plane_index(0, 0, 0), 0);
        assert_eq!(dims.plane_index(2, 0, 0), 2);
        assert_eq!(dims.plane_index(0, 1, 0), 3);
        assert_eq!(dims.plane_index(0, 0, 1), 6);
        assert_eq!(dims.plane_count(), 24);
    }

    #[test]
    fn test_swap_z_into_t_only_for_single_frame() {
        let dims = Dimensions {
            width: 4,
            height: 4,
            channels: 2,
            depth: 5,
            frames: 1,
        };
        let swapped = dims.swap_z_into_t();
        assert_eq!(swapped.depth, 1);
        assert_eq!(swapped.frames, 5);
        assert_eq!(swapped.plane_index(1, 0, 3), dims.plane_index(1, 3, 0));

        let time_lapse = Dimensions { frames: 3, ..dims };
        assert_eq!(time_lapse.swap_z_into_t(), time_lapse);
    }

    #[test]
    fn test_stack_rejects_wrong_sample_count() {
        let dims = Dimensions::time_lapse(3, 3, 2);
        let result = ImageStack::new("bad.tif", dims, Calibration::default(), vec![0.0; 10]);
        assert!(matches!(result, Err(EnvError::InvalidImage { .. })));
    }

    #[test]
    fn test_stack_value_lookup() {
        let dims = Dimensions::time_lapse(2, 2, 2);
        let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let stack = ImageStack::new("s.tif", dims, Calibration::default(), data).unwrap();
        assert_eq!(stack.value(1, 0, 0, 0, 0), 1.0);
        assert_eq!(stack.value(0, 1, 0, 0, 1), 6.0);
        assert_eq!(stack.plane(0, 0, 1), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_rgb_stack_frame_size_checked() {
        let mut stack = RgbStack::new(2, 2);
        assert!(stack.push_frame(vec![0; 12]).is_ok());
        assert!(stack.push_frame(vec![0; 11]).is_err());
        assert_eq!(stack.frames.len(), 1);
    }
}
