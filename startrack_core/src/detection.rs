//! The "DETECTION" Engine - Laplacian-of-Gaussian blob detector
//!
//! For every frame of the target channel:
//! 1. Gaussian smoothing with σ = radius / √2 (per axis, in pixels)
//! 2. Scale-normalised negative Laplacian (bright blobs → positive response)
//! 3. Local maxima over the 3×3×3 neighbourhood above the threshold
//!
//! Positions are pixel centres scaled by the calibration; there is no
//! sub-pixel refinement and no median pre-filter.

use nalgebra::Vector3;
use startrack_env::{Dimensions, ImageStack};
use tracing::debug;

use crate::model::{ChannelIntensity, Spot, SpotsByFrame};
use crate::params::{DetectorSettings, ParamError};

// ============================================================================
// DETECTOR INTERFACE
// ============================================================================

/// Produces spot candidates per frame.
pub trait SpotDetector: Send + Sync {
    /// Validates the settings against a stack before any work is done.
    fn check_input(&self, stack: &ImageStack, settings: &DetectorSettings) -> Result<(), DetectionError>;

    /// Detects spots in every frame. Frames without blobs stay empty.
    fn detect(&self, stack: &ImageStack, settings: &DetectorSettings) -> Result<SpotsByFrame, DetectionError>;
}

/// Errors reported by a detector's input check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionError {
    #[error("Invalid detector settings: {0}")]
    InvalidSettings(#[from] ParamError),

    #[error("Radius {radius} is smaller than one pixel ({pixel_size})")]
    RadiusTooSmall { radius: f64, pixel_size: f64 },

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),
}

/// The channel actually used for detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedChannel {
    /// 0-based channel index into the stack
    pub index: usize,

    /// True when the requested channel did not exist
    pub fell_back: bool,
}

/// Maps the 1-based target channel onto the stack.
///
/// A channel beyond the stack falls back to the last channel; the caller
/// reports the fallback.
pub fn resolve_channel(settings: &DetectorSettings, dims: &Dimensions) -> ResolvedChannel {
    let requested = settings.target_channel.max(1);
    if requested <= dims.channels {
        ResolvedChannel {
            index: requested - 1,
            fell_back: false,
        }
    } else {
        ResolvedChannel {
            index: dims.channels.saturating_sub(1),
            fell_back: true,
        }
    }
}

// ============================================================================
// LOG DETECTOR
// ============================================================================

/// Laplacian-of-Gaussian detector.
#[derive(Debug, Clone, Default)]
pub struct LogDetector;

impl LogDetector {
    pub fn new() -> Self {
        Self
    }
}

impl SpotDetector for LogDetector {
    fn check_input(&self, stack: &ImageStack, settings: &DetectorSettings) -> Result<(), DetectionError> {
        settings.validate()?;

        let calibration = stack.calibration();
        for (axis, size) in [
            ("pixel width", calibration.pixel_width),
            ("pixel height", calibration.pixel_height),
            ("voxel depth", calibration.voxel_depth),
        ] {
            if !(size.is_finite() && size > 0.0) {
                return Err(DetectionError::InvalidCalibration(format!("{} is {}", axis, size)));
            }
        }

        let pixel_size = calibration.pixel_width.min(calibration.pixel_height);
        if settings.radius < pixel_size / 2.0 {
            return Err(DetectionError::RadiusTooSmall {
                radius: settings.radius,
                pixel_size,
            });
        }
        Ok(())
    }

    fn detect(&self, stack: &ImageStack, settings: &DetectorSettings) -> Result<SpotsByFrame, DetectionError> {
        self.check_input(stack, settings)?;

        let dims = stack.dims();
        let calibration = stack.calibration();
        let channel = resolve_channel(settings, &dims);

        let sigma = settings.radius / std::f64::consts::SQRT_2;
        let sigma_x = sigma / calibration.pixel_width;
        let sigma_y = sigma / calibration.pixel_height;

        let mut spots = SpotsByFrame::new(dims.frames);
        let mut next_id = 0;

        for frame in 0..dims.frames {
            let responses: Vec<Vec<f32>> = (0..dims.depth)
                .map(|z| {
                    let smoothed = gaussian_blur(stack.plane(channel.index, z, frame), &dims, sigma_x, sigma_y);
                    log_response(&smoothed, &dims, (sigma_x * sigma_y) as f32)
                })
                .collect();

            for (z, x, y, quality) in local_maxima(&responses, &dims, settings.threshold) {
                let position = Vector3::new(
                    x as f64 * calibration.pixel_width,
                    y as f64 * calibration.pixel_height,
                    z as f64 * calibration.voxel_depth,
                );
                spots.push(Spot::new(next_id, frame, position, settings.radius, quality));
                next_id += 1;
            }

            debug!("{} frame {}: {} spots", stack.name(), frame, spots.frame(frame).len());
        }

        Ok(spots)
    }
}

// ============================================================================
// FILTERS
// ============================================================================

fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    let half = (3.0 * sigma).ceil().max(1.0) as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * half)
        .map(|i| {
            let d = i as f64 - half as f64;
            (-(d * d) / two_sigma_sq).exp() as f32
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian with clamped borders.
fn gaussian_blur(plane: &[f32], dims: &Dimensions, sigma_x: f64, sigma_y: f64) -> Vec<f32> {
    let (w, h) = (dims.width, dims.height);
    let kx = gaussian_kernel(sigma_x);
    let ky = gaussian_kernel(sigma_y);
    let (hx, hy) = ((kx.len() / 2) as isize, (ky.len() / 2) as isize);

    let mut horizontal = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, k) in kx.iter().enumerate() {
                let sx = (x as isize + i as isize - hx).clamp(0, w as isize - 1) as usize;
                acc += k * plane[y * w + sx];
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0.0_f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, k) in ky.iter().enumerate() {
                let sy = (y as isize + i as isize - hy).clamp(0, h as isize - 1) as usize;
                acc += k * horizontal[sy * w + x];
            }
            out[y * w + x] = acc;
        }
    }
    out
}

/// Negative 5-point Laplacian scaled by σx·σy.
fn log_response(smoothed: &[f32], dims: &Dimensions, scale: f32) -> Vec<f32> {
    let (w, h) = (dims.width, dims.height);
    let at = |x: isize, y: isize| {
        let cx = x.clamp(0, w as isize - 1) as usize;
        let cy = y.clamp(0, h as isize - 1) as usize;
        smoothed[cy * w + cx]
    };

    let mut out = vec![0.0_f32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            let center = at(x, y);
            let laplacian = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * center;
            out[y as usize * w + x as usize] = -laplacian * scale;
        }
    }
    out
}

/// Local maxima above `threshold`, returned as (z, x, y, response) in scan order.
///
/// Ties on a plateau go to the first pixel in (z, y, x) scan order.
fn local_maxima(responses: &[Vec<f32>], dims: &Dimensions, threshold: f64) -> Vec<(usize, usize, usize, f64)> {
    let (w, h, d) = (dims.width as isize, dims.height as isize, responses.len() as isize);
    let mut maxima = Vec::new();

    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let value = responses[z as usize][(y * w + x) as usize];
                if (value as f64) <= threshold {
                    continue;
                }

                let mut is_max = true;
                'neighbours: for dz in -1..=1_isize {
                    for dy in -1..=1_isize {
                        for dx in -1..=1_isize {
                            if dx == 0 && dy == 0 && dz == 0 {
                                continue;
                            }
                            let (nx, ny, nz) = (x + dx, y + dy, z + dz);
                            if nx < 0 || ny < 0 || nz < 0 || nx >= w || ny >= h || nz >= d {
                                continue;
                            }
                            let neighbour = responses[nz as usize][(ny * w + nx) as usize];
                            let earlier = (nz, ny, nx) < (z, y, x);
                            if neighbour > value || (earlier && neighbour == value) {
                                is_max = false;
                                break 'neighbours;
                            }
                        }
                    }
                }

                if is_max {
                    maxima.push((z as usize, x as usize, y as usize, value as f64));
                }
            }
        }
    }
    maxima
}

// ============================================================================
// INTENSITY ANALYSIS
// ============================================================================

/// Fills per-channel intensity statistics for every spot.
///
/// Pixels whose centre lies within the spot radius (in the spot's Z plane)
/// are measured; a spot smaller than a pixel measures its own pixel.
pub fn measure_intensities(stack: &ImageStack, spots: &mut SpotsByFrame) {
    let dims = stack.dims();
    let calibration = stack.calibration();

    for spot in spots.iter_mut() {
        let px = (spot.position.x / calibration.pixel_width).round();
        let py = (spot.position.y / calibration.pixel_height).round();
        let pz = ((spot.position.z / calibration.voxel_depth).round().max(0.0) as usize).min(dims.depth - 1);
        let frame = spot.frame.min(dims.frames - 1);

        let rx = (spot.radius / calibration.pixel_width).ceil() as isize;
        let ry = (spot.radius / calibration.pixel_height).ceil() as isize;
        let r_sq = spot.radius * spot.radius;

        let mut pixels: Vec<(usize, usize)> = Vec::new();
        for dy in -ry..=ry {
            for dx in -rx..=rx {
                let (x, y) = (px as isize + dx, py as isize + dy);
                if x < 0 || y < 0 || x >= dims.width as isize || y >= dims.height as isize {
                    continue;
                }
                let ex = x as f64 * calibration.pixel_width - spot.position.x;
                let ey = y as f64 * calibration.pixel_height - spot.position.y;
                if ex * ex + ey * ey <= r_sq {
                    pixels.push((x as usize, y as usize));
                }
            }
        }
        if pixels.is_empty() {
            let x = (px.max(0.0) as usize).min(dims.width - 1);
            let y = (py.max(0.0) as usize).min(dims.height - 1);
            pixels.push((x, y));
        }

        spot.intensities = (0..dims.channels)
            .map(|c| {
                let values: Vec<f64> = pixels
                    .iter()
                    .map(|&(x, y)| stack.value(x, y, c, pz, frame) as f64)
                    .collect();
                channel_statistics(values)
            })
            .collect();
    }
}

fn channel_statistics(mut values: Vec<f64>) -> ChannelIntensity {
    if values.is_empty() {
        return ChannelIntensity::default();
    }
    values.sort_by(f64::total_cmp);

    let n = values.len() as f64;
    let total: f64 = values.iter().sum();
    let mean = total / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };

    ChannelIntensity {
        mean,
        median,
        min: values[0],
        max: values[values.len() - 1],
        total,
        std: variance.sqrt(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
