//! Synthetic time-lapse stacks with known ground truth.
//!
//! Particles perform a seeded random walk with drift and are rendered as
//! Gaussian blobs. Every channel carries the particles, brighter in later
//! channels, so the default detection channel (3) is the clearest one.
//! The same seed always yields the same stack, byte for byte.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use startrack_env::{tiff_io, Calibration, Dimensions, EnvError, ImageStack};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Invalid synthetic config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Cannot write ground truth {path}: {message}")]
    Truth { path: PathBuf, message: String },
}

/// Movie generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthConfig {
    pub width: usize,
    pub height: usize,
    pub frames: usize,
    pub channels: usize,

    /// Number of particles at frame 0
    pub particles: usize,

    /// Per-frame random step standard deviation (pixels)
    pub step_sigma: f64,

    /// Maximum drift speed (pixels per frame)
    pub max_drift: f64,

    /// Blob standard deviation (pixels)
    pub blob_sigma: f64,

    /// Peak intensity in the brightest channel
    pub amplitude: f32,

    pub background: f32,

    /// Additive Gaussian noise (0 = none)
    pub noise_sigma: f64,

    /// Probability a particle is not rendered in a frame (after frame 0)
    pub blink_probability: f64,

    /// Minimum initial distance between particles (pixels)
    pub min_separation: f64,

    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            frames: 10,
            channels: 3,
            particles: 8,
            step_sigma: 0.5,
            max_drift: 1.5,
            blob_sigma: std::f64::consts::SQRT_2,
            amplitude: 200.0,
            background: 10.0,
            noise_sigma: 0.0,
            blink_probability: 0.0,
            min_separation: 25.0,
            seed: 42,
        }
    }
}

/// True trajectory of one particle; `None` where it was not rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthParticle {
    pub id: usize,
    pub positions: Vec<Option<[f64; 2]>>,
}

/// Generated stack plus the trajectories drawn into it.
#[derive(Debug, Clone)]
pub struct SyntheticMovie {
    pub stack: ImageStack,
    pub truth: Vec<GroundTruthParticle>,
}

/// Renders a synthetic movie.
pub fn generate(name: &str, config: &SynthConfig) -> Result<SyntheticMovie, SynthError> {
    if config.width == 0 || config.height == 0 || config.frames == 0 || config.channels == 0 {
        return Err(SynthError::InvalidConfig("dimensions must be positive".to_string()));
    }
    if !(0.0..=1.0).contains(&config.blink_probability) {
        return Err(SynthError::InvalidConfig(format!(
            "blink probability {} outside [0, 1]",
            config.blink_probability
        )));
    }
    let step = Normal::new(0.0, config.step_sigma)
        .map_err(|e| SynthError::InvalidConfig(format!("step sigma: {}", e)))?;
    let noise = Normal::new(0.0, config.noise_sigma)
        .map_err(|e| SynthError::InvalidConfig(format!("noise sigma: {}", e)))?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let margin = (3.0 * config.blob_sigma).max(1.0);
    let (max_x, max_y) = (config.width as f64 - 1.0 - margin, config.height as f64 - 1.0 - margin);
    if max_x <= margin || max_y <= margin {
        return Err(SynthError::InvalidConfig("image too small for the blob size".to_string()));
    }

    // Initial positions by rejection sampling
    let mut positions: Vec<Vector3<f64>> = Vec::new();
    let mut attempts = 0;
    while positions.len() < config.particles && attempts < config.particles * 1000 {
        attempts += 1;
        let candidate = Vector3::new(rng.gen_range(margin..max_x), rng.gen_range(margin..max_y), 0.0);
        if positions.iter().all(|p| (p - candidate).norm() >= config.min_separation) {
            positions.push(candidate);
        }
    }
    let velocities: Vec<Vector3<f64>> = positions
        .iter()
        .map(|_| {
            Vector3::new(
                rng.gen_range(-config.max_drift..=config.max_drift),
                rng.gen_range(-config.max_drift..=config.max_drift),
                0.0,
            )
        })
        .collect();

    let mut truth: Vec<GroundTruthParticle> = (0..positions.len())
        .map(|id| GroundTruthParticle {
            id,
            positions: Vec::with_capacity(config.frames),
        })
        .collect();

    let dims = Dimensions {
        width: config.width,
        height: config.height,
        channels: config.channels,
        depth: 1,
        frames: config.frames,
    };
    let plane_len = dims.plane_len();
    let mut data = vec![config.background; plane_len * dims.plane_count()];

    for frame in 0..config.frames {
        if frame > 0 {
            for (position, velocity) in positions.iter_mut().zip(&velocities) {
                let jitter = Vector3::new(step.sample(&mut rng), step.sample(&mut rng), 0.0);
                *position += velocity + jitter;
                position.x = position.x.clamp(margin, max_x);
                position.y = position.y.clamp(margin, max_y);
            }
        }

        for (particle, position) in truth.iter_mut().zip(&positions) {
            let visible = frame == 0 || rng.gen::<f64>() >= config.blink_probability;
            if !visible {
                particle.positions.push(None);
                continue;
            }
            particle.positions.push(Some([position.x, position.y]));

            for channel in 0..config.channels {
                let amplitude = config.amplitude * (channel + 1) as f32 / config.channels as f32;
                let start = dims.plane_index(channel, 0, frame) * plane_len;
                draw_blob(&mut data[start..start + plane_len], &dims, position, config.blob_sigma, amplitude);
            }
        }
    }

    if config.noise_sigma > 0.0 {
        for value in &mut data {
            *value = (*value + noise.sample(&mut rng) as f32).max(0.0);
        }
    }

    let stack = ImageStack::new(name, dims, Calibration::default(), data)?;
    Ok(SyntheticMovie { stack, truth })
}

fn draw_blob(plane: &mut [f32], dims: &Dimensions, center: &Vector3<f64>, sigma: f64, amplitude: f32) {
    let reach = (4.0 * sigma).ceil() as isize;
    let (cx, cy) = (center.x.round() as isize, center.y.round() as isize);
    let two_sigma_sq = 2.0 * sigma * sigma;

    for y in (cy - reach).max(0)..=(cy + reach).min(dims.height as isize - 1) {
        for x in (cx - reach).max(0)..=(cx + reach).min(dims.width as isize - 1) {
            let d2 = (x as f64 - center.x).powi(2) + (y as f64 - center.y).powi(2);
            plane[y as usize * dims.width + x as usize] += amplitude * (-d2 / two_sigma_sq).exp() as f32;
        }
    }
}

/// The demo set written by `startrack synth`.
pub fn demo_configs(seed: u64) -> Vec<(&'static str, SynthConfig)> {
    let base = SynthConfig {
        seed,
        ..Default::default()
    };
    vec![
        ("drifting.tif", base.clone()),
        (
            "blinking.tif",
            SynthConfig {
                blink_probability: 0.1,
                seed: seed.wrapping_add(1),
                ..base.clone()
            },
        ),
        (
            "single_channel.tif",
            SynthConfig {
                channels: 1,
                frames: 2,
                particles: 3,
                width: 64,
                height: 64,
                seed: seed.wrapping_add(2),
                ..base
            },
        ),
    ]
}

/// Writes the demo stacks and their ground truth (`<name>_truth.json`) into `dir`.
pub fn write_demo_set(dir: &Path, seed: u64) -> Result<Vec<PathBuf>, SynthError> {
    fs::create_dir_all(dir).map_err(|e| EnvError::io(dir.display(), e))?;

    let mut written = Vec::new();
    for (name, config) in demo_configs(seed) {
        let movie = generate(name, &config)?;
        let path = dir.join(name);
        tiff_io::write_stack(&path, &movie.stack)?;

        let truth_path = dir.join(format!("{}_truth.json", name));
        let json = serde_json::to_string_pretty(&movie.truth).map_err(|e| SynthError::Truth {
            path: truth_path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&truth_path, json).map_err(|e| SynthError::Truth {
            path: truth_path.clone(),
            message: e.to_string(),
        })?;

        info!("Wrote {} ({} particles, {} frames)", path.display(), movie.truth.len(), config.frames);
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_movie() {
        let config = SynthConfig {
            noise_sigma: 2.0,
            blink_probability: 0.2,
            ..Default::default()
        };
        let a = generate("a.tif", &config).unwrap();
        let b = generate("a.tif", &config).unwrap();
        assert_eq!(a.truth, b.truth);
        assert_eq!(a.stack.plane(2, 0, 5), b.stack.plane(2, 0, 5));
    }

    #[test]
    fn test_particles_respect_separation_and_bounds() {
        let config = SynthConfig::default();
        let movie = generate("a.tif", &config).unwrap();
        assert_eq!(movie.truth.len(), config.particles);

        let first: Vec<[f64; 2]> = movie.truth.iter().filter_map(|p| p.positions[0]).collect();
        for (i, a) in first.iter().enumerate() {
            for b in &first[i + 1..] {
                let d = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
                assert!(d >= config.min_separation);
            }
        }
        for particle in &movie.truth {
            assert_eq!(particle.positions.len(), config.frames);
            for p in particle.positions.iter().flatten() {
                assert!(p[0] >= 0.0 && p[0] < config.width as f64);
                assert!(p[1] >= 0.0 && p[1] < config.height as f64);
            }
        }
    }

    #[test]
    fn test_later_channels_are_brighter() {
        let movie = generate("a.tif", &SynthConfig::default()).unwrap();
        let peak = |c: usize| movie.stack.plane(c, 0, 0).iter().cloned().fold(f32::MIN, f32::max);
        assert!(peak(2) > peak(1) && peak(1) > peak(0));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let tiny = SynthConfig {
            width: 4,
            ..Default::default()
        };
        assert!(matches!(generate("t.tif", &tiny), Err(SynthError::InvalidConfig(_))));

        let blink = SynthConfig {
            blink_probability: 2.0,
            ..Default::default()
        };
        assert!(generate("b.tif", &blink).is_err());
    }
}
