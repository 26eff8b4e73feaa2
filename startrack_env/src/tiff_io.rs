//! Multi-page TIFF reading and writing.
//!
//! Input stacks are grayscale pages; their hyperstack layout and calibration
//! come from the ImageJ `ImageDescription` block when present:
//!
//! ```text
//! ImageJ=1.53t
//! images=6
//! channels=3
//! frames=2
//! unit=micron
//! finterval=0.5
//! ```
//!
//! Overlays are written as 8-bit RGB pages, one per frame.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};
use tiff::ColorType;
use tracing::debug;

use crate::{Calibration, Dimensions, EnvError, ImageStack, RgbStack};

const RATIONAL_SCALE: f64 = 1_000_000.0;

// ============================================================================
// IMAGEJ METADATA
// ============================================================================

/// Hyperstack fields parsed from an ImageJ description block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageJMetadata {
    pub channels: Option<usize>,
    pub slices: Option<usize>,
    pub frames: Option<usize>,
    pub unit: Option<String>,
    pub spacing: Option<f64>,
    pub frame_interval: Option<f64>,
    pub time_unit: Option<String>,
}

impl ImageJMetadata {
    /// Parses `key=value` lines; unknown keys are ignored.
    pub fn parse(description: &str) -> Self {
        let mut meta = Self::default();
        if !description.starts_with("ImageJ") {
            return meta;
        }

        for line in description.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "channels" => meta.channels = value.parse().ok(),
                "slices" => meta.slices = value.parse().ok(),
                "frames" => meta.frames = value.parse().ok(),
                "unit" => meta.unit = Some(decode_unit(value)),
                "spacing" => meta.spacing = value.parse().ok(),
                "finterval" => meta.frame_interval = value.parse().ok(),
                "tunit" => meta.time_unit = Some(value.to_string()),
                _ => {}
            }
        }
        meta
    }

    /// Resolves the XYCZT dimensions for `pages` planes.
    pub fn dimensions(
        &self,
        name: &str,
        width: usize,
        height: usize,
        pages: usize,
    ) -> Result<Dimensions, EnvError> {
        let channels = self.channels.unwrap_or(1).max(1);
        let depth = self.slices.unwrap_or(1).max(1);
        let frames = match self.frames {
            Some(frames) => frames.max(1),
            None => pages / (channels * depth).max(1),
        };

        if channels * depth * frames != pages {
            return Err(EnvError::invalid_image(
                name,
                format!(
                    "metadata describes {}x{}x{} planes but file has {} pages",
                    channels, depth, frames, pages
                ),
            ));
        }

        Ok(Dimensions {
            width,
            height,
            channels,
            depth,
            frames,
        })
    }

    /// Builds the calibration from metadata and the resolution tags.
    ///
    /// Resolution tags are only trusted when a spatial unit is declared.
    pub fn calibration(&self, x_resolution: Option<f64>, y_resolution: Option<f64>) -> Calibration {
        let mut calibration = Calibration::default();

        if let Some(unit) = &self.unit {
            calibration.unit = unit.clone();
            if let Some(xres) = x_resolution.filter(|r| *r > 0.0) {
                calibration.pixel_width = 1.0 / xres;
                calibration.pixel_height = 1.0 / y_resolution.filter(|r| *r > 0.0).unwrap_or(xres);
            }
            if let Some(spacing) = self.spacing.filter(|s| *s > 0.0) {
                calibration.voxel_depth = spacing;
            }
        }

        if let Some(interval) = self.frame_interval.filter(|f| *f > 0.0) {
            calibration.frame_interval = interval;
            calibration.time_unit = self.time_unit.clone().unwrap_or_else(|| "sec".to_string());
        }

        calibration
    }
}

/// ImageJ escapes the micro sign.
fn decode_unit(value: &str) -> String {
    value.replace("\\u00B5", "\u{00B5}")
}

/// Renders the description block written next to a stack.
pub fn imagej_description(dims: &Dimensions, calibration: &Calibration) -> String {
    let mut text = String::from("ImageJ=1.53t\n");
    text.push_str(&format!("images={}\n", dims.plane_count()));
    text.push_str(&format!("channels={}\n", dims.channels));
    text.push_str(&format!("slices={}\n", dims.depth));
    text.push_str(&format!("frames={}\n", dims.frames));
    if dims.channels > 1 || dims.depth > 1 {
        text.push_str("hyperstack=true\n");
    }
    text.push_str(&format!("unit={}\n", calibration.unit));
    text.push_str(&format!("spacing={}\n", calibration.voxel_depth));
    text.push_str(&format!("finterval={}\n", calibration.frame_interval));
    text.push_str(&format!("tunit={}\n", calibration.time_unit));
    text
}

// ============================================================================
// READING
// ============================================================================

/// Reads a grayscale multi-page TIFF into an [`ImageStack`].
///
/// The file handle is closed before returning.
pub fn read_stack(path: &Path, name: &str) -> Result<ImageStack, EnvError> {
    let file = File::open(path).map_err(|e| EnvError::io(path.display(), e))?;
    let tiff_err = |e| EnvError::tiff(path.display(), e);

    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(tiff_err)?
        .with_limits(Limits::unlimited());

    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
    let x_resolution = read_rational(&mut decoder, Tag::XResolution);
    let y_resolution = read_rational(&mut decoder, Tag::YResolution);
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;

    let mut data: Vec<f32> = Vec::new();
    let mut pages = 0usize;
    loop {
        match decoder.colortype().map_err(tiff_err)? {
            ColorType::Gray(_) => {}
            other => {
                return Err(EnvError::invalid_image(
                    name,
                    format!("unsupported color type {:?}", other),
                ));
            }
        }

        let page_dims = decoder.dimensions().map_err(tiff_err)?;
        if page_dims != (width, height) {
            return Err(EnvError::invalid_image(
                name,
                format!("page {} is {:?}, expected {:?}", pages, page_dims, (width, height)),
            ));
        }

        let page = decoder.read_image().map_err(tiff_err)?;
        append_samples(&mut data, page, name)?;
        pages += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_err)?;
    }

    let meta = description
        .as_deref()
        .map(ImageJMetadata::parse)
        .unwrap_or_default();
    let dims = meta.dimensions(name, width as usize, height as usize, pages)?;
    let calibration = meta.calibration(x_resolution, y_resolution);

    debug!(
        "Read {}: {}x{} c={} z={} t={}",
        name, dims.width, dims.height, dims.channels, dims.depth, dims.frames
    );

    ImageStack::new(name, dims, calibration, data)
}

fn read_rational<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Option<f64> {
    match decoder.find_tag(tag).ok().flatten()? {
        tiff::decoder::ifd::Value::Rational(n, d) if d != 0 => Some(n as f64 / d as f64),
        _ => None,
    }
}

fn append_samples(data: &mut Vec<f32>, page: DecodingResult, name: &str) -> Result<(), EnvError> {
    match page {
        DecodingResult::U8(buf) => data.extend(buf.into_iter().map(f32::from)),
        DecodingResult::U16(buf) => data.extend(buf.into_iter().map(f32::from)),
        DecodingResult::U32(buf) => data.extend(buf.into_iter().map(|v| v as f32)),
        DecodingResult::I8(buf) => data.extend(buf.into_iter().map(f32::from)),
        DecodingResult::I16(buf) => data.extend(buf.into_iter().map(f32::from)),
        DecodingResult::I32(buf) => data.extend(buf.into_iter().map(|v| v as f32)),
        DecodingResult::F32(buf) => data.extend(buf),
        DecodingResult::F64(buf) => data.extend(buf.into_iter().map(|v| v as f32)),
        _ => {
            return Err(EnvError::invalid_image(name, "unsupported TIFF sample format"));
        }
    }
    Ok(())
}

// ============================================================================
// WRITING
// ============================================================================

/// Writes a stack as 32-bit float pages with ImageJ metadata.
pub fn write_stack(path: &Path, stack: &ImageStack) -> Result<(), EnvError> {
    let file = File::create(path).map_err(|e| EnvError::io(path.display(), e))?;
    let tiff_err = |e| EnvError::tiff(path.display(), e);
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_err)?;

    let dims = stack.dims();
    let calibration = stack.calibration();
    let description = imagej_description(&dims, calibration);
    let resolution = Rational {
        n: (RATIONAL_SCALE / calibration.pixel_width).round() as u32,
        d: RATIONAL_SCALE as u32,
    };

    for t in 0..dims.frames {
        for z in 0..dims.depth {
            for c in 0..dims.channels {
                let mut image = encoder
                    .new_image::<colortype::Gray32Float>(dims.width as u32, dims.height as u32)
                    .map_err(tiff_err)?;
                image
                    .encoder()
                    .write_tag(Tag::ImageDescription, description.as_str())
                    .map_err(tiff_err)?;
                image.resolution(ResolutionUnit::None, resolution.clone());
                image.write_data(stack.plane(c, z, t)).map_err(tiff_err)?;
            }
        }
    }
    Ok(())
}

/// Writes an overlay as 8-bit RGB pages.
pub fn write_rgb_stack(path: &Path, overlay: &RgbStack) -> Result<(), EnvError> {
    let file = File::create(path).map_err(|e| EnvError::io(path.display(), e))?;
    let tiff_err = |e| EnvError::tiff(path.display(), e);
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_err)?;

    for frame in &overlay.frames {
        encoder
            .write_image::<colortype::RGB8>(overlay.width, overlay.height, frame)
            .map_err(tiff_err)?;
    }
    Ok(())
}
