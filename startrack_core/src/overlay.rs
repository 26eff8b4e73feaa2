//! Track overlay rendering.
//!
//! One RGB frame per time point: the max-Z projection of the detection
//! channel as a gray background, track tails up to the current frame, and
//! the current frame's spots as labelled circles.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use startrack_env::{Calibration, ImageStack, RgbStack};

use crate::model::{Spot, TrackModel};

/// Rendered overlay, one RGB frame per time point.
pub type OverlayStack = RgbStack;

/// Colour of spots that belong to no track.
pub const UNTRACKED_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Renders tracks over the detection channel.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    /// 0-based channel used as background
    channel: usize,
}

impl OverlayRenderer {
    pub fn new(channel: usize) -> Self {
        Self { channel }
    }

    pub fn render(&self, stack: &ImageStack, model: &TrackModel) -> OverlayStack {
        let dims = stack.dims();
        let channel = self.channel.min(dims.channels - 1);
        let calibration = stack.calibration();

        let projections: Vec<Vec<f32>> = (0..dims.frames)
            .map(|t| max_projection(stack, channel, t))
            .collect();
        let (low, high) = projections
            .iter()
            .flatten()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let track_count = model.track_count();
        let track_colors: Vec<Rgb<u8>> = (0..track_count).map(|i| jet(i, track_count)).collect();

        let mut overlay = RgbStack::new(dims.width as u32, dims.height as u32);
        for (frame, projection) in projections.iter().enumerate() {
            let mut canvas = RgbImage::new(dims.width as u32, dims.height as u32);
            for (i, pixel) in canvas.pixels_mut().enumerate() {
                let gray = stretch(projection[i], low, high);
                *pixel = Rgb([gray, gray, gray]);
            }

            for track in model.tracks() {
                let color = track_colors[track.id];
                for edge in model.track_edges(track).filter(|e| e.target_frame <= frame) {
                    if let (Some(a), Some(b)) = (model.spot(edge.source), model.spot(edge.target)) {
                        draw_line_segment_mut(
                            &mut canvas,
                            to_pixel(a, calibration),
                            to_pixel(b, calibration),
                            color,
                        );
                    }
                }
            }

            for spot in model.spots().filter(|s| s.frame == frame) {
                let color = model
                    .track_of(spot.id)
                    .map(|id| track_colors[id])
                    .unwrap_or(UNTRACKED_COLOR);
                let (x, y) = to_pixel(spot, calibration);
                let radius = (spot.radius / calibration.pixel_width).round().max(1.0) as i32;
                let center = (x.round() as i32, y.round() as i32);
                draw_hollow_circle_mut(&mut canvas, center, radius, color);
                draw_number(&mut canvas, center.0 + radius + 2, center.1 - 2, spot.id, color);
            }

            overlay.frames.push(canvas.into_raw());
        }
        overlay
    }
}

fn to_pixel(spot: &Spot, calibration: &Calibration) -> (f32, f32) {
    (
        (spot.position.x / calibration.pixel_width) as f32,
        (spot.position.y / calibration.pixel_height) as f32,
    )
}

fn max_projection(stack: &ImageStack, channel: usize, frame: usize) -> Vec<f32> {
    let dims = stack.dims();
    let mut projection = stack.plane(channel, 0, frame).to_vec();
    for z in 1..dims.depth {
        for (p, &v) in projection.iter_mut().zip(stack.plane(channel, z, frame)) {
            *p = p.max(v);
        }
    }
    projection
}

/// Linear stretch of `[low, high]` onto 0..=255.
fn stretch(value: f32, low: f32, high: f32) -> u8 {
    if high <= low {
        return 0;
    }
    (((value - low) / (high - low)) * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Jet colour map sample for item `index` of `count`.
pub fn jet(index: usize, count: usize) -> Rgb<u8> {
    let t = if count > 1 {
        index as f64 / (count - 1) as f64
    } else {
        0.0
    };
    let channel = |offset: f64| ((1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

// ============================================================================
// DIGIT GLYPHS
// ============================================================================

/// 3×5 bitmaps, one row per byte, most significant of the low 3 bits on the left.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

/// Draws a decimal number with its top-left corner at (x, y), clipped to the canvas.
fn draw_number(canvas: &mut RgbImage, x: i32, y: i32, number: usize, color: Rgb<u8>) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    for (i, digit) in number.to_string().bytes().enumerate() {
        let glyph = &DIGITS[(digit - b'0') as usize];
        let left = x + 4 * i as i32;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let (px, py) = (left + col, y + row as i32);
                if px >= 0 && py >= 0 && px < width && py < height {
                    canvas.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, SpotsByFrame};
    use nalgebra::Vector3;
    use startrack_env::Dimensions;

    fn ramp_stack(frames: usize) -> ImageStack {
        let dims = Dimensions::time_lapse(32, 24, frames);
        let data = (0..dims.plane_len() * frames).map(|i| (i % 7) as f32).collect();
        ImageStack::new("ramp.tif", dims, Calibration::default(), data).unwrap()
    }

    fn pixel(overlay: &OverlayStack, frame: usize, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * overlay.width + x) * 3) as usize;
        let f = &overlay.frames[frame];
        [f[i], f[i + 1], f[i + 2]]
    }

    #[test]
    fn test_one_frame_per_time_point() {
        let overlay = OverlayRenderer::new(0).render(&ramp_stack(3), &TrackModel::default());
        assert_eq!(overlay.frames.len(), 3);
        assert!(overlay.frames.iter().all(|f| f.len() == 32 * 24 * 3));
        // Background is gray
        let [r, g, b] = pixel(&overlay, 1, 5, 5);
        assert!(r == g && g == b);
    }

    #[test]
    fn test_tracks_and_untracked_spots_are_drawn() {
        let a = Spot::new(0, 0, Vector3::new(5.0, 5.0, 0.0), 2.0, 1.0);
        let b = Spot::new(1, 1, Vector3::new(15.0, 5.0, 0.0), 2.0, 1.0);
        let lonely = Spot::new(2, 1, Vector3::new(10.0, 18.0, 0.0), 2.0, 1.0);
        let edge = Edge::between(&a, &b, 100.0);
        let mut spots = SpotsByFrame::new(2);
        spots.push(a);
        spots.push(b);
        spots.push(lonely);
        let model = TrackModel::from_links(&spots, vec![edge]);

        let overlay = OverlayRenderer::new(0).render(&ramp_stack(2), &model);
        let track_color = jet(0, 1).0;

        // Tail drawn once the edge's target frame is reached
        assert_eq!(pixel(&overlay, 1, 10, 5), track_color);
        assert_ne!(pixel(&overlay, 0, 10, 5), track_color);
        // Circle of the untracked spot, radius 2
        assert_eq!(pixel(&overlay, 1, 12, 18), UNTRACKED_COLOR.0);
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0, 5), Rgb([0, 0, 128]));
        assert_eq!(jet(4, 5), Rgb([128, 0, 0]));
        assert_eq!(jet(2, 5), Rgb([128, 255, 128]));
    }

    #[test]
    fn test_stretch() {
        assert_eq!(stretch(0.0, 0.0, 10.0), 0);
        assert_eq!(stretch(10.0, 0.0, 10.0), 255);
        assert_eq!(stretch(3.0, 3.0, 3.0), 0);
    }

    #[test]
    fn test_draw_number_clips_at_border() {
        let mut canvas = RgbImage::new(4, 4);
        draw_number(&mut canvas, 2, 2, 88, Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(2, 2), &Rgb([255, 255, 255]));
    }
}
