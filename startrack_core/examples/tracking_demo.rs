//! Tracking Demo - detect, link and tabulate three moving blobs
//! ============================================================
//!
//! Draws three particles into an in-memory stack (one of them skips a frame),
//! then runs the detector, the LAP tracker and the statistics export.
//!
//! Run:
//! ```bash
//! cargo run --example tracking_demo
//! ```

use startrack_core::{
    export_statistics, measure_intensities, DetectorSettings, LapTracker, LogDetector, SpotDetector, SpotTracker,
    TrackingParameters,
};
use startrack_env::{Calibration, Dimensions, ImageStack};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;
const FRAMES: usize = 6;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Tracking Demo");
    println!("=============\n");

    // (start x, start y, dx per frame, dy per frame, frame where it is missing)
    let particles = [
        (10.0, 10.0, 3.0, 1.0, None),
        (50.0, 12.0, -2.0, 2.0, Some(3)),
        (30.0, 38.0, 1.0, -1.5, None),
    ];

    let dims = Dimensions::time_lapse(WIDTH, HEIGHT, FRAMES);
    let mut data = vec![5.0_f32; dims.plane_len() * FRAMES];
    for frame in 0..FRAMES {
        let plane = &mut data[frame * dims.plane_len()..(frame + 1) * dims.plane_len()];
        for &(x0, y0, dx, dy, missing) in &particles {
            if missing == Some(frame) {
                continue;
            }
            let (cx, cy) = (x0 + dx * frame as f64, y0 + dy * frame as f64);
            for y in 0..HEIGHT {
                for x in 0..WIDTH {
                    let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                    plane[y * WIDTH + x] += 150.0 * (-d2 / 4.0).exp() as f32;
                }
            }
        }
    }
    let stack = ImageStack::new("demo.tif", dims, Calibration::default(), data)?;

    // Single-channel stack: detect in channel 1
    let settings = DetectorSettings {
        target_channel: 1,
        ..Default::default()
    };
    let mut spots = LogDetector::new().detect(&stack, &settings)?;
    measure_intensities(&stack, &mut spots);
    for frame in 0..spots.frame_count() {
        println!("frame {}: {} spots", frame, spots.frame(frame).len());
    }

    let model = LapTracker::new().track(&spots, &TrackingParameters::default())?;
    println!("\nFound {} tracks.\n", model.track_count());

    let tables = export_statistics(&model, stack.calibration(), stack.dims().channels);
    println!("{}", tables.tracks.to_tsv()?);
    println!("{}", tables.edges.to_tsv()?);

    Ok(())
}
