//! Spot, edge and track features.
//!
//! Everything here is a pure function of a [`TrackModel`] and the stack
//! calibration. Times are `frame × frame_interval`; distances are in the
//! calibrated spatial unit.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::Serialize;
use startrack_env::Calibration;

use crate::model::{Edge, Spot, SpotId, Track, TrackModel};

/// Time of a spot in calibrated units.
#[inline]
pub fn spot_time(spot: &Spot, calibration: &Calibration) -> f64 {
    spot.frame as f64 * calibration.frame_interval
}

// ============================================================================
// EDGE FEATURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeFeatures {
    pub displacement: f64,

    /// Displacement over elapsed time
    pub speed: f64,

    /// Mean time of the two spots
    pub time: f64,

    /// Midpoint of the two spots
    pub location: Vector3<f64>,
}

impl EdgeFeatures {
    pub fn compute(edge: &Edge, model: &TrackModel, calibration: &Calibration) -> Self {
        let (source, target) = match (model.spot(edge.source), model.spot(edge.target)) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                return Self {
                    displacement: edge.displacement,
                    speed: 0.0,
                    time: 0.0,
                    location: Vector3::zeros(),
                }
            }
        };

        let elapsed = edge.frame_span() as f64 * calibration.frame_interval;
        Self {
            displacement: edge.displacement,
            speed: if elapsed > 0.0 { edge.displacement / elapsed } else { 0.0 },
            time: (spot_time(source, calibration) + spot_time(target, calibration)) / 2.0,
            location: (source.position + target.position) / 2.0,
        }
    }
}

// ============================================================================
// TRACK FEATURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFeatures {
    pub number_spots: usize,

    /// Edges skipping at least one frame
    pub number_gaps: usize,

    /// Largest number of missed frames over one edge
    pub longest_gap: usize,

    /// Spots with more than one child
    pub number_splits: usize,

    /// Spots with more than one parent (always 0, merging is disabled)
    pub number_merges: usize,

    pub duration: f64,
    pub start: f64,
    pub stop: f64,

    /// Distance between the first and last spot
    pub displacement: f64,

    /// Mean spot position
    pub location: Vector3<f64>,

    pub mean_speed: f64,
    pub max_speed: f64,
    pub min_speed: f64,
    pub median_speed: f64,
    pub std_speed: f64,

    pub total_distance: f64,

    /// Largest distance from the first spot
    pub max_distance: f64,

    /// Net displacement over total distance
    pub confinement_ratio: f64,

    /// Net displacement over duration
    pub mean_straight_line_speed: f64,

    /// Straight-line speed over mean speed
    pub linearity_of_forward_progression: f64,
}

impl Default for TrackFeatures {
    fn default() -> Self {
        Self {
            number_spots: 0,
            number_gaps: 0,
            longest_gap: 0,
            number_splits: 0,
            number_merges: 0,
            duration: 0.0,
            start: 0.0,
            stop: 0.0,
            displacement: 0.0,
            location: Vector3::zeros(),
            mean_speed: 0.0,
            max_speed: 0.0,
            min_speed: 0.0,
            median_speed: 0.0,
            std_speed: 0.0,
            total_distance: 0.0,
            max_distance: 0.0,
            confinement_ratio: 0.0,
            mean_straight_line_speed: 0.0,
            linearity_of_forward_progression: 0.0,
        }
    }
}

impl TrackFeatures {
    pub fn compute(track: &Track, model: &TrackModel, calibration: &Calibration) -> Self {
        let spots: Vec<&Spot> = track.spots.iter().filter_map(|&id| model.spot(id)).collect();
        let (Some(first), Some(last)) = (spots.first(), spots.last()) else {
            return Self::default();
        };

        let edges: Vec<&Edge> = model.track_edges(track).collect();
        let speeds: Vec<f64> = edges
            .iter()
            .map(|e| EdgeFeatures::compute(e, model, calibration).speed)
            .collect();
        let speed = Summary::of(&speeds);

        let number_gaps = edges.iter().filter(|e| e.frame_span() > 1).count();
        let longest_gap = edges.iter().map(|e| e.frame_span().saturating_sub(1)).max().unwrap_or(0);
        // Every edge touching a track spot belongs to the track
        let mut out_degree: BTreeMap<SpotId, usize> = BTreeMap::new();
        let mut in_degree: BTreeMap<SpotId, usize> = BTreeMap::new();
        for edge in &edges {
            *out_degree.entry(edge.source).or_default() += 1;
            *in_degree.entry(edge.target).or_default() += 1;
        }
        let number_splits = out_degree.values().filter(|&&d| d > 1).count();
        let number_merges = in_degree.values().filter(|&&d| d > 1).count();

        let start = spot_time(first, calibration);
        let stop = spot_time(last, calibration);
        let duration = stop - start;

        let displacement = first.distance_to(last);
        let total_distance: f64 = edges.iter().map(|e| e.displacement).sum();
        let max_distance = spots.iter().map(|s| first.distance_to(s)).fold(0.0, f64::max);
        let location = spots.iter().fold(Vector3::zeros(), |acc, s| acc + s.position) / spots.len() as f64;

        let mean_straight_line_speed = ratio(displacement, duration);

        Self {
            number_spots: spots.len(),
            number_gaps,
            longest_gap,
            number_splits,
            number_merges,
            duration,
            start,
            stop,
            displacement,
            location,
            mean_speed: speed.mean,
            max_speed: speed.max,
            min_speed: speed.min,
            median_speed: speed.median,
            std_speed: speed.std,
            total_distance,
            max_distance,
            confinement_ratio: ratio(displacement, total_distance),
            mean_straight_line_speed,
            linearity_of_forward_progression: ratio(mean_straight_line_speed, speed.mean),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Descriptive statistics of a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Summary {
    mean: f64,
    max: f64,
    min: f64,
    median: f64,
    std: f64,
}

impl Summary {
    fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Self {
            mean,
            max: sorted[sorted.len() - 1],
            min: sorted[0],
            median,
            std: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpotsByFrame;
    use approx::assert_relative_eq;

    fn model_from(points: &[(usize, f64, f64)], links: &[(usize, usize)]) -> TrackModel {
        let mut spots = SpotsByFrame::new(0);
        let all: Vec<Spot> = points
            .iter()
            .enumerate()
            .map(|(id, &(frame, x, y))| Spot::new(id, frame, Vector3::new(x, y, 0.0), 1.0, 1.0))
            .collect();
        for spot in &all {
            spots.push(spot.clone());
        }
        let edges = links
            .iter()
            .map(|&(a, b)| Edge::between(&all[a], &all[b], all[a].squared_distance_to(&all[b])))
            .collect();
        TrackModel::from_links(&spots, edges)
    }

    fn seconds(interval: f64) -> Calibration {
        Calibration {
            frame_interval: interval,
            time_unit: "sec".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_edge_speed_uses_frame_interval_and_span() {
        let model = model_from(&[(0, 0.0, 0.0), (2, 6.0, 8.0)], &[(0, 1)]);
        let features = EdgeFeatures::compute(&model.edges()[0], &model, &seconds(0.5));
        assert_relative_eq!(features.displacement, 10.0);
        assert_relative_eq!(features.speed, 10.0);
        assert_relative_eq!(features.time, 0.5);
        assert_relative_eq!(features.location.x, 3.0);
        assert_relative_eq!(features.location.y, 4.0);
    }

    #[test]
    fn test_straight_track_features() {
        let model = model_from(
            &[(0, 0.0, 0.0), (1, 1.0, 0.0), (2, 2.0, 0.0), (3, 3.0, 0.0)],
            &[(0, 1), (1, 2), (2, 3)],
        );
        let f = TrackFeatures::compute(&model.tracks()[0], &model, &seconds(2.0));

        assert_eq!(f.number_spots, 4);
        assert_eq!(f.number_gaps, 0);
        assert_eq!(f.number_splits, 0);
        assert_eq!(f.number_merges, 0);
        assert_relative_eq!(f.duration, 6.0);
        assert_relative_eq!(f.stop, 6.0);
        assert_relative_eq!(f.displacement, 3.0);
        assert_relative_eq!(f.total_distance, 3.0);
        assert_relative_eq!(f.confinement_ratio, 1.0);
        assert_relative_eq!(f.mean_speed, 0.5);
        assert_relative_eq!(f.std_speed, 0.0);
        assert_relative_eq!(f.mean_straight_line_speed, 0.5);
        assert_relative_eq!(f.linearity_of_forward_progression, 1.0);
        assert_relative_eq!(f.location.x, 1.5);
    }

    #[test]
    fn test_gap_and_split_counts() {
        // 0 → 1 → 3 (gap of one frame), 1 → 2 (split)
        let model = model_from(
            &[(0, 0.0, 0.0), (1, 0.0, 0.0), (2, 4.0, 0.0), (3, 0.0, 3.0)],
            &[(0, 1), (1, 2), (1, 3)],
        );
        let f = TrackFeatures::compute(&model.tracks()[0], &model, &Calibration::default());
        assert_eq!(f.number_gaps, 1);
        assert_eq!(f.longest_gap, 1);
        assert_eq!(f.number_splits, 1);
        assert_relative_eq!(f.max_distance, 4.0);
        assert_relative_eq!(f.total_distance, 7.0);
        assert_relative_eq!(f.min_speed, 0.0);
        assert_relative_eq!(f.max_speed, 4.0);
        assert_relative_eq!(f.median_speed, 1.5);
    }

    #[test]
    fn test_stationary_track_ratios_are_zero() {
        let model = model_from(&[(0, 5.0, 5.0), (1, 5.0, 5.0)], &[(0, 1)]);
        let f = TrackFeatures::compute(&model.tracks()[0], &model, &Calibration::default());
        assert_eq!(f.confinement_ratio, 0.0);
        assert_eq!(f.linearity_of_forward_progression, 0.0);
    }
}
