//! The "TRACKING" Engine - LAP particle linking
//!
//! Two linear assignment passes, after Jaqaman et al. (2008):
//! 1. Frame-to-frame linking builds track segments
//! 2. Segment linking bridges gaps and attaches splitting branches
//!
//! Link cost is the squared distance between spots. Merging is never
//! considered, so every spot has at most one incoming edge.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::assignment::{solve_links, LinkCosts};
use crate::model::{Edge, Spot, SpotId, SpotsByFrame, TrackModel};
use crate::params::{ParamError, TrackingParameters};

// ============================================================================
// TRACKER INTERFACE
// ============================================================================

/// Links detected spots into tracks.
pub trait SpotTracker: Send + Sync {
    /// Validates parameters and spot data before linking.
    fn check_input(&self, spots: &SpotsByFrame, params: &TrackingParameters) -> Result<(), TrackingError>;

    /// Links spots into a [`TrackModel`].
    fn track(&self, spots: &SpotsByFrame, params: &TrackingParameters) -> Result<TrackModel, TrackingError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    #[error("Invalid tracking parameters: {0}")]
    InvalidParameters(#[from] ParamError),

    #[error("Spot {id}: {reason}")]
    InvalidSpot { id: SpotId, reason: String },

    #[error("Spot id {0} appears more than once")]
    DuplicateSpot(SpotId),
}

// ============================================================================
// LAP TRACKER
// ============================================================================

/// Shortest frame difference a gap-closing link may span.
///
/// A one-frame bridge covers ends and starts that frame-to-frame linking left
/// apart (beyond `linking_max_distance` or lost to a competing link).
const MIN_GAP_CLOSING_SPAN: usize = 1;

/// Segment: a maximal chain of frame-to-frame links.
#[derive(Debug)]
struct Segment {
    /// Spot ids ordered by frame
    spots: Vec<SpotId>,
}

impl Segment {
    fn start(&self) -> SpotId {
        self.spots[0]
    }

    fn end(&self) -> SpotId {
        self.spots[self.spots.len() - 1]
    }

    /// Interior spots, candidates for a splitting event.
    fn middles(&self) -> &[SpotId] {
        if self.spots.len() > 2 {
            &self.spots[1..self.spots.len() - 1]
        } else {
            &[]
        }
    }
}

/// Row of the segment-linking problem.
#[derive(Debug, Clone, Copy)]
enum SegmentRow {
    /// Segment end, may bridge a gap
    End { segment: usize, spot: SpotId },
    /// Interior spot, may split
    Middle { segment: usize, spot: SpotId },
}

/// Linear-assignment tracker with gap closing and splitting.
#[derive(Debug, Clone, Default)]
pub struct LapTracker;

impl LapTracker {
    pub fn new() -> Self {
        Self
    }

    /// Step 1: one LAP per pair of consecutive frames.
    fn link_frames(&self, spots: &SpotsByFrame, params: &TrackingParameters) -> Vec<Edge> {
        let max_cost = params.linking_max_distance * params.linking_max_distance;
        let mut edges = Vec::new();

        for frame in 0..spots.frame_count().saturating_sub(1) {
            let sources = spots.frame(frame);
            let targets = spots.frame(frame + 1);
            if sources.is_empty() || targets.is_empty() {
                continue;
            }

            let mut costs = LinkCosts::new(sources.len(), targets.len());
            for (i, source) in sources.iter().enumerate() {
                for (j, target) in targets.iter().enumerate() {
                    let cost = source.squared_distance_to(target);
                    if cost <= max_cost {
                        costs.allow(i, j, cost);
                    }
                }
            }

            for link in solve_links(&costs) {
                edges.push(Edge::between(&sources[link.row], &targets[link.col], link.cost));
            }
        }

        debug!("Frame-to-frame linking: {} edges", edges.len());
        edges
    }

    /// Step 2: bridges gaps and attaches splitting branches.
    fn link_segments(
        &self,
        by_id: &BTreeMap<SpotId, &Spot>,
        frame_edges: &[Edge],
        params: &TrackingParameters,
    ) -> Vec<Edge> {
        let segments = build_segments(by_id, frame_edges);

        let mut rows: Vec<SegmentRow> = Vec::new();
        if params.allow_gap_closing {
            rows.extend(
                segments
                    .iter()
                    .enumerate()
                    .map(|(segment, s)| SegmentRow::End { segment, spot: s.end() }),
            );
        }
        if params.allow_track_splitting {
            for (segment, s) in segments.iter().enumerate() {
                rows.extend(s.middles().iter().map(|&spot| SegmentRow::Middle { segment, spot }));
            }
        }
        if rows.is_empty() {
            return Vec::new();
        }

        let gap_cost = params.gap_closing_max_distance * params.gap_closing_max_distance;
        let split_cost = params.splitting_max_distance * params.splitting_max_distance;
        let max_gap = params.max_frame_gap as usize;

        // Segment starts by frame, so each row only visits reachable frames
        let mut starts_by_frame: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (j, target) in segments.iter().enumerate() {
            starts_by_frame.entry(by_id[&target.start()].frame).or_default().push(j);
        }

        let mut costs = LinkCosts::new(rows.len(), segments.len());
        for (i, row) in rows.iter().enumerate() {
            match *row {
                SegmentRow::End { segment, spot } => {
                    if max_gap < MIN_GAP_CLOSING_SPAN {
                        continue;
                    }
                    let end = by_id[&spot];
                    let reachable = end.frame + MIN_GAP_CLOSING_SPAN..=end.frame + max_gap;
                    for &j in starts_by_frame.range(reachable).flat_map(|(_, starts)| starts) {
                        let cost = end.squared_distance_to(by_id[&segments[j].start()]);
                        if j != segment && cost <= gap_cost {
                            costs.allow(i, j, cost);
                        }
                    }
                }
                SegmentRow::Middle { segment, spot } => {
                    let middle = by_id[&spot];
                    let Some(starts) = starts_by_frame.get(&(middle.frame + 1)) else {
                        continue;
                    };
                    for &j in starts {
                        let cost = middle.squared_distance_to(by_id[&segments[j].start()]);
                        if j != segment && cost <= split_cost {
                            costs.allow(i, j, cost);
                        }
                    }
                }
            }
        }

        let edges: Vec<Edge> = solve_links(&costs)
            .into_iter()
            .map(|link| {
                let source = match rows[link.row] {
                    SegmentRow::End { spot, .. } | SegmentRow::Middle { spot, .. } => spot,
                };
                Edge::between(by_id[&source], by_id[&segments[link.col].start()], link.cost)
            })
            .collect();

        debug!(
            "Segment linking: {} segments, {} candidates, {} edges",
            segments.len(),
            costs.allowed_count(),
            edges.len()
        );
        edges
    }
}

impl SpotTracker for LapTracker {
    fn check_input(&self, spots: &SpotsByFrame, params: &TrackingParameters) -> Result<(), TrackingError> {
        params.validate()?;

        let mut seen = BTreeSet::new();
        for frame in 0..spots.frame_count() {
            for spot in spots.frame(frame) {
                if !seen.insert(spot.id) {
                    return Err(TrackingError::DuplicateSpot(spot.id));
                }
                if spot.frame != frame {
                    return Err(TrackingError::InvalidSpot {
                        id: spot.id,
                        reason: format!("stored under frame {} but has frame {}", frame, spot.frame),
                    });
                }
                if !spot.position.iter().all(|c| c.is_finite()) {
                    return Err(TrackingError::InvalidSpot {
                        id: spot.id,
                        reason: "position is not finite".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn track(&self, spots: &SpotsByFrame, params: &TrackingParameters) -> Result<TrackModel, TrackingError> {
        self.check_input(spots, params)?;

        let mut edges = self.link_frames(spots, params);
        if params.needs_segment_linking() {
            let by_id: BTreeMap<SpotId, &Spot> = spots.iter().map(|s| (s.id, s)).collect();
            let bridging = self.link_segments(&by_id, &edges, params);
            edges.extend(bridging);
        }

        let model = TrackModel::from_links(spots, edges);
        debug!(
            "Tracking: {} spots, {} edges, {} tracks",
            model.spot_count(),
            model.edges().len(),
            model.track_count()
        );
        Ok(model)
    }
}

/// Chains frame-to-frame edges into segments, ordered by start spot id.
///
/// Every spot belongs to exactly one segment; unlinked spots form
/// single-spot segments.
fn build_segments(by_id: &BTreeMap<SpotId, &Spot>, frame_edges: &[Edge]) -> Vec<Segment> {
    let next: BTreeMap<SpotId, SpotId> = frame_edges.iter().map(|e| (e.source, e.target)).collect();
    let has_previous: BTreeSet<SpotId> = frame_edges.iter().map(|e| e.target).collect();

    by_id
        .keys()
        .filter(|id| !has_previous.contains(id))
        .map(|&start| {
            let mut spots = vec![start];
            let mut current = start;
            while let Some(&following) = next.get(&current) {
                spots.push(following);
                current = following;
            }
            Segment { spots }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use proptest::prelude::*;

    /// Builds spots from (frame, x, y) triples, ids in input order.
    fn spots_from(points: &[(usize, f64, f64)]) -> SpotsByFrame {
        let frames = points.iter().map(|p| p.0 + 1).max().unwrap_or(0);
        let mut spots = SpotsByFrame::new(frames);
        for (id, &(frame, x, y)) in points.iter().enumerate() {
            spots.push(Spot::new(id, frame, Vector3::new(x, y, 0.0), 2.0, 1.0));
        }
        spots
    }

    fn no_bridging() -> TrackingParameters {
        TrackingParameters {
            allow_gap_closing: false,
            allow_track_splitting: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_straight_line_gives_n_minus_one_edges() {
        let points: Vec<(usize, f64, f64)> = (0..6).map(|t| (t, 3.0 * t as f64, 4.0 * t as f64)).collect();
        let model = LapTracker::new().track(&spots_from(&points), &TrackingParameters::default()).unwrap();

        assert_eq!(model.edges().len(), 5);
        assert_eq!(model.track_count(), 1);
        for edge in model.edges() {
            assert_eq!(edge.frame_span(), 1);
            assert_relative_eq!(edge.displacement, 5.0);
            assert_relative_eq!(edge.cost, 25.0);
        }
    }

    #[test]
    fn test_zero_spots_give_zero_tracks() {
        let model = LapTracker::new()
            .track(&SpotsByFrame::new(10), &TrackingParameters::default())
            .unwrap();
        assert_eq!(model.track_count(), 0);
        assert!(model.edges().is_empty());
    }

    #[test]
    fn test_links_beyond_max_distance_are_forbidden() {
        let spots = spots_from(&[(0, 0.0, 0.0), (1, 25.0, 0.0)]);
        let model = LapTracker::new().track(&spots, &TrackingParameters::default()).unwrap();
        assert!(model.edges().is_empty());
        assert_eq!(model.track_count(), 0);
    }

    #[test]
    fn test_crossing_particles_keep_identity() {
        // Two particles moving in parallel; LAP must not swap them.
        let spots = spots_from(&[
            (0, 0.0, 0.0),
            (0, 10.0, 0.0),
            (1, 1.0, 0.0),
            (1, 11.0, 0.0),
            (2, 2.0, 0.0),
            (2, 12.0, 0.0),
        ]);
        let model = LapTracker::new().track(&spots, &no_bridging()).unwrap();
        assert_eq!(model.track_count(), 2);
        assert_eq!(model.tracks()[0].spots, vec![0, 2, 4]);
        assert_eq!(model.tracks()[1].spots, vec![1, 3, 5]);
    }

    #[test]
    fn test_gap_closing_bridges_missing_detection() {
        // Frame 2 missing
        let spots = spots_from(&[(0, 0.0, 0.0), (1, 1.0, 0.0), (3, 3.0, 0.0), (4, 4.0, 0.0)]);

        let model = LapTracker::new().track(&spots, &TrackingParameters::default()).unwrap();
        assert_eq!(model.track_count(), 1);
        assert_eq!(model.edges().len(), 3);
        assert_eq!(model.edges().iter().map(Edge::frame_span).max(), Some(2));

        let disabled = LapTracker::new().track(&spots, &no_bridging()).unwrap();
        assert_eq!(disabled.track_count(), 2);
        assert!(disabled.edges().iter().all(|e| e.frame_span() == 1));
    }

    #[test]
    fn test_gap_longer_than_max_frame_gap_not_bridged() {
        // Frames 2 and 3 missing: frame difference 3
        let spots = spots_from(&[(0, 0.0, 0.0), (1, 1.0, 0.0), (4, 4.0, 0.0), (5, 5.0, 0.0)]);
        let model = LapTracker::new().track(&spots, &TrackingParameters::default()).unwrap();
        assert_eq!(model.track_count(), 2);

        let wider = TrackingParameters {
            max_frame_gap: 3,
            ..Default::default()
        };
        let model = LapTracker::new().track(&spots, &wider).unwrap();
        assert_eq!(model.track_count(), 1);
    }

    #[test]
    fn test_gap_closing_bridges_adjacent_frames_beyond_linking_distance() {
        let spots = spots_from(&[(0, 0.0, 0.0), (1, 10.0, 0.0)]);
        let short_links = TrackingParameters {
            linking_max_distance: 5.0,
            ..Default::default()
        };
        let model = LapTracker::new().track(&spots, &short_links).unwrap();
        assert_eq!(model.edges().len(), 1);
        assert_eq!(model.edges()[0].frame_span(), 1);
        assert_relative_eq!(model.edges()[0].cost, 100.0);

        let no_gaps = TrackingParameters {
            allow_gap_closing: false,
            ..short_links
        };
        assert!(LapTracker::new().track(&spots, &no_gaps).unwrap().edges().is_empty());

        let zero_gap = TrackingParameters {
            max_frame_gap: 0,
            ..short_links
        };
        assert!(LapTracker::new().track(&spots, &zero_gap).unwrap().edges().is_empty());
    }

    #[test]
    fn test_long_movie_with_blinking_particles() {
        // 50 particles on a 25-unit grid, 200 frames, each blinking out for
        // single frames; 20-unit search radii keep neighbours apart.
        const PARTICLES: usize = 50;
        const FRAMES: usize = 200;
        let mut points = Vec::new();
        let mut missing = 0;
        for frame in 0..FRAMES {
            for k in 0..PARTICLES {
                let blinks = frame > 0 && frame < FRAMES - 1 && (frame + k) % 9 == 4;
                if blinks {
                    missing += 1;
                    continue;
                }
                let x = (k % 10) as f64 * 25.0 + 10.0 + 0.5 * frame as f64;
                let y = (k / 10) as f64 * 25.0 + 10.0;
                points.push((frame, x, y));
            }
        }

        let model = LapTracker::new().track(&spots_from(&points), &TrackingParameters::default()).unwrap();
        assert_eq!(model.track_count(), PARTICLES);
        assert_eq!(model.spot_count(), PARTICLES * FRAMES - missing);
        for track in model.tracks() {
            let edges: Vec<&Edge> = model.track_edges(track).collect();
            assert_eq!(track.spots.len(), edges.len() + 1);
            assert!(edges.iter().all(|e| e.frame_span() <= 2));
        }
        assert!(model.spots().all(|s| model.out_degree(s.id) <= 1));
    }

    #[test]
    fn test_splitting_attaches_branch() {
        let spots = spots_from(&[
            (0, 0.0, 0.0),
            (1, 0.0, 0.0),
            (2, 0.0, 0.0),
            (2, 5.0, 0.0),
            (3, 5.0, 0.0),
        ]);
        let model = LapTracker::new().track(&spots, &TrackingParameters::default()).unwrap();
        assert_eq!(model.track_count(), 1);
        assert_eq!(model.edges().len(), 4);
        assert_eq!(model.out_degree(1), 2);

        let no_split = TrackingParameters {
            allow_track_splitting: false,
            ..Default::default()
        };
        let model = LapTracker::new().track(&spots, &no_split).unwrap();
        assert_eq!(model.track_count(), 2);
        assert!(model.spots().all(|s| model.out_degree(s.id) <= 1));
    }

    #[test]
    fn test_check_input_rejects_bad_spots() {
        let tracker = LapTracker::new();
        let params = TrackingParameters::default();

        let mut nan = SpotsByFrame::new(1);
        nan.push(Spot::new(0, 0, Vector3::new(f64::NAN, 0.0, 0.0), 1.0, 1.0));
        assert!(matches!(
            tracker.track(&nan, &params),
            Err(TrackingError::InvalidSpot { id: 0, .. })
        ));

        let mut duplicate = SpotsByFrame::new(2);
        duplicate.push(Spot::new(7, 0, Vector3::zeros(), 1.0, 1.0));
        duplicate.push(Spot::new(7, 1, Vector3::zeros(), 1.0, 1.0));
        assert_eq!(
            tracker.check_input(&duplicate, &params),
            Err(TrackingError::DuplicateSpot(7))
        );

        let mut misplaced = SpotsByFrame::new(2);
        misplaced.push(Spot::new(0, 1, Vector3::zeros(), 1.0, 1.0));
        if let Some(frame) = misplaced.frame_mut(1) {
            frame[0].frame = 0;
        }
        assert!(tracker.check_input(&misplaced, &params).is_err());
    }

    #[test]
    fn test_invalid_parameters_block_tracking() {
        let params = TrackingParameters {
            linking_max_distance: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            LapTracker::new().track(&SpotsByFrame::new(1), &params),
            Err(TrackingError::InvalidParameters(_))
        ));
    }

    fn arb_points() -> impl Strategy<Value = Vec<(usize, f64, f64)>> {
        prop::collection::vec((0usize..6, 0.0f64..60.0, 0.0f64..60.0), 0..30).prop_map(|mut points| {
            points.sort_by_key(|p| p.0);
            points
        })
    }

    proptest! {
        #[test]
        fn prop_no_merges_and_no_long_edges_without_gap_closing(points in arb_points()) {
            let spots = spots_from(&points);
            let params = TrackingParameters { allow_gap_closing: false, ..Default::default() };
            let model = LapTracker::new().track(&spots, &params).unwrap();
            for spot in model.spots() {
                prop_assert!(model.in_degree(spot.id) <= 1);
            }
            for edge in model.edges() {
                prop_assert_eq!(edge.frame_span(), 1);
                prop_assert!(edge.displacement <= params.linking_max_distance.max(params.splitting_max_distance));
            }
        }

        #[test]
        fn prop_tracking_is_deterministic(points in arb_points()) {
            let spots = spots_from(&points);
            let params = TrackingParameters::default();
            let a = LapTracker::new().track(&spots, &params).unwrap();
            let b = LapTracker::new().track(&spots, &params).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_every_spot_has_at_most_one_parent(points in arb_points()) {
            let model = LapTracker::new().track(&spots_from(&points), &TrackingParameters::default()).unwrap();
            for spot in model.spots() {
                prop_assert!(model.in_degree(spot.id) <= 1);
            }
        }
    }
}
