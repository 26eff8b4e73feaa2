//! Spots, edges and tracks.
//!
//! A [`TrackModel`] is the complete result of tracking one stack: every
//! detected spot, the links between them, and the tracks formed by those
//! links. It is built once by the tracker and then only read by the
//! statistics exporter and the overlay renderer.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Spot identifier, unique within one stack.
pub type SpotId = usize;

// ============================================================================
// SPOT
// ============================================================================

/// Intensity statistics of one channel inside a spot's radius.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelIntensity {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
    pub std: f64,
}

/// A detected particle at one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub id: SpotId,

    /// 0-based frame index
    pub frame: usize,

    /// Position in calibrated units [x, y, z]
    pub position: Vector3<f64>,

    /// Radius in calibrated units
    pub radius: f64,

    /// Detector response
    pub quality: f64,

    /// One entry per image channel (filled by the intensity pass)
    pub intensities: Vec<ChannelIntensity>,
}

impl Spot {
    pub fn new(id: SpotId, frame: usize, position: Vector3<f64>, radius: f64, quality: f64) -> Self {
        Self {
            id,
            frame,
            position,
            radius,
            quality,
            intensities: Vec::new(),
        }
    }

    /// Euclidean distance between two spots.
    #[inline]
    pub fn distance_to(&self, other: &Spot) -> f64 {
        (self.position - other.position).norm()
    }

    /// Squared Euclidean distance, the LAP link cost.
    #[inline]
    pub fn squared_distance_to(&self, other: &Spot) -> f64 {
        (self.position - other.position).norm_squared()
    }
}

// ============================================================================
// SPOTS BY FRAME
// ============================================================================

/// Detector output: spots grouped by frame index.
///
/// Every frame of the stack has an entry, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotsByFrame {
    frames: Vec<Vec<Spot>>,
}

impl SpotsByFrame {
    /// Creates `frame_count` empty frames.
    pub fn new(frame_count: usize) -> Self {
        Self {
            frames: vec![Vec::new(); frame_count],
        }
    }

    /// Adds a spot to its frame, growing the frame list if needed.
    pub fn push(&mut self, spot: Spot) {
        if spot.frame >= self.frames.len() {
            self.frames.resize(spot.frame + 1, Vec::new());
        }
        self.frames[spot.frame].push(spot);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Spots of one frame; empty for frames out of range.
    pub fn frame(&self, frame: usize) -> &[Spot] {
        self.frames.get(frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn frame_mut(&mut self, frame: usize) -> Option<&mut Vec<Spot>> {
        self.frames.get_mut(frame)
    }

    /// Total number of spots over all frames.
    pub fn total(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }

    /// Every spot, frame by frame.
    pub fn iter(&self) -> impl Iterator<Item = &Spot> {
        self.frames.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Spot> {
        self.frames.iter_mut().flatten()
    }
}

// ============================================================================
// EDGE / TRACK
// ============================================================================

/// A link between two spots, always pointing forward in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: SpotId,
    pub target: SpotId,
    pub source_frame: usize,
    pub target_frame: usize,

    /// LAP cost that selected this link (squared distance)
    pub cost: f64,

    /// Euclidean distance between the two spots
    pub displacement: f64,
}

impl Edge {
    /// Builds the edge between two spots, ordering them by frame.
    pub fn between(a: &Spot, b: &Spot, cost: f64) -> Self {
        let (source, target) = if a.frame <= b.frame { (a, b) } else { (b, a) };
        Self {
            source: source.id,
            target: target.id,
            source_frame: source.frame,
            target_frame: target.frame,
            cost,
            displacement: source.distance_to(target),
        }
    }

    /// Number of frames spanned; 1 for a plain frame-to-frame link.
    #[inline]
    pub fn frame_span(&self) -> usize {
        self.target_frame - self.source_frame
    }
}

/// One connected trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// 0-based id, tracks numbered by their earliest spot
    pub id: usize,

    /// Member spots ordered by (frame, id)
    pub spots: Vec<SpotId>,

    /// Indices into [`TrackModel::edges`], ordered by (source frame, source, target)
    pub edges: Vec<usize>,
}

// ============================================================================
// TRACK MODEL
// ============================================================================

/// Spots, edges and tracks of one stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackModel {
    spots: BTreeMap<SpotId, Spot>,
    edges: Vec<Edge>,
    tracks: Vec<Track>,
    track_of_spot: BTreeMap<SpotId, usize>,
}

impl TrackModel {
    /// Builds the model and groups linked spots into tracks.
    ///
    /// A track is a connected component with at least one edge; isolated
    /// spots stay in the model but belong to no track.
    pub fn from_links(spots: &SpotsByFrame, mut edges: Vec<Edge>) -> Self {
        let spots: BTreeMap<SpotId, Spot> = spots.iter().map(|s| (s.id, s.clone())).collect();

        edges.sort_by(|a, b| {
            (a.source_frame, a.source, a.target).cmp(&(b.source_frame, b.source, b.target))
        });

        // Undirected adjacency for component search
        let mut neighbors: BTreeMap<SpotId, BTreeSet<SpotId>> = BTreeMap::new();
        for edge in &edges {
            neighbors.entry(edge.source).or_default().insert(edge.target);
            neighbors.entry(edge.target).or_default().insert(edge.source);
        }

        let mut components: Vec<Vec<SpotId>> = Vec::new();
        let mut visited: BTreeSet<SpotId> = BTreeSet::new();
        for &start in neighbors.keys() {
            if !visited.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut stack = vec![start];
            while let Some(current) = stack.pop() {
                for &next in neighbors.get(&current).into_iter().flatten() {
                    if visited.insert(next) {
                        component.push(next);
                        stack.push(next);
                    }
                }
            }
            let frame_of = |id: &SpotId| spots.get(id).map(|s| s.frame).unwrap_or(usize::MAX);
            component.sort_by_key(|id| (frame_of(id), *id));
            components.push(component);
        }

        let first_key = |component: &Vec<SpotId>| {
            let first = component[0];
            (spots.get(&first).map(|s| s.frame).unwrap_or(usize::MAX), first)
        };
        components.sort_by_key(first_key);

        let mut track_of_spot = BTreeMap::new();
        let mut tracks: Vec<Track> = components
            .into_iter()
            .enumerate()
            .map(|(id, spot_ids)| {
                for spot_id in &spot_ids {
                    track_of_spot.insert(*spot_id, id);
                }
                Track {
                    id,
                    spots: spot_ids,
                    edges: Vec::new(),
                }
            })
            .collect();

        for (index, edge) in edges.iter().enumerate() {
            if let Some(&track_id) = track_of_spot.get(&edge.source) {
                tracks[track_id].edges.push(index);
            }
        }

        Self {
            spots,
            edges,
            tracks,
            track_of_spot,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn spot(&self, id: SpotId) -> Option<&Spot> {
        self.spots.get(&id)
    }

    /// All spots ordered by id.
    pub fn spots(&self) -> impl Iterator<Item = &Spot> {
        self.spots.values()
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Track id of a spot, `None` for untracked spots.
    pub fn track_of(&self, spot: SpotId) -> Option<usize> {
        self.track_of_spot.get(&spot).copied()
    }

    /// Edges of a track, in track order.
    pub fn track_edges<'a>(&'a self, track: &'a Track) -> impl Iterator<Item = &'a Edge> + 'a {
        track.edges.iter().map(move |&index| &self.edges[index])
    }

    /// Number of outgoing edges of a spot.
    pub fn out_degree(&self, spot: SpotId) -> usize {
        self.edges.iter().filter(|e| e.source == spot).count()
    }

    /// Number of incoming edges of a spot.
    pub fn in_degree(&self, spot: SpotId) -> usize {
        self.edges.iter().filter(|e| e.target == spot).count()
    }
}
