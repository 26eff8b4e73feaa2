//! Statistics tables.
//!
//! Three tables per stack (spots, edges, tracks), each serialised as
//! tab-separated text through `csv`: one header line, then one line per row.
//! Floats are written with three decimals so identical models give identical
//! bytes.

use serde::Serialize;
use startrack_env::Calibration;
use thiserror::Error;

use crate::features::{spot_time, EdgeFeatures, TrackFeatures};
use crate::model::TrackModel;

/// Decimal places of every float cell.
pub const FLOAT_PRECISION: usize = 3;

// ============================================================================
// TABLE
// ============================================================================

/// One table cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            // -0.0 would render as "-0.000"
            Cell::Float(v) if *v == 0.0 => format!("{:.*}", FLOAT_PRECISION, 0.0),
            Cell::Float(v) => format!("{:.*}", FLOAT_PRECISION, v),
            Cell::Text(v) => v.clone(),
        }
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Int(value as i64)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

/// Headers plus rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.headers.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tab-separated text, newline-terminated.
    ///
    /// Fields holding a tab, a quote or a newline are quoted.
    pub fn to_tsv(&self) -> Result<String, TableError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::render))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| TableError::Flush(e.error().to_string()))?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Table serialisation failures.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("Cannot write table row: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cannot flush table: {0}")]
    Flush(String),

    #[error("Table text is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

// ============================================================================
// STATISTICS EXPORT
// ============================================================================

const SPOT_COLUMNS: [&str; 10] = [
    "LABEL",
    "ID",
    "TRACK_ID",
    "QUALITY",
    "POSITION_X",
    "POSITION_Y",
    "POSITION_Z",
    "POSITION_T",
    "FRAME",
    "RADIUS",
];

const INTENSITY_COLUMNS: [&str; 6] = ["MEAN", "MEDIAN", "MIN", "MAX", "TOTAL", "STD"];

const EDGE_COLUMNS: [&str; 13] = [
    "LABEL",
    "TRACK_ID",
    "SPOT_SOURCE_ID",
    "SPOT_TARGET_ID",
    "SOURCE_FRAME",
    "TARGET_FRAME",
    "LINK_COST",
    "DISPLACEMENT",
    "SPEED",
    "EDGE_TIME",
    "EDGE_X_LOCATION",
    "EDGE_Y_LOCATION",
    "EDGE_Z_LOCATION",
];

const TRACK_COLUMNS: [&str; 25] = [
    "LABEL",
    "TRACK_INDEX",
    "TRACK_ID",
    "NUMBER_SPOTS",
    "NUMBER_GAPS",
    "LONGEST_GAP",
    "NUMBER_SPLITS",
    "NUMBER_MERGES",
    "TRACK_DURATION",
    "TRACK_START",
    "TRACK_STOP",
    "TRACK_DISPLACEMENT",
    "TRACK_X_LOCATION",
    "TRACK_Y_LOCATION",
    "TRACK_Z_LOCATION",
    "TRACK_MEAN_SPEED",
    "TRACK_MAX_SPEED",
    "TRACK_MIN_SPEED",
    "TRACK_MEDIAN_SPEED",
    "TRACK_STD_SPEED",
    "TOTAL_DISTANCE_TRAVELED",
    "MAX_DISTANCE_TRAVELED",
    "CONFINEMENT_RATIO",
    "MEAN_STRAIGHT_LINE_SPEED",
    "LINEARITY_OF_FORWARD_PROGRESSION",
];

/// The three per-stack tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsTables {
    pub spots: Table,
    pub edges: Table,
    pub tracks: Table,
}

/// Builds the spot, edge and track tables of a model.
///
/// Only spots that belong to a track are listed. Rows are ordered by track,
/// then frame, then id. The spot table carries intensity columns for each of
/// the stack's `channels`, whether or not anything was detected.
pub fn export_statistics(model: &TrackModel, calibration: &Calibration, channels: usize) -> StatisticsTables {
    StatisticsTables {
        spots: spot_table(model, calibration, channels),
        edges: edge_table(model, calibration),
        tracks: track_table(model, calibration),
    }
}

fn spot_table(model: &TrackModel, calibration: &Calibration, channels: usize) -> Table {
    let mut headers: Vec<String> = SPOT_COLUMNS.iter().map(|h| h.to_string()).collect();
    for channel in 1..=channels {
        headers.extend(
            INTENSITY_COLUMNS
                .iter()
                .map(|stat| format!("{}_INTENSITY_CH{}", stat, channel)),
        );
    }
    let mut table = Table::new(headers);

    for track in model.tracks() {
        for spot in track.spots.iter().filter_map(|&id| model.spot(id)) {
            let mut row: Vec<Cell> = vec![
                format!("ID{}", spot.id).into(),
                spot.id.into(),
                track.id.into(),
                spot.quality.into(),
                spot.position.x.into(),
                spot.position.y.into(),
                spot.position.z.into(),
                spot_time(spot, calibration).into(),
                spot.frame.into(),
                spot.radius.into(),
            ];
            for channel in 0..channels {
                let stats = spot.intensities.get(channel).cloned().unwrap_or_default();
                row.extend([stats.mean, stats.median, stats.min, stats.max, stats.total, stats.std].map(Cell::Float));
            }
            table.push_row(row);
        }
    }
    table
}

fn edge_table(model: &TrackModel, calibration: &Calibration) -> Table {
    let mut table = Table::new(EDGE_COLUMNS);

    for track in model.tracks() {
        for edge in model.track_edges(track) {
            let features = EdgeFeatures::compute(edge, model, calibration);
            table.push_row(vec![
                format!("ID{} → ID{}", edge.source, edge.target).into(),
                track.id.into(),
                edge.source.into(),
                edge.target.into(),
                edge.source_frame.into(),
                edge.target_frame.into(),
                edge.cost.into(),
                features.displacement.into(),
                features.speed.into(),
                features.time.into(),
                features.location.x.into(),
                features.location.y.into(),
                features.location.z.into(),
            ]);
        }
    }
    table
}

fn track_table(model: &TrackModel, calibration: &Calibration) -> Table {
    let mut table = Table::new(TRACK_COLUMNS);

    for track in model.tracks() {
        let f = TrackFeatures::compute(track, model, calibration);
        table.push_row(vec![
            format!("Track_{}", track.id).into(),
            track.id.into(),
            track.id.into(),
            f.number_spots.into(),
            f.number_gaps.into(),
            f.longest_gap.into(),
            f.number_splits.into(),
            f.number_merges.into(),
            f.duration.into(),
            f.start.into(),
            f.stop.into(),
            f.displacement.into(),
            f.location.x.into(),
            f.location.y.into(),
            f.location.z.into(),
            f.mean_speed.into(),
            f.max_speed.into(),
            f.min_speed.into(),
            f.median_speed.into(),
            f.std_speed.into(),
            f.total_distance.into(),
            f.max_distance.into(),
            f.confinement_ratio.into(),
            f.mean_straight_line_speed.into(),
            f.linearity_of_forward_progression.into(),
        ]);
    }
    table
}
