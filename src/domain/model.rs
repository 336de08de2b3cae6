use chrono::{DateTime, NaiveDate, Utc};
use geo::Polygon;
use serde::Serialize;
use std::path::PathBuf;

use crate::utils::error::Result;
use crate::utils::validation::validate_date_order;

/// One search/clip unit of work. The buffered search polygon and bbox
/// are derived once at construction time and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    pub prefix: String,
    /// Buffered extent polygon in WGS84.
    pub search_polygon: Polygon<f64>,
    /// Buffered extent in WGS84 as [min_x, min_y, max_x, max_y].
    pub bbox: [f64; 4],
}

/// UTC date range for the catalog search, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SearchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        validate_date_order(start, end)?;
        Ok(Self { start, end })
    }

    /// ISO-8601 interval in the catalog's datetime filter format.
    pub fn datetime_range(&self) -> String {
        format!(
            "{}T00:00:00Z/{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[derive(Debug, Clone)]
pub struct SceneAssets {
    pub tci_url: String,
    pub metadata_url: String,
    pub thumbnail_url: Option<String>,
}

/// One catalog item, immutable once parsed from the search response.
#[derive(Debug, Clone)]
pub struct SceneRecord {
    /// Short platform id, e.g. "S2A" or "S2B".
    pub satellite_id: String,
    pub scene_id: String,
    pub acquired: DateTime<Utc>,
    /// Scene footprint in WGS84.
    pub footprint: Polygon<f64>,
    /// EPSG code of the scene's raster grid, when the catalog reports it.
    pub epsg: Option<u32>,
    pub cloud_cover: Option<f64>,
    pub assets: SceneAssets,
}

impl SceneRecord {
    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquired.date_naive()
    }
}

/// A scene selected for an AOI, with its same-day ordinal assigned.
#[derive(Debug, Clone)]
pub struct SequencedScene {
    pub record: SceneRecord,
    /// Zero-based position within the (AOI, calendar date) group.
    pub sequence_index: usize,
}

/// Temp-file handles for one scene's fetched assets. The files live in
/// the run's temp dir and disappear with it once clipping is done.
#[derive(Debug)]
pub struct DownloadedAsset {
    pub scene_id: String,
    pub tci_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    pub raster_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SceneStatus {
    Written {
        raster_path: PathBuf,
        metadata_path: PathBuf,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneReport {
    pub scene_id: String,
    pub satellite_id: String,
    pub date: NaiveDate,
    pub sequence_index: usize,
    pub status: SceneStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AoiStatus {
    /// The AOI was processed; individual scenes may still have failed.
    Completed,
    /// Valid no-op outcome: the catalog matched nothing in the window.
    NoResults,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AoiReport {
    pub prefix: String,
    pub status: AoiStatus,
    pub scenes: Vec<SceneReport>,
}

/// Aggregated outcome of a run. The run itself only aborts on the
/// up-front output-directory check; everything else lands here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub aois: Vec<AoiReport>,
}

impl RunReport {
    pub fn written_count(&self) -> usize {
        self.aois
            .iter()
            .flat_map(|a| &a.scenes)
            .filter(|s| matches!(s.status, SceneStatus::Written { .. }))
            .count()
    }

    pub fn failed_scene_count(&self) -> usize {
        self.aois
            .iter()
            .flat_map(|a| &a.scenes)
            .filter(|s| matches!(s.status, SceneStatus::Failed { .. }))
            .count()
    }

    pub fn failed_aoi_count(&self) -> usize {
        self.aois
            .iter()
            .filter(|a| matches!(a.status, AoiStatus::Failed { .. }))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_aoi_count() > 0 || self.failed_scene_count() > 0
    }
}
