//! TOML job files: the same parameter record as the CLI plus a list of
//! AOI inputs, for repeatable runs.

use crate::config::JobParams;
use crate::core::catalog::{DEFAULT_COLLECTION, DEFAULT_STAC_URL};
use crate::core::clipper::ClipPolicy;
use crate::core::geometry;
use crate::domain::model::{AreaOfInterest, SearchWindow};
use crate::utils::error::{FetchError, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    pub search: SearchSection,
    pub output: OutputSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub aoi: Vec<AoiSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_buffer")]
    pub buffer_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSection {
    pub directory: PathBuf,
    #[serde(default)]
    pub clip_policy: ClipPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSection {
    pub url: Option<String>,
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsSection {
    pub aoi_workers: Option<usize>,
    pub concurrent_downloads: Option<usize>,
}

/// One AOI input: either an inline extent or a GeoJSON feature source.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AoiSection {
    Extent {
        prefix: String,
        bbox: [f64; 4],
        #[serde(default = "default_epsg")]
        epsg: u32,
    },
    Features {
        input: PathBuf,
        prefix_field: String,
    },
}

fn default_buffer() -> f64 {
    250.0
}

fn default_epsg() -> u32 {
    4326
}

pub fn load_job_file(path: &Path) -> Result<JobFile> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| FetchError::Config {
        field: path.display().to_string(),
        reason: e.to_string(),
    })
}

impl JobFile {
    pub fn to_params(&self) -> Result<JobParams> {
        Ok(JobParams {
            window: SearchWindow::new(self.search.start_date, self.search.end_date)?,
            buffer_m: self.search.buffer_m,
            output_dir: self.output.directory.clone(),
            stac_url: self
                .catalog
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_STAC_URL.to_string()),
            collection: self
                .catalog
                .collection
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            clip_policy: self.output.clip_policy,
            aoi_workers: self.limits.aoi_workers.unwrap_or(2),
            concurrent_downloads: self.limits.concurrent_downloads.unwrap_or(4),
        })
    }

    /// Resolve every AOI input to a buffered AreaOfInterest. Relative
    /// feature-source paths are resolved against `base_dir` (the job
    /// file's directory).
    pub fn resolve_aois(&self, base_dir: &Path) -> Result<Vec<AreaOfInterest>> {
        if self.aoi.is_empty() {
            return Err(FetchError::Config {
                field: "aoi".to_string(),
                reason: "job file defines no AOIs".to_string(),
            });
        }

        let mut aois = Vec::new();
        for section in &self.aoi {
            match section {
                AoiSection::Extent { prefix, bbox, epsg } => {
                    aois.push(geometry::aoi_from_extent(
                        prefix,
                        *bbox,
                        *epsg,
                        self.search.buffer_m,
                    )?);
                }
                AoiSection::Features { input, prefix_field } => {
                    let path = if input.is_absolute() {
                        input.clone()
                    } else {
                        base_dir.join(input)
                    };
                    let text = std::fs::read_to_string(&path)?;
                    let collection: serde_json::Value = serde_json::from_str(&text)?;
                    aois.extend(geometry::aois_from_feature_collection(
                        &collection,
                        prefix_field,
                        self.search.buffer_m,
                    )?);
                }
            }
        }
        Ok(aois)
    }
}
