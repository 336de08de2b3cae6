use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid prefix '{prefix}': must match [A-Za-z0-9]+")]
    InvalidPrefix { prefix: String },

    #[error("invalid AOI geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("catalog unavailable after {attempts} attempt(s): {reason}")]
    CatalogUnavailable { attempts: u32, reason: String },

    #[error("asset download failed for scene {scene_id}: {reason}")]
    AssetDownload { scene_id: String, reason: String },

    #[error("scene {scene_id} does not intersect the AOI extent")]
    ClipOutOfBounds { scene_id: String },

    #[error("output directory {path}: {reason}")]
    OutputDirectory { path: PathBuf, reason: String },

    #[error("configuration error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("projection error: {0}")]
    Projection(String),

    #[error("raster error: {0}")]
    Raster(String),

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

pub type Result<T> = std::result::Result<T, FetchError>;
