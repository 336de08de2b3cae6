pub mod cli;
pub mod job;

use crate::core::catalog::{DEFAULT_COLLECTION, DEFAULT_STAC_URL};
use crate::core::clipper::ClipPolicy;
use crate::domain::model::SearchWindow;
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "s2fetch")]
#[command(about = "Search, download and clip Sentinel-2 L2A true-color scenes")]
pub struct CliConfig {
    #[command(subcommand)]
    pub source: AoiSource,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AoiSource {
    /// Fetch scenes for a single bounding-box extent
    Extent(ExtentArgs),
    /// Fetch scenes for each polygon in a GeoJSON feature collection
    Features(FeaturesArgs),
    /// Run a TOML job file
    Job(JobArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ExtentArgs {
    /// Extent as minx,miny,maxx,maxy
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub bbox: Vec<f64>,

    /// EPSG code of the extent coordinates
    #[arg(long, default_value = "4326")]
    pub epsg: u32,

    /// Prefix for output files (alphanumeric)
    #[arg(long)]
    pub prefix: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Clone, Args)]
pub struct FeaturesArgs {
    /// GeoJSON FeatureCollection of polygon AOIs
    #[arg(long)]
    pub input: PathBuf,

    /// Feature property holding the output prefix
    #[arg(long)]
    pub prefix_field: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    /// TOML job file
    pub file: PathBuf,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Start date for search (UTC), YYYY-MM-DD
    #[arg(long)]
    pub start_date: NaiveDate,

    /// End date for search (UTC), YYYY-MM-DD
    #[arg(long)]
    pub end_date: NaiveDate,

    /// Buffer distance in meters
    #[arg(long, default_value = "250")]
    pub buffer: f64,

    /// Output directory (must exist)
    #[arg(long)]
    pub output_dir: PathBuf,

    /// STAC search endpoint
    #[arg(long, default_value = DEFAULT_STAC_URL)]
    pub stac_url: String,

    /// STAC collection to query
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Pixels outside the AOI polygon: keep the window or zero them
    #[arg(long, value_enum, default_value = "extent")]
    pub clip_policy: ClipPolicy,

    /// Max AOIs processed in parallel
    #[arg(long, default_value = "2")]
    pub aoi_workers: usize,

    /// Max asset downloads in flight
    #[arg(long, default_value = "4")]
    pub concurrent_downloads: usize,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,
}

/// Read-only run configuration shared across AOIs.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub window: SearchWindow,
    pub buffer_m: f64,
    pub output_dir: PathBuf,
    pub stac_url: String,
    pub collection: String,
    pub clip_policy: ClipPolicy,
    pub aoi_workers: usize,
    pub concurrent_downloads: usize,
}

impl CommonArgs {
    pub fn to_params(&self) -> Result<JobParams> {
        Ok(JobParams {
            window: SearchWindow::new(self.start_date, self.end_date)?,
            buffer_m: self.buffer,
            output_dir: self.output_dir.clone(),
            stac_url: self.stac_url.clone(),
            collection: self.collection.clone(),
            clip_policy: self.clip_policy,
            aoi_workers: self.aoi_workers,
            concurrent_downloads: self.concurrent_downloads,
        })
    }
}

impl Validate for CommonArgs {
    fn validate(&self) -> Result<()> {
        validation::validate_date_order(self.start_date, self.end_date)?;
        validation::validate_url("stac_url", &self.stac_url)?;
        validation::validate_non_empty_string("collection", &self.collection)?;
        validation::validate_buffer(self.buffer)?;
        validation::validate_positive("aoi_workers", self.aoi_workers)?;
        validation::validate_positive("concurrent_downloads", self.concurrent_downloads)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(start: &str, end: &str) -> CommonArgs {
        CommonArgs {
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
            buffer: 250.0,
            output_dir: PathBuf::from("/tmp/out"),
            stac_url: DEFAULT_STAC_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            clip_policy: ClipPolicy::Extent,
            aoi_workers: 2,
            concurrent_downloads: 4,
            verbose: false,
        }
    }

    #[test]
    fn test_common_args_validate() {
        assert!(common("2023-06-01", "2023-06-10").validate().is_ok());
        assert!(common("2023-06-10", "2023-06-01").validate().is_err());

        let mut bad_url = common("2023-06-01", "2023-06-10");
        bad_url.stac_url = "not-a-url".to_string();
        assert!(bad_url.validate().is_err());

        let mut zero_workers = common("2023-06-01", "2023-06-10");
        zero_workers.aoi_workers = 0;
        assert!(zero_workers.validate().is_err());
    }

    #[test]
    fn test_cli_parses_extent_subcommand() {
        let cli = CliConfig::try_parse_from([
            "s2fetch",
            "extent",
            "--bbox",
            "14.9,44.9,15.1,45.1",
            "--prefix",
            "ABC123",
            "--start-date",
            "2023-06-01",
            "--end-date",
            "2023-06-10",
            "--output-dir",
            "/tmp/out",
        ])
        .unwrap();

        match cli.source {
            AoiSource::Extent(args) => {
                assert_eq!(args.bbox, vec![14.9, 44.9, 15.1, 45.1]);
                assert_eq!(args.epsg, 4326);
                assert_eq!(args.prefix, "ABC123");
                assert_eq!(args.common.buffer, 250.0);
                assert_eq!(args.common.collection, DEFAULT_COLLECTION);
            }
            _ => panic!("expected extent subcommand"),
        }
    }

    #[test]
    fn test_cli_parses_features_subcommand() {
        let cli = CliConfig::try_parse_from([
            "s2fetch",
            "features",
            "--input",
            "aois.geojson",
            "--prefix-field",
            "name",
            "--start-date",
            "2023-06-01",
            "--end-date",
            "2023-06-10",
            "--output-dir",
            "/tmp/out",
            "--clip-policy",
            "mask",
        ])
        .unwrap();

        match cli.source {
            AoiSource::Features(args) => {
                assert_eq!(args.prefix_field, "name");
                assert_eq!(args.common.clip_policy, ClipPolicy::Mask);
            }
            _ => panic!("expected features subcommand"),
        }
    }
}
