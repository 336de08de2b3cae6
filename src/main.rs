use anyhow::Context;
use clap::Parser;
use s2fetch::config::{job, AoiSource, CliConfig, JobParams};
use s2fetch::core::geometry;
use s2fetch::domain::model::{AoiStatus, AreaOfInterest, RunReport, SceneStatus};
use s2fetch::utils::{logger, validation::Validate};
use s2fetch::{FetchEngine, LocalStorage, StacCatalog};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    let (params, aois): (JobParams, Vec<AreaOfInterest>) = match &cli.source {
        AoiSource::Extent(args) => {
            logger::init_cli_logger(args.common.verbose);
            args.common.validate()?;
            let bbox: [f64; 4] = args
                .bbox
                .clone()
                .try_into()
                .map_err(|_| "expected --bbox minx,miny,maxx,maxy")?;
            let aoi = geometry::aoi_from_extent(&args.prefix, bbox, args.epsg, args.common.buffer)?;
            (args.common.to_params()?, vec![aoi])
        }
        AoiSource::Features(args) => {
            logger::init_cli_logger(args.common.verbose);
            args.common.validate()?;
            let text = std::fs::read_to_string(&args.input)
                .with_context(|| format!("reading {}", args.input.display()))?;
            let collection: serde_json::Value = serde_json::from_str(&text)?;
            let aois = geometry::aois_from_feature_collection(
                &collection,
                &args.prefix_field,
                args.common.buffer,
            )?;
            (args.common.to_params()?, aois)
        }
        AoiSource::Job(args) => {
            logger::init_cli_logger(args.verbose);
            let file = job::load_job_file(&args.file)?;
            let base_dir = args.file.parent().unwrap_or(Path::new("."));
            let aois = file.resolve_aois(base_dir)?;
            (file.to_params()?, aois)
        }
    };

    if aois.is_empty() {
        tracing::warn!("no AOIs to process");
        return Ok(());
    }
    tracing::info!(
        "searching {} AOI(s), {} to {}",
        aois.len(),
        params.window.start,
        params.window.end
    );

    let catalog = StacCatalog::new(params.stac_url.clone(), params.collection.clone());
    let storage = LocalStorage::new(params.output_dir.clone());
    let engine = FetchEngine::new(catalog, storage, params);

    match engine.run(aois).await {
        Ok(report) => {
            print_report(&report);
            if report.has_failures() {
                std::process::exit(2);
            }
        }
        Err(e) => {
            tracing::error!("run failed: {e}");
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    for aoi in &report.aois {
        match &aoi.status {
            AoiStatus::Completed => {
                for scene in &aoi.scenes {
                    match &scene.status {
                        SceneStatus::Written { raster_path, .. } => {
                            println!("✅ {}: {}", aoi.prefix, raster_path.display())
                        }
                        SceneStatus::Failed { reason } => {
                            println!("❌ {}: {} failed: {reason}", aoi.prefix, scene.scene_id)
                        }
                    }
                }
            }
            AoiStatus::NoResults => println!("{}: no scenes found", aoi.prefix),
            AoiStatus::Failed { reason } => println!("❌ {}: {reason}", aoi.prefix),
        }
    }
    println!(
        "{} file pair(s) written, {} scene failure(s), {} AOI failure(s)",
        report.written_count(),
        report.failed_scene_count(),
        report.failed_aoi_count()
    );
}
