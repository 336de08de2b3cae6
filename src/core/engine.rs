//! Run orchestration: one independent unit of work per AOI under a
//! bounded worker pool, per-scene error scoping, and deterministic
//! report ordering.

use crate::config::JobParams;
use crate::core::clipper;
use crate::core::retriever::AssetRetriever;
use crate::core::selector;
use crate::core::writer;
use crate::domain::model::{
    AoiReport, AoiStatus, AreaOfInterest, OutputArtifact, RunReport, SceneReport, SceneStatus,
    SequencedScene,
};
use crate::domain::ports::{SceneCatalog, Storage};
use crate::utils::error::{FetchError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct FetchEngine<C, S> {
    catalog: Arc<C>,
    storage: Arc<S>,
    retriever: AssetRetriever,
    params: Arc<JobParams>,
}

impl<C, S> FetchEngine<C, S>
where
    C: SceneCatalog + 'static,
    S: Storage + 'static,
{
    pub fn new(catalog: C, storage: S, params: JobParams) -> Self {
        Self {
            catalog: Arc::new(catalog),
            storage: Arc::new(storage),
            retriever: AssetRetriever::new(),
            params: Arc::new(params),
        }
    }

    /// Run the full pipeline for every AOI. Only the output directory
    /// check can fail the run as a whole; everything downstream is
    /// scoped to its AOI or scene and lands in the report.
    pub async fn run(&self, aois: Vec<AreaOfInterest>) -> Result<RunReport> {
        writer::ensure_output_dir(&self.params.output_dir)?;
        let temp = tempfile::tempdir()?;
        let temp_path = temp.path().to_path_buf();

        let aoi_sem = Arc::new(Semaphore::new(self.params.aoi_workers));
        let dl_sem = Arc::new(Semaphore::new(self.params.concurrent_downloads));

        let total = aois.len();
        let mut set = JoinSet::new();
        for (index, aoi) in aois.into_iter().enumerate() {
            let catalog = Arc::clone(&self.catalog);
            let storage = Arc::clone(&self.storage);
            let retriever = self.retriever.clone();
            let params = Arc::clone(&self.params);
            let aoi_sem = Arc::clone(&aoi_sem);
            let dl_sem = Arc::clone(&dl_sem);
            let temp_path = temp_path.clone();
            set.spawn(async move {
                let _permit = aoi_sem.acquire_owned().await.ok();
                let report =
                    process_aoi(catalog, storage, retriever, params, dl_sem, temp_path, aoi).await;
                (index, report)
            });
        }

        // Collect in submission order regardless of completion order.
        let mut slots: Vec<Option<AoiReport>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => tracing::error!("AOI task failed to join: {e}"),
            }
        }

        Ok(RunReport {
            aois: slots.into_iter().flatten().collect(),
        })
    }
}

async fn process_aoi<C: SceneCatalog, S: Storage + 'static>(
    catalog: Arc<C>,
    storage: Arc<S>,
    retriever: AssetRetriever,
    params: Arc<JobParams>,
    dl_sem: Arc<Semaphore>,
    temp_dir: PathBuf,
    aoi: AreaOfInterest,
) -> AoiReport {
    let prefix = aoi.prefix.clone();
    tracing::info!("processing AOI '{prefix}'");

    let found = match catalog.search(&aoi, &params.window).await {
        Ok(found) => found,
        Err(e) => {
            tracing::error!("AOI '{prefix}': catalog search failed: {e}");
            return AoiReport {
                prefix,
                status: AoiStatus::Failed {
                    reason: e.to_string(),
                },
                scenes: Vec::new(),
            };
        }
    };

    let sequenced = selector::sequence_scenes(&aoi, found);
    if sequenced.is_empty() {
        tracing::info!("AOI '{prefix}': no scenes in window");
        return AoiReport {
            prefix,
            status: AoiStatus::NoResults,
            scenes: Vec::new(),
        };
    }

    // Same scene ids can show up under several AOIs; give each AOI its
    // own temp subdirectory so concurrent downloads never collide.
    let temp_dir = temp_dir.join(&prefix);
    if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
        return AoiReport {
            prefix,
            status: AoiStatus::Failed {
                reason: format!("temp directory: {e}"),
            },
            scenes: Vec::new(),
        };
    }

    let aoi = Arc::new(aoi);
    let total = sequenced.len();
    let mut set = JoinSet::new();
    for (slot, scene) in sequenced.into_iter().enumerate() {
        let storage = Arc::clone(&storage);
        let retriever = retriever.clone();
        let params = Arc::clone(&params);
        let dl_sem = Arc::clone(&dl_sem);
        let temp_dir = temp_dir.clone();
        let aoi = Arc::clone(&aoi);
        set.spawn(async move {
            let report =
                process_scene(&*storage, &retriever, &params, &dl_sem, &temp_dir, &aoi, scene)
                    .await;
            (slot, report)
        });
    }

    let mut slots: Vec<Option<SceneReport>> = vec![None; total];
    while let Some(joined) = set.join_next().await {
        if let Ok((slot, report)) = joined {
            slots[slot] = Some(report);
        }
    }
    let scenes: Vec<SceneReport> = slots.into_iter().flatten().collect();

    let written = scenes
        .iter()
        .filter(|s| matches!(s.status, SceneStatus::Written { .. }))
        .count();
    tracing::info!("AOI '{prefix}': {written}/{} scene(s) written", scenes.len());

    AoiReport {
        prefix,
        status: AoiStatus::Completed,
        scenes,
    }
}

async fn process_scene<S: Storage>(
    storage: &S,
    retriever: &AssetRetriever,
    params: &JobParams,
    dl_sem: &Semaphore,
    temp_dir: &Path,
    aoi: &AreaOfInterest,
    scene: SequencedScene,
) -> SceneReport {
    let status = match run_scene(storage, retriever, params, dl_sem, temp_dir, aoi, &scene).await {
        Ok(artifact) => SceneStatus::Written {
            raster_path: artifact.raster_path,
            metadata_path: artifact.metadata_path,
        },
        Err(e) => {
            tracing::warn!("scene {} failed: {e}", scene.record.scene_id);
            SceneStatus::Failed {
                reason: e.to_string(),
            }
        }
    };

    SceneReport {
        scene_id: scene.record.scene_id,
        satellite_id: scene.record.satellite_id,
        date: scene.record.acquired.date_naive(),
        sequence_index: scene.sequence_index,
        status,
    }
}

async fn run_scene<S: Storage>(
    storage: &S,
    retriever: &AssetRetriever,
    params: &JobParams,
    dl_sem: &Semaphore,
    temp_dir: &Path,
    aoi: &AreaOfInterest,
    scene: &SequencedScene,
) -> Result<OutputArtifact> {
    // Downloads share a bounded permit pool across the whole run.
    let asset = {
        let _permit = dl_sem.acquire().await.ok();
        retriever.fetch_assets(scene, temp_dir).await?
    };

    if let Some(cloud_cover) = scene.record.cloud_cover {
        tracing::debug!("{}: cloud cover {cloud_cover:.1}%", scene.record.scene_id);
    }

    // Decode/clip/encode is CPU-bound; keep it off the async workers.
    let clip_aoi = aoi.clone();
    let clip_scene = scene.clone();
    let tci_path = asset.tci_path.clone();
    let policy = params.clip_policy;
    let clipped = tokio::task::spawn_blocking(move || {
        clipper::clip_to_aoi(
            &clip_scene.record.scene_id,
            &tci_path,
            &clip_aoi,
            clip_scene.record.epsg,
            policy,
        )
    })
    .await
    .map_err(|e| FetchError::Raster(format!("clip task failed: {e}")))??;

    let (tif_name, xml_name) = writer::artifact_filenames(&aoi.prefix, scene);
    let metadata = tokio::fs::read(&asset.metadata_path).await?;
    storage.write_file(&tif_name, &clipped.bytes).await?;
    storage.write_file(&xml_name, &metadata).await?;

    tracing::info!("wrote {tif_name}");
    Ok(OutputArtifact {
        raster_path: params.output_dir.join(&tif_name),
        metadata_path: params.output_dir.join(&xml_name),
    })
}
