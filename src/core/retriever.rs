//! Asset retrieval: streams the TCI raster and metadata document to
//! temp storage with bounded per-asset retries.

use crate::domain::model::{DownloadedAsset, SequencedScene};
use crate::utils::error::{FetchError, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

/// Servers report content-type variants like
/// "image/tiff; application=geotiff; profile=cloud-optimized", so the
/// check is a substring match per asset kind.
#[derive(Debug, Clone, Copy)]
enum AssetKind {
    Raster,
    Metadata,
}

impl AssetKind {
    fn accepts(self, content_type: &str) -> bool {
        let ct = content_type.to_ascii_lowercase();
        match self {
            AssetKind::Raster => {
                ct.contains("tiff") || ct.contains("image") || ct.contains("octet-stream")
            }
            AssetKind::Metadata => {
                ct.contains("xml") || ct.contains("text") || ct.contains("octet-stream")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetRetriever {
    client: Client,
}

impl AssetRetriever {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Fetch the scene's TCI raster and metadata document into
    /// `temp_dir`. A failure here is scoped to this scene; siblings
    /// and other AOIs keep going.
    pub async fn fetch_assets(
        &self,
        scene: &SequencedScene,
        temp_dir: &Path,
    ) -> Result<DownloadedAsset> {
        let scene_id = &scene.record.scene_id;
        let tci_path = temp_dir.join(format!("{scene_id}_{}_TCI.tif", scene.sequence_index));
        let metadata_path =
            temp_dir.join(format!("{scene_id}_{}_metadata.xml", scene.sequence_index));

        self.download(scene_id, &scene.record.assets.tci_url, &tci_path, AssetKind::Raster)
            .await?;
        self.download(
            scene_id,
            &scene.record.assets.metadata_url,
            &metadata_path,
            AssetKind::Metadata,
        )
        .await?;

        Ok(DownloadedAsset {
            scene_id: scene_id.clone(),
            tci_path,
            metadata_path,
        })
    }

    async fn download(
        &self,
        scene_id: &str,
        url: &str,
        path: &Path,
        kind: AssetKind,
    ) -> Result<()> {
        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                tokio::time::sleep(delay).await;
            }
            match self.try_download(url, path, kind).await {
                Ok(bytes) => {
                    tracing::debug!(
                        "downloaded {} ({bytes} bytes) for {scene_id}",
                        path.display()
                    );
                    return Ok(());
                }
                Err(reason) => {
                    tracing::warn!(
                        "download attempt {}/{MAX_ATTEMPTS} for {scene_id} failed: {reason}",
                        attempt + 1
                    );
                    last_err = reason;
                }
            }
        }
        Err(FetchError::AssetDownload {
            scene_id: scene_id.to_string(),
            reason: last_err,
        })
    }

    async fn try_download(
        &self,
        url: &str,
        path: &Path,
        kind: AssetKind,
    ) -> std::result::Result<u64, String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        match response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) if !kind.accepts(ct) => {
                return Err(format!("unexpected content type '{ct}'"))
            }
            Some(_) => {}
            None => tracing::warn!("no content type reported for {url}"),
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| e.to_string())?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            written += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        }
        file.flush().await.map_err(|e| e.to_string())?;

        if written == 0 {
            return Err("empty response body".to_string());
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{SceneAssets, SceneRecord};
    use chrono::NaiveDateTime;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    fn sequenced(tci_url: String, metadata_url: String) -> SequencedScene {
        SequencedScene {
            record: SceneRecord {
                satellite_id: "S2A".to_string(),
                scene_id: "S2A_33TUL_20230601_0_L2A".to_string(),
                acquired: NaiveDateTime::parse_from_str("2023-06-01 10:00:00", "%Y-%m-%d %H:%M:%S")
                    .unwrap()
                    .and_utc(),
                footprint: crate::core::geometry::rect_polygon([14.0, 44.0, 16.0, 46.0]),
                epsg: Some(32633),
                cloud_cover: None,
                assets: SceneAssets {
                    tci_url,
                    metadata_url,
                    thumbnail_url: None,
                },
            },
            sequence_index: 0,
        }
    }

    #[tokio::test]
    async fn test_fetch_assets_writes_both_temp_files() {
        let server = MockServer::start();
        let tci = server.mock(|when, then| {
            when.method(GET).path("/tci.tif");
            then.status(200)
                .header("Content-Type", "image/tiff; application=geotiff")
                .body(b"II*\0fake-tiff-bytes");
        });
        let metadata = server.mock(|when, then| {
            when.method(GET).path("/metadata.xml");
            then.status(200)
                .header("Content-Type", "application/xml")
                .body("<metadata/>");
        });

        let temp = TempDir::new().unwrap();
        let scene = sequenced(server.url("/tci.tif"), server.url("/metadata.xml"));
        let asset = AssetRetriever::new()
            .fetch_assets(&scene, temp.path())
            .await
            .unwrap();

        tci.assert();
        metadata.assert();
        assert!(asset.tci_path.exists());
        assert_eq!(
            std::fs::read_to_string(&asset.metadata_path).unwrap(),
            "<metadata/>"
        );
    }

    #[tokio::test]
    async fn test_download_failure_is_bounded_and_scoped() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path("/tci.tif");
            then.status(500);
        });

        let temp = TempDir::new().unwrap();
        let scene = sequenced(server.url("/tci.tif"), server.url("/metadata.xml"));
        let result = AssetRetriever::new().fetch_assets(&scene, temp.path()).await;

        assert_eq!(failing.hits(), 3);
        match result {
            Err(FetchError::AssetDownload { scene_id, reason }) => {
                assert_eq!(scene_id, "S2A_33TUL_20230601_0_L2A");
                assert!(reason.contains("500"), "reason: {reason}");
            }
            other => panic!("expected AssetDownload error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_content_type_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tci.tif");
            then.status(200)
                .header("Content-Type", "application/json")
                .body("{}");
        });

        let temp = TempDir::new().unwrap();
        let scene = sequenced(server.url("/tci.tif"), server.url("/metadata.xml"));
        let result = AssetRetriever::new().fetch_assets(&scene, temp.path()).await;
        assert!(matches!(result, Err(FetchError::AssetDownload { .. })));
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tci.tif");
            then.status(200).header("Content-Type", "image/tiff").body("");
        });

        let temp = TempDir::new().unwrap();
        let scene = sequenced(server.url("/tci.tif"), server.url("/metadata.xml"));
        let result = AssetRetriever::new().fetch_assets(&scene, temp.path()).await;
        assert!(matches!(result, Err(FetchError::AssetDownload { .. })));
    }
}
