//! STAC catalog search: paginated spatio-temporal queries with bounded
//! retry on transient failures.

use crate::core::geometry::polygon_from_geojson;
use crate::domain::model::{AreaOfInterest, SceneAssets, SceneRecord, SearchWindow};
use crate::domain::ports::SceneCatalog;
use crate::utils::error::{FetchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_STAC_URL: &str = "https://earth-search.aws.element84.com/v1/search";
pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";
pub const PAGE_SIZE: usize = 50;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct StacCatalog {
    client: Client,
    url: String,
    collection: String,
    page_size: usize,
}

impl StacCatalog {
    pub fn new(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            collection: collection.into(),
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// GET with bounded exponential backoff. Transport errors and HTTP
    /// 5xx are retried; any other status is returned to the caller.
    async fn get_with_retry(
        &self,
        url: &str,
        query: Option<&[(String, String)]>,
    ) -> Result<reqwest::Response> {
        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                tracing::debug!(
                    "retrying catalog request in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
            }
            let mut request = self.client.get(url);
            if let Some(query) = query {
                request = request.query(query);
            }
            match request.send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_err = format!("HTTP {}", response.status());
                }
                Ok(response) => return Ok(response),
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(FetchError::CatalogUnavailable {
            attempts: MAX_ATTEMPTS,
            reason: last_err,
        })
    }
}

#[async_trait]
impl SceneCatalog for StacCatalog {
    async fn search(
        &self,
        aoi: &AreaOfInterest,
        window: &SearchWindow,
    ) -> Result<Vec<SceneRecord>> {
        let bbox = aoi
            .bbox
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let query = [
            ("bbox".to_string(), bbox),
            ("datetime".to_string(), window.datetime_range()),
            ("collections".to_string(), self.collection.clone()),
            ("limit".to_string(), self.page_size.to_string()),
            ("sortby".to_string(), "+properties.datetime".to_string()),
        ];

        let mut scenes = Vec::new();
        let mut next_url: Option<String> = None;
        let mut page = 1usize;

        loop {
            let response = match &next_url {
                None => self.get_with_retry(&self.url, Some(&query)).await?,
                Some(url) => self.get_with_retry(url, None).await?,
            };

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::CatalogUnavailable {
                    attempts: 1,
                    reason: format!("HTTP {status}"),
                });
            }

            let body: StacSearchResponse = response.json().await?;
            let returned = body
                .context
                .as_ref()
                .and_then(|c| c.returned)
                .unwrap_or(body.features.len() as u64);
            if let Some(context) = &body.context {
                tracing::info!(
                    "catalog page {page}: matched {:?}, returned {:?}",
                    context.matched,
                    context.returned
                );
            }

            for feature in &body.features {
                match feature.to_record() {
                    Ok(record) => scenes.push(record),
                    Err(reason) => {
                        tracing::warn!("skipping catalog item {}: {reason}", feature.id)
                    }
                }
            }

            next_url = body
                .links
                .iter()
                .find(|link| link.rel == "next")
                .map(|link| link.href.clone());
            if returned == 0 || next_url.is_none() {
                break;
            }
            page += 1;
        }

        tracing::info!(
            "catalog search for '{}' returned {} scene(s)",
            aoi.prefix,
            scenes.len()
        );
        Ok(scenes)
    }
}

#[derive(Debug, Deserialize)]
struct StacSearchResponse {
    #[serde(default)]
    features: Vec<StacFeature>,
    #[serde(default)]
    links: Vec<StacLink>,
    context: Option<StacContext>,
}

#[derive(Debug, Deserialize)]
struct StacContext {
    matched: Option<u64>,
    returned: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StacLink {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct StacFeature {
    id: String,
    geometry: serde_json::Value,
    #[serde(default)]
    properties: StacProperties,
    #[serde(default)]
    assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Default, Deserialize)]
struct StacProperties {
    datetime: Option<String>,
    platform: Option<String>,
    #[serde(rename = "eo:cloud_cover")]
    cloud_cover: Option<f64>,
    #[serde(rename = "proj:epsg")]
    epsg: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StacAsset {
    href: String,
}

impl StacFeature {
    /// Items missing a datetime, footprint, or a usable TCI/metadata
    /// asset are skipped (with a warning) rather than failing the page.
    fn to_record(&self) -> std::result::Result<SceneRecord, String> {
        let datetime = self
            .properties
            .datetime
            .as_deref()
            .ok_or("item has no datetime")?;
        let acquired = DateTime::parse_from_rfc3339(datetime)
            .map_err(|e| format!("bad datetime '{datetime}': {e}"))?
            .with_timezone(&Utc);

        let tci_url = self
            .assets
            .get("visual")
            .map(|a| a.href.clone())
            .ok_or("item has no visual (TCI) asset")?;
        let metadata_url = self
            .assets
            .get("granule_metadata")
            .map(|a| a.href.clone())
            .ok_or("item has no granule_metadata asset")?;
        let thumbnail_url = self.assets.get("thumbnail").map(|a| a.href.clone());

        let footprint = polygon_from_geojson(&self.geometry).map_err(|e| e.to_string())?;

        Ok(SceneRecord {
            satellite_id: satellite_id(self.properties.platform.as_deref(), &self.id),
            scene_id: self.id.clone(),
            acquired,
            footprint,
            epsg: self.properties.epsg,
            cloud_cover: self.properties.cloud_cover,
            assets: SceneAssets {
                tci_url,
                metadata_url,
                thumbnail_url,
            },
        })
    }
}

/// "sentinel-2a" -> "S2A"; falls back to the scene id's leading token.
fn satellite_id(platform: Option<&str>, scene_id: &str) -> String {
    if let Some(platform) = platform {
        if let Some(suffix) = platform.to_ascii_lowercase().strip_prefix("sentinel-") {
            return format!("S{}", suffix.to_ascii_uppercase().replace('-', ""));
        }
    }
    scene_id.split('_').next().unwrap_or("S2").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::aoi_from_extent;
    use chrono::NaiveDate;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_aoi() -> AreaOfInterest {
        aoi_from_extent("ABC123", [14.9, 44.9, 15.1, 45.1], 4326, 250.0).unwrap()
    }

    fn test_window() -> SearchWindow {
        SearchWindow::new(
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 10).unwrap(),
        )
        .unwrap()
    }

    fn stac_item(id: &str, datetime: &str) -> serde_json::Value {
        json!({
            "id": id,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[14.0, 44.0], [14.0, 46.0], [16.0, 46.0], [16.0, 44.0], [14.0, 44.0]]]
            },
            "properties": {
                "datetime": datetime,
                "platform": "sentinel-2a",
                "eo:cloud_cover": 12.5,
                "proj:epsg": 32633
            },
            "assets": {
                "visual": {"href": "https://assets.example.com/tci.tif"},
                "granule_metadata": {"href": "https://assets.example.com/metadata.xml"},
                "thumbnail": {"href": "https://assets.example.com/thumb.jpg"}
            }
        })
    }

    #[tokio::test]
    async fn test_search_single_page() {
        let server = MockServer::start();
        let search_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/search")
                .query_param("collections", "sentinel-2-l2a")
                .query_param("limit", "50")
                .query_param("sortby", "+properties.datetime")
                .query_param("datetime", "2023-06-01T00:00:00Z/2023-06-10T23:59:59Z");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "type": "FeatureCollection",
                    "features": [stac_item("S2A_33TUL_20230601_0_L2A", "2023-06-01T10:10:31Z")],
                    "links": [],
                    "context": {"matched": 1, "returned": 1, "limit": 50}
                }));
        });

        let catalog = StacCatalog::new(server.url("/search"), "sentinel-2-l2a");
        let scenes = catalog.search(&test_aoi(), &test_window()).await.unwrap();

        search_mock.assert();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].satellite_id, "S2A");
        assert_eq!(scenes[0].scene_id, "S2A_33TUL_20230601_0_L2A");
        assert_eq!(scenes[0].epsg, Some(32633));
        assert_eq!(scenes[0].cloud_cover, Some(12.5));
        assert!(scenes[0].assets.tci_url.ends_with("tci.tif"));
    }

    #[tokio::test]
    async fn test_search_follows_next_links() {
        let server = MockServer::start();
        let page2_url = server.url("/search-page-2");

        let page1 = server.mock(|when, then| {
            when.method(GET).path("/search");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "features": [stac_item("S2A_33TUL_20230601_0_L2A", "2023-06-01T10:10:31Z")],
                    "links": [{"rel": "next", "href": page2_url}],
                    "context": {"matched": 2, "returned": 1}
                }));
        });
        let page2 = server.mock(|when, then| {
            when.method(GET).path("/search-page-2");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "features": [stac_item("S2B_33TUL_20230605_0_L2A", "2023-06-05T10:10:31Z")],
                    "links": [],
                    "context": {"matched": 2, "returned": 1}
                }));
        });

        let catalog = StacCatalog::new(server.url("/search"), "sentinel-2-l2a").with_page_size(1);
        let scenes = catalog.search(&test_aoi(), &test_window()).await.unwrap();

        page1.assert();
        page2.assert();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1].scene_id, "S2B_33TUL_20230605_0_L2A");
    }

    #[tokio::test]
    async fn test_search_empty_result_is_not_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "features": [],
                    "links": [],
                    "context": {"matched": 0, "returned": 0}
                }));
        });

        let catalog = StacCatalog::new(server.url("/search"), "sentinel-2-l2a");
        let scenes = catalog.search(&test_aoi(), &test_window()).await.unwrap();
        assert!(scenes.is_empty());
    }

    #[tokio::test]
    async fn test_search_retries_then_gives_up_on_server_errors() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path("/search");
            then.status(503);
        });

        let catalog = StacCatalog::new(server.url("/search"), "sentinel-2-l2a");
        let result = catalog.search(&test_aoi(), &test_window()).await;

        assert_eq!(failing.hits(), 3);
        assert!(matches!(
            result,
            Err(FetchError::CatalogUnavailable { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_search_skips_items_without_visual_asset() {
        let mut bad_item = stac_item("S2A_33TUL_20230602_0_L2A", "2023-06-02T10:10:31Z");
        bad_item["assets"].as_object_mut().unwrap().remove("visual");

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/search");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "features": [stac_item("S2A_33TUL_20230601_0_L2A", "2023-06-01T10:10:31Z"), bad_item],
                    "links": [],
                    "context": {"matched": 2, "returned": 2}
                }));
        });

        let catalog = StacCatalog::new(server.url("/search"), "sentinel-2-l2a");
        let scenes = catalog.search(&test_aoi(), &test_window()).await.unwrap();
        assert_eq!(scenes.len(), 1);
    }

    #[test]
    fn test_satellite_id_mapping() {
        assert_eq!(satellite_id(Some("sentinel-2a"), "x"), "S2A");
        assert_eq!(satellite_id(Some("sentinel-2b"), "x"), "S2B");
        assert_eq!(satellite_id(None, "S2B_33TUL_20230605_0_L2A"), "S2B");
    }
}
