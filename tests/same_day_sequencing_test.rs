use chrono::NaiveDate;
use httpmock::prelude::*;
use s2fetch::config::JobParams;
use s2fetch::core::clipper::{encode_rgb8, ClipPolicy, GridTransform};
use s2fetch::core::geometry::aois_from_feature_collection;
use s2fetch::domain::model::SearchWindow;
use s2fetch::{FetchEngine, LocalStorage, StacCatalog};
use serde_json::json;
use tempfile::TempDir;

fn tci_bytes() -> Vec<u8> {
    let (width, height) = (40usize, 40usize);
    let data = vec![64u8; width * height * 3];
    let transform = GridTransform {
        origin_x: 15.0,
        origin_y: 45.0,
        pixel_w: 0.001,
        pixel_h: 0.001,
    };
    encode_rgb8(width, height, &data, &transform, 4326).unwrap()
}

fn stac_item(scene_id: &str, datetime: &str, tci_url: &str, metadata_url: &str) -> serde_json::Value {
    json!({
        "id": scene_id,
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[15.0, 44.96], [15.0, 45.0], [15.04, 45.0], [15.04, 44.96], [15.0, 44.96]]]
        },
        "properties": {
            "datetime": datetime,
            "platform": "sentinel-2b",
            "proj:epsg": 4326
        },
        "assets": {
            "visual": {"href": tci_url},
            "granule_metadata": {"href": metadata_url}
        }
    })
}

// Two overlapping acquisitions on the same calendar day, entering the
// pipeline through the feature-collection input path. Sequence indices
// must be 0 and 1 in acquisition order, regardless of page order.
#[tokio::test]
async fn test_same_day_scenes_get_sequential_indices_end_to_end() {
    let server = MockServer::start();
    let output = TempDir::new().unwrap();

    for name in ["LATER", "EARLIER"] {
        server.mock(|when, then| {
            when.method(GET).path(format!("/assets/{name}_tci.tif"));
            then.status(200)
                .header("Content-Type", "image/tiff; application=geotiff")
                .body(tci_bytes());
        });
        server.mock(|when, then| {
            when.method(GET).path(format!("/assets/{name}_metadata.xml"));
            then.status(200)
                .header("Content-Type", "application/xml")
                .body("<granule/>");
        });
    }

    // The catalog hands back the later acquisition first.
    server.mock(|when, then| {
        when.method(GET).path("/search");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!({
                "features": [
                    stac_item("LATER", "2023-06-01T10:20:31Z",
                              &server.url("/assets/LATER_tci.tif"),
                              &server.url("/assets/LATER_metadata.xml")),
                    stac_item("EARLIER", "2023-06-01T10:05:31Z",
                              &server.url("/assets/EARLIER_tci.tif"),
                              &server.url("/assets/EARLIER_metadata.xml")),
                ],
                "links": [],
                "context": {"matched": 2, "returned": 2}
            }));
    });

    let collection = json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {"plot": "Field7"},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[15.005, 44.97], [15.005, 44.99], [15.02, 44.99], [15.02, 44.97], [15.005, 44.97]]]
            }
        }]
    });
    let aois = aois_from_feature_collection(&collection, "plot", 100.0).unwrap();
    assert_eq!(aois.len(), 1);
    assert_eq!(aois[0].prefix, "Field7");

    let params = JobParams {
        window: SearchWindow::new(
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        )
        .unwrap(),
        buffer_m: 100.0,
        output_dir: output.path().to_path_buf(),
        stac_url: server.url("/search"),
        collection: "sentinel-2-l2a".to_string(),
        clip_policy: ClipPolicy::Extent,
        aoi_workers: 1,
        concurrent_downloads: 2,
    };

    let engine = FetchEngine::new(
        StacCatalog::new(server.url("/search"), "sentinel-2-l2a"),
        LocalStorage::new(output.path()),
        params,
    );
    let report = engine.run(aois).await.unwrap();

    assert_eq!(report.written_count(), 2);

    let scenes = &report.aois[0].scenes;
    let by_id = |id: &str| scenes.iter().find(|s| s.scene_id == id).unwrap();
    assert_eq!(by_id("EARLIER").sequence_index, 0);
    assert_eq!(by_id("LATER").sequence_index, 1);

    assert!(output
        .path()
        .join("Field7_S2B_EARLIER_20230601_0_L2A_TCI.tif")
        .exists());
    assert!(output
        .path()
        .join("Field7_S2B_LATER_20230601_1_L2A_TCI.tif")
        .exists());
    assert!(output
        .path()
        .join("Field7_S2B_LATER_20230601_1_L2A_metadata.xml")
        .exists());
}
