//! AOI normalization: prefix validation, planar buffering in a metric
//! CRS, and reprojection back to the WGS84 frame the catalog expects.

use crate::domain::model::AreaOfInterest;
use crate::utils::error::{FetchError, Result};
use crate::utils::validation::validate_prefix;
use geo::{coord, Area, BoundingRect, LineString, Polygon, Validation};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

pub const WGS84: u32 = 4326;

fn proj_string(epsg: u32) -> Result<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
        .ok_or_else(|| {
            FetchError::Projection(format!(
                "EPSG:{epsg} is not in the crs-definitions database"
            ))
        })
}

fn proj_for(epsg: u32) -> Result<Proj> {
    Proj::from_proj_string(proj_string(epsg)?)
        .map_err(|e| FetchError::Projection(format!("invalid projection EPSG:{epsg}: {e:?}")))
}

pub fn is_geographic(epsg: u32) -> bool {
    match proj_string(epsg) {
        Ok(s) => s.contains("+proj=longlat"),
        Err(_) => epsg == 4326 || (4000..5000).contains(&epsg),
    }
}

/// Project a single coordinate between EPSG codes. proj4rs works in
/// radians for geographic CRS, so degrees are converted at both ends.
pub fn project_coord(from: u32, to: u32, x: f64, y: f64) -> Result<(f64, f64)> {
    if from == to {
        return Ok((x, y));
    }
    let src = proj_for(from)?;
    let dst = proj_for(to)?;
    let (xi, yi) = if is_geographic(from) {
        (x.to_radians(), y.to_radians())
    } else {
        (x, y)
    };
    let mut point = (xi, yi, 0.0);
    transform(&src, &dst, &mut point).map_err(|e| {
        FetchError::Projection(format!("transform EPSG:{from} -> EPSG:{to} failed: {e:?}"))
    })?;
    if is_geographic(to) {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}

/// Project a polygon's exterior ring between EPSG codes.
pub fn project_polygon(poly: &Polygon<f64>, from: u32, to: u32) -> Result<Polygon<f64>> {
    if from == to {
        return Ok(poly.clone());
    }
    let src = proj_for(from)?;
    let dst = proj_for(to)?;
    let from_geo = is_geographic(from);
    let to_geo = is_geographic(to);

    let mut out = Vec::with_capacity(poly.exterior().coords().count());
    for c in poly.exterior().coords() {
        let (x, y) = if from_geo {
            (c.x.to_radians(), c.y.to_radians())
        } else {
            (c.x, c.y)
        };
        let mut point = (x, y, 0.0);
        transform(&src, &dst, &mut point).map_err(|e| {
            FetchError::Projection(format!("transform EPSG:{from} -> EPSG:{to} failed: {e:?}"))
        })?;
        let (x, y) = if to_geo {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        out.push(coord! { x: x, y: y });
    }
    Ok(Polygon::new(LineString::from(out), vec![]))
}

/// WGS84 UTM zone EPSG code covering the given lon/lat.
pub fn utm_epsg_for(lon: f64, lat: f64) -> u32 {
    let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u32;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

/// Buffered search extent in WGS84.
#[derive(Debug, Clone)]
pub struct BufferedExtent {
    pub polygon: Polygon<f64>,
    pub bbox: [f64; 4],
}

/// Buffer a polygon's extent by `buffer_m` meters on every side.
///
/// The extent is taken in the UTM zone of the polygon's center so the
/// buffer is planar and metric, then the expanded rectangle is brought
/// back to WGS84. Degenerate (zero-area) extents are accepted here:
/// buffering a point by `d` grows the extent by roughly `d` per side.
/// Rejecting zero-area AOI inputs is the job of the AOI constructors.
pub fn buffer_extent(
    polygon: &Polygon<f64>,
    source_epsg: u32,
    buffer_m: f64,
) -> Result<BufferedExtent> {
    let wgs84_poly = project_polygon(polygon, source_epsg, WGS84)?;
    let rect = wgs84_poly.bounding_rect().ok_or_else(|| FetchError::InvalidGeometry {
        reason: "geometry has no extent".to_string(),
    })?;

    let center = rect.center();
    let utm = utm_epsg_for(center.x, center.y);
    let utm_poly = project_polygon(&wgs84_poly, WGS84, utm)?;
    let utm_rect = utm_poly.bounding_rect().ok_or_else(|| FetchError::InvalidGeometry {
        reason: "geometry has no extent".to_string(),
    })?;

    let min_x = utm_rect.min().x - buffer_m;
    let min_y = utm_rect.min().y - buffer_m;
    let max_x = utm_rect.max().x + buffer_m;
    let max_y = utm_rect.max().y + buffer_m;

    // Corners back to WGS84; min/max over all four guards against the
    // slight curvature a projected rectangle picks up.
    let corners = [(min_x, min_y), (min_x, max_y), (max_x, max_y), (max_x, min_y)];
    let mut bbox = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
    for (x, y) in corners {
        let (lon, lat) = project_coord(utm, WGS84, x, y)?;
        bbox[0] = bbox[0].min(lon);
        bbox[1] = bbox[1].min(lat);
        bbox[2] = bbox[2].max(lon);
        bbox[3] = bbox[3].max(lat);
    }

    Ok(BufferedExtent {
        polygon: rect_polygon(bbox),
        bbox,
    })
}

/// Closed rectangle polygon from [min_x, min_y, max_x, max_y].
pub fn rect_polygon(bbox: [f64; 4]) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (bbox[0], bbox[1]),
            (bbox[0], bbox[3]),
            (bbox[2], bbox[3]),
            (bbox[2], bbox[1]),
            (bbox[0], bbox[1]),
        ]),
        vec![],
    )
}

fn validate_aoi_polygon(polygon: &Polygon<f64>) -> Result<()> {
    if polygon.unsigned_area() == 0.0 {
        return Err(FetchError::InvalidGeometry {
            reason: "polygon has zero area".to_string(),
        });
    }
    if !polygon.is_valid() {
        return Err(FetchError::InvalidGeometry {
            reason: "polygon is not valid (self-intersecting or malformed ring)".to_string(),
        });
    }
    Ok(())
}

/// Build a single AOI from a map-extent style bounding box.
pub fn aoi_from_extent(
    prefix: &str,
    bbox: [f64; 4],
    epsg: u32,
    buffer_m: f64,
) -> Result<AreaOfInterest> {
    validate_prefix(prefix)?;
    if !(bbox[0] < bbox[2]) || !(bbox[1] < bbox[3]) {
        return Err(FetchError::InvalidGeometry {
            reason: format!("extent {bbox:?} has no area"),
        });
    }
    let buffered = buffer_extent(&rect_polygon(bbox), epsg, buffer_m)?;
    Ok(AreaOfInterest {
        prefix: prefix.to_string(),
        search_polygon: buffered.polygon,
        bbox: buffered.bbox,
    })
}

/// Build one AOI per polygon feature of a GeoJSON FeatureCollection.
/// `prefix_field` names the feature property holding the output prefix.
/// Everything is validated up front, before any network call.
pub fn aois_from_feature_collection(
    raw: &serde_json::Value,
    prefix_field: &str,
    buffer_m: f64,
) -> Result<Vec<AreaOfInterest>> {
    let features = raw
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| FetchError::InvalidGeometry {
            reason: "input is not a GeoJSON FeatureCollection".to_string(),
        })?;

    let mut aois = Vec::with_capacity(features.len());
    for (idx, feature) in features.iter().enumerate() {
        let prefix = feature
            .get("properties")
            .and_then(|p| p.get(prefix_field))
            .and_then(property_as_string)
            .ok_or_else(|| FetchError::Config {
                field: prefix_field.to_string(),
                reason: format!("feature {idx} has no usable prefix value"),
            })?;
        validate_prefix(&prefix)?;

        let geom = feature.get("geometry").ok_or_else(|| FetchError::InvalidGeometry {
            reason: format!("feature {idx} has no geometry"),
        })?;
        let polygon = polygon_from_geojson(geom)?;
        validate_aoi_polygon(&polygon)?;

        let buffered = buffer_extent(&polygon, WGS84, buffer_m)?;
        aois.push(AreaOfInterest {
            prefix,
            search_polygon: buffered.polygon,
            bbox: buffered.bbox,
        });
    }
    Ok(aois)
}

fn property_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a GeoJSON Polygon (or the outer ring of a MultiPolygon's
/// first polygon) into a geo polygon.
pub fn polygon_from_geojson(geom: &serde_json::Value) -> Result<Polygon<f64>> {
    let gtype = geom.get("type").and_then(|t| t.as_str()).unwrap_or_default();
    let coordinates = geom.get("coordinates").ok_or_else(|| FetchError::InvalidGeometry {
        reason: "geometry has no coordinates".to_string(),
    })?;

    let ring = match gtype {
        "Polygon" => coordinates.get(0),
        "MultiPolygon" => coordinates.get(0).and_then(|p| p.get(0)),
        other => {
            return Err(FetchError::InvalidGeometry {
                reason: format!("unsupported geometry type '{other}'"),
            })
        }
    }
    .and_then(|r| r.as_array())
    .ok_or_else(|| FetchError::InvalidGeometry {
        reason: "geometry has no rings".to_string(),
    })?;

    let mut coords = Vec::with_capacity(ring.len());
    for pair in ring {
        let x = pair.get(0).and_then(|v| v.as_f64());
        let y = pair.get(1).and_then(|v| v.as_f64());
        match (x, y) {
            (Some(x), Some(y)) => coords.push(coord! { x: x, y: y }),
            _ => {
                return Err(FetchError::InvalidGeometry {
                    reason: "non-numeric coordinate in ring".to_string(),
                })
            }
        }
    }
    Ok(Polygon::new(LineString::from(coords), vec![]))
}
