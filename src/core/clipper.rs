//! Raster clipping: decode the downloaded GeoTIFF, window it to the
//! buffered AOI in the raster's native CRS, optionally mask pixels
//! outside the polygon, and re-encode with shifted georeferencing.

use crate::core::geometry::{is_geographic, project_polygon, WGS84};
use crate::domain::model::AreaOfInterest;
use crate::utils::error::{FetchError, Result};
use geo::{BoundingRect, Contains, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Cursor, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{Gray16, Gray8, RGB16, RGB8};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

// GeoTIFF tag ids (not in the standard tiff tag set)
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GEO_ASCII_PARAMS: u16 = 34737;

// GeoKey ids and values
const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

// Snap tolerance in pixel fractions when converting world coordinates
// to window columns/rows; absorbs reprojection round-trip noise.
const GRID_EPS: f64 = 1e-6;

/// How pixels inside the clip window but outside the AOI polygon are
/// treated.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ClipPolicy {
    /// Keep the full rectangular window.
    #[default]
    Extent,
    /// Zero out pixels whose centers fall outside the polygon.
    Mask,
}

/// North-up affine georeferencing: origin is the outer corner of pixel
/// (0, 0); `pixel_h` is positive and applied downwards.
#[derive(Debug, Clone, Copy)]
pub struct GridTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_w: f64,
    pub pixel_h: f64,
}

impl GridTransform {
    fn x_at(&self, col: usize) -> f64 {
        self.origin_x + col as f64 * self.pixel_w
    }

    fn y_at(&self, row: usize) -> f64 {
        self.origin_y - row as f64 * self.pixel_h
    }

    fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.x_at(col) + self.pixel_w / 2.0,
            self.y_at(row) - self.pixel_h / 2.0,
        )
    }
}

#[derive(Debug, Clone)]
enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

#[derive(Debug)]
struct SourceRaster {
    width: usize,
    height: usize,
    bands: usize,
    samples: Samples,
    transform: GridTransform,
    epsg: Option<u32>,
}

/// The clipped scene, encoded and ready for the output writer.
#[derive(Debug, Clone)]
pub struct ClippedRaster {
    pub bytes: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub epsg: u32,
    /// [min_x, min_y, max_x, max_y] in the raster CRS.
    pub bounds: [f64; 4],
}

/// Clip a downloaded TCI raster to the AOI's buffered polygon.
///
/// The polygon is reprojected from WGS84 into the raster CRS, the
/// pixel window inside the intersection of both extents is computed,
/// and a new GeoTIFF is encoded for exactly that window with the same
/// resolution and pixel type and a transform shifted to the window
/// origin. The window is snapped inwards to pixel boundaries so the
/// output bounds never exceed the AOI/raster intersection.
/// `scene_epsg` (from the catalog record) wins over the embedded
/// GeoKey when both are present.
pub fn clip_to_aoi(
    scene_id: &str,
    tci_path: &Path,
    aoi: &AreaOfInterest,
    scene_epsg: Option<u32>,
    policy: ClipPolicy,
) -> Result<ClippedRaster> {
    let source = read_source(tci_path)?;
    let epsg = scene_epsg.or(source.epsg).ok_or_else(|| {
        FetchError::Raster("raster has no CRS (no catalog EPSG and no GeoKey)".to_string())
    })?;

    let aoi_native = project_polygon(&aoi.search_polygon, WGS84, epsg)?;
    let aoi_rect = aoi_native
        .bounding_rect()
        .ok_or_else(|| FetchError::InvalidGeometry {
            reason: "AOI polygon has no extent".to_string(),
        })?;

    let t = source.transform;
    let raster_min_x = t.origin_x;
    let raster_max_x = t.x_at(source.width);
    let raster_max_y = t.origin_y;
    let raster_min_y = t.y_at(source.height);

    let ix_min = aoi_rect.min().x.max(raster_min_x);
    let ix_max = aoi_rect.max().x.min(raster_max_x);
    let iy_min = aoi_rect.min().y.max(raster_min_y);
    let iy_max = aoi_rect.max().y.min(raster_max_y);
    if ix_min >= ix_max || iy_min >= iy_max {
        return Err(FetchError::ClipOutOfBounds {
            scene_id: scene_id.to_string(),
        });
    }

    let col0 = (((ix_min - t.origin_x) / t.pixel_w - GRID_EPS).ceil().max(0.0)) as usize;
    let col1 = ((((ix_max - t.origin_x) / t.pixel_w + GRID_EPS).floor()).min(source.width as f64))
        as usize;
    let row0 = (((t.origin_y - iy_max) / t.pixel_h - GRID_EPS).ceil().max(0.0)) as usize;
    let row1 = ((((t.origin_y - iy_min) / t.pixel_h + GRID_EPS).floor()).min(source.height as f64))
        as usize;
    if col1 <= col0 || row1 <= row0 {
        return Err(FetchError::ClipOutOfBounds {
            scene_id: scene_id.to_string(),
        });
    }
    let out_w = col1 - col0;
    let out_h = row1 - row0;

    let out_transform = GridTransform {
        origin_x: t.x_at(col0),
        origin_y: t.y_at(row0),
        pixel_w: t.pixel_w,
        pixel_h: t.pixel_h,
    };

    let mut cropped = match &source.samples {
        Samples::U8(data) => Samples::U8(crop(data, source.width, source.bands, col0, col1, row0, row1)),
        Samples::U16(data) => Samples::U16(crop(data, source.width, source.bands, col0, col1, row0, row1)),
    };

    if policy == ClipPolicy::Mask {
        match &mut cropped {
            Samples::U8(data) => {
                mask_outside(data, out_w, out_h, source.bands, &out_transform, &aoi_native)
            }
            Samples::U16(data) => {
                mask_outside(data, out_w, out_h, source.bands, &out_transform, &aoi_native)
            }
        }
    }

    let bytes = encode_geotiff(&cropped, out_w, out_h, source.bands, &out_transform, epsg)?;
    tracing::debug!("clipped {scene_id} to {out_w}x{out_h} pixels (EPSG:{epsg})");

    Ok(ClippedRaster {
        bytes,
        width: out_w,
        height: out_h,
        epsg,
        bounds: [
            out_transform.origin_x,
            out_transform.y_at(out_h),
            out_transform.x_at(out_w),
            out_transform.origin_y,
        ],
    })
}

fn read_source(path: &Path) -> Result<SourceRaster> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;
    let bands = match decoder.colortype()? {
        tiff::ColorType::Gray(_) => 1,
        tiff::ColorType::RGB(_) => 3,
        other => {
            return Err(FetchError::Raster(format!(
                "unsupported color type {other:?}"
            )))
        }
    };

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .ok_or_else(|| FetchError::Raster("missing ModelPixelScale tag".to_string()))?
        .into_f64_vec()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .ok_or_else(|| FetchError::Raster("missing ModelTiepoint tag".to_string()))?
        .into_f64_vec()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(FetchError::Raster(
            "malformed georeferencing tags".to_string(),
        ));
    }
    let pixel_w = scale[0];
    let pixel_h = scale[1];
    // The tiepoint maps raster (i, j) to world (x, y).
    let origin_x = tiepoint[3] - tiepoint[0] * pixel_w;
    let origin_y = tiepoint[4] + tiepoint[1] * pixel_h;

    let epsg = read_epsg_geokey(&mut decoder);

    let samples = match decoder.read_image()? {
        DecodingResult::U8(data) => Samples::U8(data),
        DecodingResult::U16(data) => Samples::U16(data),
        _ => return Err(FetchError::Raster("unsupported sample format".to_string())),
    };

    Ok(SourceRaster {
        width: width as usize,
        height: height as usize,
        bands,
        samples,
        transform: GridTransform {
            origin_x,
            origin_y,
            pixel_w,
            pixel_h,
        },
        epsg,
    })
}

fn read_epsg_geokey<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)
        .ok()??
        .into_u16_vec()
        .ok()?;
    // Entries of four shorts after the header: [key, location, count, value].
    for entry in keys.get(4..)?.chunks_exact(4) {
        if (entry[0] == KEY_PROJECTED_CS_TYPE || entry[0] == KEY_GEOGRAPHIC_TYPE) && entry[1] == 0 {
            return Some(entry[3] as u32);
        }
    }
    None
}

fn crop<T: Copy>(
    data: &[T],
    src_width: usize,
    bands: usize,
    col0: usize,
    col1: usize,
    row0: usize,
    row1: usize,
) -> Vec<T> {
    let out_w = col1 - col0;
    let mut out = Vec::with_capacity((row1 - row0) * out_w * bands);
    for row in row0..row1 {
        let start = (row * src_width + col0) * bands;
        out.extend_from_slice(&data[start..start + out_w * bands]);
    }
    out
}

fn mask_outside<T: Copy + Default>(
    data: &mut [T],
    width: usize,
    height: usize,
    bands: usize,
    transform: &GridTransform,
    polygon: &Polygon<f64>,
) {
    for row in 0..height {
        for col in 0..width {
            let (x, y) = transform.pixel_center(col, row);
            if !polygon.contains(&Point::new(x, y)) {
                let i = (row * width + col) * bands;
                for band in 0..bands {
                    data[i + band] = T::default();
                }
            }
        }
    }
}

fn encode_geotiff(
    samples: &Samples,
    width: usize,
    height: usize,
    bands: usize,
    transform: &GridTransform,
    epsg: u32,
) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        match (samples, bands) {
            (Samples::U8(data), 3) => {
                let mut image = encoder.new_image::<RGB8>(width as u32, height as u32)?;
                write_geo_tags(image.encoder(), transform, epsg)?;
                image.write_data(data)?;
            }
            (Samples::U8(data), 1) => {
                let mut image = encoder.new_image::<Gray8>(width as u32, height as u32)?;
                write_geo_tags(image.encoder(), transform, epsg)?;
                image.write_data(data)?;
            }
            (Samples::U16(data), 3) => {
                let mut image = encoder.new_image::<RGB16>(width as u32, height as u32)?;
                write_geo_tags(image.encoder(), transform, epsg)?;
                image.write_data(data)?;
            }
            (Samples::U16(data), 1) => {
                let mut image = encoder.new_image::<Gray16>(width as u32, height as u32)?;
                write_geo_tags(image.encoder(), transform, epsg)?;
                image.write_data(data)?;
            }
            _ => {
                return Err(FetchError::Raster(format!(
                    "unsupported band count {bands}"
                )))
            }
        }
    }
    Ok(cursor.into_inner())
}

fn write_geo_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
    dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
    transform: &GridTransform,
    epsg: u32,
) -> Result<()> {
    let pixel_scale = [transform.pixel_w, transform.pixel_h, 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), pixel_scale.as_slice())?;

    // Ties pixel (0, 0) to the window's upper-left world coordinate.
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), tiepoint.as_slice())?;

    let geographic = is_geographic(epsg);
    let mut keys: Vec<u16> = vec![1, 1, 0, 3];
    keys.extend_from_slice(&[
        KEY_MODEL_TYPE,
        0,
        1,
        if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]);
    if geographic {
        keys.extend_from_slice(&[KEY_GEOGRAPHIC_TYPE, 0, 1, epsg as u16]);
    } else {
        keys.extend_from_slice(&[KEY_PROJECTED_CS_TYPE, 0, 1, epsg as u16]);
    }
    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), keys.as_slice())?;

    if let Some(def) = u16::try_from(epsg).ok().and_then(crs_definitions::from_code) {
        // Null-terminated with pipe delimiters per the GeoTIFF spec.
        let ascii_params = format!("{}|", def.proj4);
        dir.write_tag(Tag::Unknown(TAG_GEO_ASCII_PARAMS), ascii_params.as_bytes())?;
    }
    Ok(())
}

/// Encode an RGB8 GeoTIFF. This is the same encoder the clipper uses
/// for its outputs, exposed for callers that need to materialize
/// rasters directly (and for test fixtures).
pub fn encode_rgb8(
    width: usize,
    height: usize,
    data: &[u8],
    transform: &GridTransform,
    epsg: u32,
) -> Result<Vec<u8>> {
    if data.len() != width * height * 3 {
        return Err(FetchError::Raster(format!(
            "pixel buffer length {} does not match {}x{}x3",
            data.len(),
            width,
            height
        )));
    }
    encode_geotiff(
        &Samples::U8(data.to_vec()),
        width,
        height,
        3,
        transform,
        epsg,
    )
}
