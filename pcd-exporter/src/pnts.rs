use serde::Serialize;

use pcd_core::pointcloud::point::Point;

use crate::error::ExportError;
use crate::tileset::RefineMode;
use crate::transform::EmitTransform;
use crate::work::WorkUnit;

#[derive(Serialize)]
struct ByteOffset {
    #[serde(rename = "byteOffset")]
    byte_offset: u32,
}

#[derive(Serialize)]
struct FeatureTableHeader {
    #[serde(rename = "POINTS_LENGTH")]
    points_length: u32,
    #[serde(rename = "RTC_CENTER")]
    rtc_center: [f64; 3],
    #[serde(rename = "POSITION")]
    position: ByteOffset,
    #[serde(rename = "RGB")]
    rgb: ByteOffset,
    #[serde(rename = "extensions", skip_serializing_if = "Option::is_none")]
    extensions: Option<FeatureTableExtensions>,
}

#[derive(Serialize)]
struct FeatureTableExtensions {
    #[serde(rename = "3DTILES_draco_point_compression")]
    draco: DracoExtension,
}

#[derive(Serialize)]
struct DracoExtension {
    #[serde(rename = "byteLength")]
    byte_length: u32,
    #[serde(rename = "byteOffset")]
    byte_offset: u32,
    properties: DracoProperties,
}

#[derive(Serialize)]
struct DracoProperties {
    #[serde(rename = "POSITION")]
    position: u32,
    #[serde(rename = "RGB")]
    rgb: u32,
}

#[derive(Serialize)]
struct BatchTableHeader {
    #[serde(rename = "INTENSITY")]
    intensity: BatchAttribute,
    #[serde(rename = "CLASSIFICATION")]
    classification: BatchAttribute,
}

#[derive(Serialize)]
struct BatchAttribute {
    #[serde(rename = "byteOffset")]
    byte_offset: u32,
    #[serde(rename = "componentType")]
    component_type: &'static str,
    #[serde(rename = "type")]
    attribute_type: &'static str,
}

/// A tile's payload decomposed into attribute arrays, with positions in
/// ECEF expressed as `f32` offsets from the tile center.
pub struct TileData {
    pub rtc_center: [f64; 3],
    pub positions: Vec<f32>,
    pub colors: Vec<u8>,
    pub intensities: Vec<u8>,
    pub classifications: Vec<u8>,
    pub count: usize,
}

/// The points a tile emits: the node's own, plus, under REPLACE refinement,
/// every ancestor point that falls inside the node's bounding box.
pub fn collect_tile_points(unit: &WorkUnit, refine: RefineMode) -> Vec<Point> {
    let mut points = unit.node.points().to_vec();
    if refine == RefineMode::Replace {
        let bbox = unit.node.bounding_box();
        for ancestor in &unit.ancestors {
            for point in ancestor.points() {
                if bbox.contains(point.x, point.y, point.z) {
                    points.push(*point);
                }
            }
        }
    }
    points
}

/// Converts the emitted points to ECEF and centers them on their average.
pub fn tile_data(points: &[Point], transform: &dyn EmitTransform) -> Result<TileData, ExportError> {
    let count = points.len();
    let mut coords = Vec::with_capacity(count * 3);
    let mut colors = Vec::with_capacity(count * 3);
    let mut intensities = Vec::with_capacity(count);
    let mut classifications = Vec::with_capacity(count);

    let mut rtc_center = [0.0f64; 3];
    for point in points {
        let (x, y, z) = transform.to_ecef(point.x, point.y, point.z)?;
        coords.extend_from_slice(&[x, y, z]);
        colors.extend_from_slice(&[point.r, point.g, point.b]);
        intensities.push(point.intensity);
        classifications.push(point.classification);
        rtc_center[0] += x;
        rtc_center[1] += y;
        rtc_center[2] += z;
    }
    if count > 0 {
        for component in &mut rtc_center {
            *component /= count as f64;
        }
    }

    let positions = coords
        .chunks_exact(3)
        .flat_map(|coord| {
            [
                (coord[0] - rtc_center[0]) as f32,
                (coord[1] - rtc_center[1]) as f32,
                (coord[2] - rtc_center[2]) as f32,
            ]
        })
        .collect();

    Ok(TileData {
        rtc_center,
        positions,
        colors,
        intensities,
        classifications,
        count,
    })
}

/// Lays out a .pnts body: 28-byte header, feature table JSON, feature table
/// binary (positions then colors), batch table JSON, batch table binary
/// (intensities then classifications). Both JSON documents are padded with
/// trailing spaces to a multiple of four bytes.
pub fn build_pnts(data: &TileData) -> Result<Vec<u8>, ExportError> {
    let feature_json = pad_to_four(serde_json::to_string(&FeatureTableHeader {
        points_length: data.count as u32,
        rtc_center: data.rtc_center,
        position: ByteOffset { byte_offset: 0 },
        rgb: ByteOffset {
            byte_offset: data.count as u32 * 12,
        },
        extensions: None,
    })?);
    let batch_json = pad_to_four(serde_json::to_string(&BatchTableHeader {
        intensity: BatchAttribute {
            byte_offset: 0,
            component_type: "UNSIGNED_BYTE",
            attribute_type: "SCALAR",
        },
        classification: BatchAttribute {
            byte_offset: data.count as u32,
            component_type: "UNSIGNED_BYTE",
            attribute_type: "SCALAR",
        },
    })?);

    let feature_binary_len = data.positions.len() * 4 + data.colors.len();
    let batch_binary_len = data.intensities.len() + data.classifications.len();
    let total = 28 + feature_json.len() + feature_binary_len + batch_json.len() + batch_binary_len;

    let mut out = Vec::with_capacity(total);
    write_header(
        &mut out,
        total as u32,
        feature_json.len() as u32,
        feature_binary_len as u32,
        batch_json.len() as u32,
        batch_binary_len as u32,
    );
    out.extend_from_slice(feature_json.as_bytes());
    for position in &data.positions {
        out.extend_from_slice(&position.to_le_bytes());
    }
    out.extend_from_slice(&data.colors);
    out.extend_from_slice(batch_json.as_bytes());
    out.extend_from_slice(&data.intensities);
    out.extend_from_slice(&data.classifications);
    Ok(out)
}

/// Draco layout: the feature table binary section is the Draco blob and the
/// batch table is absent (positions and colors travel inside the blob).
pub fn build_pnts_draco(
    count: usize,
    rtc_center: [f64; 3],
    draco: &[u8],
) -> Result<Vec<u8>, ExportError> {
    let feature_json = pad_to_four(serde_json::to_string(&FeatureTableHeader {
        points_length: count as u32,
        rtc_center,
        position: ByteOffset { byte_offset: 0 },
        rgb: ByteOffset { byte_offset: 0 },
        extensions: Some(FeatureTableExtensions {
            draco: DracoExtension {
                byte_length: draco.len() as u32,
                byte_offset: 0,
                properties: DracoProperties {
                    position: 0,
                    rgb: 1,
                },
            },
        }),
    })?);

    let total = 28 + feature_json.len() + draco.len();
    let mut out = Vec::with_capacity(total);
    write_header(
        &mut out,
        total as u32,
        feature_json.len() as u32,
        draco.len() as u32,
        0,
        0,
    );
    out.extend_from_slice(feature_json.as_bytes());
    out.extend_from_slice(draco);
    Ok(out)
}

fn write_header(
    out: &mut Vec<u8>,
    total: u32,
    feature_json_len: u32,
    feature_binary_len: u32,
    batch_json_len: u32,
    batch_binary_len: u32,
) {
    out.extend_from_slice(b"pnts");
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&feature_json_len.to_le_bytes());
    out.extend_from_slice(&feature_binary_len.to_le_bytes());
    out.extend_from_slice(&batch_json_len.to_le_bytes());
    out.extend_from_slice(&batch_binary_len.to_le_bytes());
}

fn pad_to_four(mut json: String) -> String {
    while json.len() % 4 != 0 {
        json.push(' ');
    }
    json
}
