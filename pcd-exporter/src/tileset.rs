use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use pcd_core::octree::node::{GeometricErrorMeta, GridNode};

use crate::error::ExportError;
use crate::transform::EmitTransform;

/// Whether child tiles supplement (`ADD`) or supplant (`REPLACE`) their
/// parent's points at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineMode {
    Add,
    Replace,
}

impl RefineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefineMode::Add => "ADD",
            RefineMode::Replace => "REPLACE",
        }
    }
}

impl fmt::Display for RefineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefineMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(RefineMode::Add),
            "REPLACE" => Ok(RefineMode::Replace),
            other => Err(format!("refine mode must be ADD or REPLACE, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tileset {
    pub asset: Asset,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    pub root: Root,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub content: Content,
    #[serde(rename = "boundingVolume")]
    pub bounding_volume: BoundingVolume,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    pub refine: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildTile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildTile {
    pub content: Content,
    #[serde(rename = "boundingVolume")]
    pub bounding_volume: BoundingVolume,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    pub refine: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    /// `[west, south, east, north, min_z, max_z]`, angles in radians.
    pub region: [f64; 6],
}

/// Sorts a child path label's digits so merged labels like "074" always
/// yield the canonical directory name "047".
pub fn canonical_label(path: &str) -> String {
    let mut digits: Vec<char> = path.chars().collect();
    digits.sort_unstable();
    digits.into_iter().collect()
}

/// Builds the tileset descriptor for a non-leaf (or root) node: its own
/// region and geometric error plus one child descriptor per non-empty
/// child, pointing at either the child's own tileset or its bare tile.
pub fn tileset_for_node(
    node: &GridNode,
    transform: &dyn EmitTransform,
    meta: &GeometricErrorMeta,
    refine: RefineMode,
) -> Result<Tileset, ExportError> {
    if node.is_leaf() && !node.is_root() {
        return Err(ExportError::LeafTileset);
    }

    let geometric_error = node.geometric_error(meta);
    let mut children = Vec::new();
    if let Some(slots) = node.children() {
        for (index, child) in slots.iter().enumerate() {
            if child.total_count() == 0 {
                continue;
            }
            let label = canonical_label(node.child_path(index));
            let filename = if child.is_leaf() {
                "content.pnts"
            } else {
                "tileset.json"
            };
            children.push(ChildTile {
                content: Content {
                    url: format!("{label}/{filename}"),
                },
                bounding_volume: BoundingVolume {
                    region: transform.region_for(child.bounding_box())?,
                },
                geometric_error: child.geometric_error(meta),
                refine: refine.as_str().to_string(),
            });
        }
    }

    Ok(Tileset {
        asset: Asset {
            version: "1.0".to_string(),
        },
        geometric_error,
        root: Root {
            content: Content {
                url: "content.pnts".to_string(),
            },
            bounding_volume: BoundingVolume {
                region: transform.region_for(node.bounding_box())?,
            },
            geometric_error,
            refine: refine.as_str().to_string(),
            children,
        },
    })
}

pub fn read_tileset(path: &Path) -> Result<Tileset, ExportError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn write_tileset(path: &Path, tileset: &Tileset) -> Result<(), ExportError> {
    std::fs::write(path, serde_json::to_string_pretty(tileset)?)?;
    Ok(())
}
