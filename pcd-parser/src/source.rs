use std::path::{Path, PathBuf};

use las::Reader;

use pcd_core::octree::tree::GridTree;
use pcd_core::pointcloud::point::SourcePoint;

use crate::error::LasError;

/// An input LAS file: sequential ingestion into a tree plus random access
/// to individual records by row index.
pub struct LasSource {
    reader: Reader,
    path: PathBuf,
}

impl LasSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LasError> {
        let path = path.as_ref().to_path_buf();
        Ok(Self {
            reader: Reader::from_path(&path)?,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &las::Header {
        self.reader.header()
    }

    pub fn point_count(&self) -> u64 {
        self.reader.header().number_of_points()
    }

    /// Edge lengths of the header bounding box.
    pub fn edges(&self) -> (f64, f64, f64) {
        let bounds = self.reader.header().bounds();
        (
            bounds.max.x - bounds.min.x,
            bounds.max.y - bounds.min.y,
            bounds.max.z - bounds.min.z,
        )
    }

    /// Streams every record into the tree's ingestion pipeline. Returns the
    /// number of records read.
    pub fn read_into(
        &mut self,
        tree: &GridTree,
        srid: u16,
        eight_bit: bool,
    ) -> Result<u64, LasError> {
        let mut count = 0u64;
        for point in self.reader.points() {
            let point = point?;
            tree.add_point(srid, source_point(&point, count, eight_bit));
            count += 1;
        }
        Ok(count)
    }

    /// Random access by record index, used to re-emit LAS companion files
    /// with every original attribute intact.
    pub fn point(&mut self, index: u64) -> Result<las::Point, LasError> {
        self.reader.seek(index)?;
        self.reader
            .read_point()?
            .ok_or(LasError::PointOutOfRange(index))
    }
}

fn source_point(point: &las::Point, index: u64, eight_bit: bool) -> SourcePoint {
    let (r, g, b) = match point.color {
        Some(color) => (
            narrow(color.red, eight_bit),
            narrow(color.green, eight_bit),
            narrow(color.blue, eight_bit),
        ),
        None => (0, 0, 0),
    };
    SourcePoint {
        x: point.x,
        y: point.y,
        z: point.z,
        r,
        g,
        b,
        intensity: narrow(point.intensity, eight_bit),
        classification: u8::from(point.classification),
        source_index: index,
    }
}

/// LAS colors and intensities are 16 bit; tiles carry 8. By default the
/// high byte is taken; files already encoded in eight bits keep the low
/// byte as-is.
fn narrow(value: u16, eight_bit: bool) -> u8 {
    if eight_bit {
        value.min(255) as u8
    } else {
        (value >> 8) as u8
    }
}
