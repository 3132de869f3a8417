use std::path::{Path, PathBuf};

use las::{Reader, Writer};

use crate::error::LasError;
use crate::source::LasSource;

/// Writes the records at the given row indices from a source LAS into a
/// new LAS file, preserving every record attribute. The header is cloned
/// from the source; the writer recomputes counts and bounds on close.
pub fn write_point_subset(
    source: &mut LasSource,
    indices: impl IntoIterator<Item = u64>,
    dst: &Path,
) -> Result<u64, LasError> {
    if dst.exists() {
        std::fs::remove_file(dst)?;
    }
    let header = source.header().clone();
    let mut writer = Writer::from_path(dst, header)?;
    let mut written = 0u64;
    for index in indices {
        writer.write_point(source.point(index)?)?;
        written += 1;
    }
    writer.close()?;
    log::info!("wrote {written} points to {}", dst.display());
    Ok(written)
}

/// Concatenates the given LAS files into a single file at `dst`. The header
/// is cloned from the first input, so all inputs must share a point format;
/// extents and counts are recomputed from the written records.
pub fn merge_las_files(paths: &[PathBuf], dst: &Path) -> Result<u64, LasError> {
    let first = paths.first().ok_or(LasError::NoInput)?;
    let header = Reader::from_path(first)?.header().clone();

    if dst.exists() {
        std::fs::remove_file(dst)?;
    }
    let mut writer = Writer::from_path(dst, header)?;
    let mut written = 0u64;
    for (i, path) in paths.iter().enumerate() {
        log::info!("merging LAS {}/{}: {}", i + 1, paths.len(), path.display());
        let mut reader = Reader::from_path(path)?;
        for point in reader.points() {
            writer.write_point(point?)?;
            written += 1;
        }
    }
    writer.close()?;
    Ok(written)
}
