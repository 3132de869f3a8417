use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoidError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed geoid grid: {0}")]
    Parse(String),
}

/// Geoid undulation lookup: the height of the geoid above the reference
/// ellipsoid at a geographic position, in meters. The actual gravitational
/// model is external data; this trait is the seam it plugs in through.
pub trait GeoidModel: Send + Sync {
    fn height_offset(&self, lon: f64, lat: f64) -> f64;
}

/// Geoid undulations sampled over a regular geographic grid (ESRI ASCII
/// raster layout, first row northmost), bilinearly interpolated. Positions
/// outside the grid clamp to the border cells; NODATA samples count as 0.
pub struct GridGeoidModel {
    ncols: usize,
    nrows: usize,
    xll: f64,
    yll: f64,
    cell: f64,
    nodata: f64,
    values: Vec<f64>,
}

impl GridGeoidModel {
    pub fn from_ascii_grid(path: &Path) -> Result<Self, GeoidError> {
        Self::parse(BufReader::new(File::open(path)?))
    }

    fn parse(reader: impl BufRead) -> Result<Self, GeoidError> {
        let mut ncols = None;
        let mut nrows = None;
        let mut xll = None;
        let mut yll = None;
        let mut cell = None;
        let mut nodata = -9999.0;
        let mut values = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(first) = tokens.next() else {
                continue;
            };
            if first.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
                let value: f64 = tokens
                    .next()
                    .ok_or_else(|| GeoidError::Parse(format!("header '{first}' has no value")))?
                    .parse()
                    .map_err(|_| GeoidError::Parse(format!("bad value for header '{first}'")))?;
                match first.to_ascii_lowercase().as_str() {
                    "ncols" => ncols = Some(value as usize),
                    "nrows" => nrows = Some(value as usize),
                    "xllcorner" => xll = Some(value),
                    "yllcorner" => yll = Some(value),
                    "cellsize" => cell = Some(value),
                    "nodata_value" => nodata = value,
                    other => {
                        return Err(GeoidError::Parse(format!("unknown header '{other}'")));
                    }
                }
                continue;
            }
            for token in std::iter::once(first).chain(tokens) {
                values.push(
                    token
                        .parse()
                        .map_err(|_| GeoidError::Parse(format!("bad sample '{token}'")))?,
                );
            }
        }

        let ncols = ncols.ok_or_else(|| GeoidError::Parse("missing ncols".into()))?;
        let nrows = nrows.ok_or_else(|| GeoidError::Parse("missing nrows".into()))?;
        if values.len() != ncols * nrows {
            return Err(GeoidError::Parse(format!(
                "expected {} samples, found {}",
                ncols * nrows,
                values.len()
            )));
        }

        Ok(Self {
            ncols,
            nrows,
            xll: xll.ok_or_else(|| GeoidError::Parse("missing xllcorner".into()))?,
            yll: yll.ok_or_else(|| GeoidError::Parse("missing yllcorner".into()))?,
            cell: cell.ok_or_else(|| GeoidError::Parse("missing cellsize".into()))?,
            nodata,
            values,
        })
    }

    fn sample(&self, col: usize, row: usize) -> f64 {
        let value = self.values[row * self.ncols + col];
        if (value - self.nodata).abs() < f64::EPSILON {
            0.0
        } else {
            value
        }
    }
}

impl GeoidModel for GridGeoidModel {
    fn height_offset(&self, lon: f64, lat: f64) -> f64 {
        // fractional position in cell-center coordinates; row 0 is northmost
        let col = (lon - self.xll) / self.cell - 0.5;
        let row = (self.yll + self.nrows as f64 * self.cell - lat) / self.cell - 0.5;

        let col = col.clamp(0.0, (self.ncols - 1) as f64);
        let row = row.clamp(0.0, (self.nrows - 1) as f64);

        let c0 = col.floor() as usize;
        let r0 = row.floor() as usize;
        let c1 = (c0 + 1).min(self.ncols - 1);
        let r1 = (r0 + 1).min(self.nrows - 1);
        let fc = col - c0 as f64;
        let fr = row - r0 as f64;

        let top = self.sample(c0, r0) * (1.0 - fc) + self.sample(c1, r0) * fc;
        let bottom = self.sample(c0, r1) * (1.0 - fc) + self.sample(c1, r1) * fc;
        top * (1.0 - fr) + bottom * fr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const GRID: &str = "\
ncols 2
nrows 2
xllcorner 10.0
yllcorner 40.0
cellsize 1.0
NODATA_value -9999
1.0 2.0
3.0 4.0
";

    fn model() -> GridGeoidModel {
        GridGeoidModel::parse(Cursor::new(GRID)).unwrap()
    }

    #[test]
    fn parses_headers_and_samples() {
        let model = model();
        assert_eq!(model.ncols, 2);
        assert_eq!(model.nrows, 2);
        assert_eq!(model.values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn cell_centers_return_exact_samples() {
        let model = model();
        // first row is the northern one
        assert_eq!(model.height_offset(10.5, 41.5), 1.0);
        assert_eq!(model.height_offset(11.5, 41.5), 2.0);
        assert_eq!(model.height_offset(10.5, 40.5), 3.0);
        assert_eq!(model.height_offset(11.5, 40.5), 4.0);
    }

    #[test]
    fn interpolates_between_centers() {
        let model = model();
        let mid = model.height_offset(11.0, 41.0);
        assert!((mid - 2.5).abs() < 1e-12);
    }

    #[test]
    fn clamps_outside_the_grid() {
        let model = model();
        assert_eq!(model.height_offset(-180.0, 89.0), 1.0);
        assert_eq!(model.height_offset(180.0, -89.0), 4.0);
    }

    #[test]
    fn rejects_sample_count_mismatch() {
        let result = GridGeoidModel::parse(Cursor::new(
            "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1.0 2.0 3.0\n",
        ));
        assert!(matches!(result, Err(GeoidError::Parse(_))));
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoid.asc");
        std::fs::write(&path, GRID).unwrap();
        let model = GridGeoidModel::from_ascii_grid(&path).unwrap();
        assert_eq!(model.height_offset(10.5, 41.5), 1.0);
    }
}
