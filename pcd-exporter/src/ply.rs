use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Vertex record of the ASCII PLY handed to the external Draco encoder.
pub struct PlyVertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub fn write_ascii_ply(path: &Path, vertices: &[PlyVertex]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", vertices.len())?;
    writeln!(out, "property float x")?;
    writeln!(out, "property float y")?;
    writeln!(out, "property float z")?;
    writeln!(out, "property uchar red")?;
    writeln!(out, "property uchar green")?;
    writeln!(out, "property uchar blue")?;
    writeln!(out, "end_header")?;
    for v in vertices {
        writeln!(out, "{} {} {} {} {} {}", v.x, v.y, v.z, v.r, v.g, v.b)?;
    }
    out.flush()
}
