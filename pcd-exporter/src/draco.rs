use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ExportError;

/// Wrapper around the external `draco_encoder` binary used to compress
/// point payloads.
#[derive(Debug, Clone)]
pub struct DracoEncoder {
    pub program: PathBuf,
    pub quantization_bits: u8,
    pub compression_level: u8,
}

impl DracoEncoder {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            quantization_bits: 11,
            compression_level: 7,
        }
    }

    /// Runs the encoder on a PLY point cloud, producing a .drc blob.
    pub fn encode(&self, input_ply: &Path, output_drc: &Path) -> Result<(), ExportError> {
        let output = Command::new(&self.program)
            .arg("-point_cloud")
            .arg("-i")
            .arg(input_ply)
            .arg("-o")
            .arg(output_drc)
            .arg("-qp")
            .arg(self.quantization_bits.to_string())
            .arg("-cl")
            .arg(self.compression_level.to_string())
            .output()?;

        if !output.status.success() {
            return Err(ExportError::Encoder {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_surfaces_as_an_error() {
        let encoder = DracoEncoder::new(PathBuf::from("/nonexistent/draco_encoder"));
        let dir = tempfile::tempdir().unwrap();
        let result = encoder.encode(&dir.path().join("in.ply"), &dir.path().join("out.drc"));
        assert!(result.is_err());
    }

    #[test]
    fn failing_encoder_reports_status_and_stderr() {
        // `false` is a universally available command that exits non-zero
        let encoder = DracoEncoder::new(PathBuf::from("false"));
        let dir = tempfile::tempdir().unwrap();
        let result = encoder.encode(&dir.path().join("in.ply"), &dir.path().join("out.drc"));
        assert!(matches!(result, Err(ExportError::Encoder { .. })));
    }
}
