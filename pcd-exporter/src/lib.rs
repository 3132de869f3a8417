pub mod consumer;
pub mod draco;
pub mod error;
pub mod pipeline;
pub mod pnts;
pub mod ply;
pub mod producer;
pub mod tileset;
pub mod transform;
pub mod work;

pub use error::ExportError;
pub use pipeline::{run_export, ExportOptions, TransformFactory};
pub use tileset::RefineMode;
