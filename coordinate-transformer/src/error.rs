use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjError {
    #[error("no transformation between EPSG:{src} and EPSG:{dst}: {message}")]
    UnknownCrs { src: u16, dst: u16, message: String },
    #[error("PROJ initialization failed ({context}): {message}")]
    Init {
        context: &'static str,
        message: String,
    },
    #[error("transform EPSG:{src} -> EPSG:{dst} failed: {message}")]
    Transform { src: u16, dst: u16, message: String },
}
