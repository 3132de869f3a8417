pub mod error;
pub mod source;
pub mod writer;

pub use error::LasError;
pub use source::LasSource;
