//! Domain layer: models, errors, and trait seams.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{EngineError, EngineResult};
