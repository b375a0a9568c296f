//! Error types for the sketchforge pipeline

mod types;

pub use types::*;
