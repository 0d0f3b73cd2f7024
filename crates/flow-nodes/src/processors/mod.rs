//! Processing nodes
//!
//! Transforms applied to units as they move through a flow.

mod model;

pub use model::{InferenceModel, ModelProcessor};
