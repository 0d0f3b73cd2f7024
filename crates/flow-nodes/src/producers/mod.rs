//! Producer nodes
//!
//! Sources that feed units into a flow.

mod image;
mod jsonl;

pub use image::{ImageFolderProducer, IMAGE_EXTENSIONS};
pub use jsonl::JsonLinesProducer;
