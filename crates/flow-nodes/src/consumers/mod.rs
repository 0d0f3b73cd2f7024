//! Consumer nodes
//!
//! Terminal sinks: CSV files, in-memory collection, and webhook delivery.

mod collector;
mod file;
mod webhook;

pub use collector::CollectorConsumer;
pub use file::CsvAppenderConsumer;
pub use webhook::WebhookConsumer;
