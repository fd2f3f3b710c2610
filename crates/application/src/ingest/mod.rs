pub mod pipeline;

pub use pipeline::{IngestPipeline, IngestStats, IngestStatsSnapshot, SUBSCRIPTIONS};
