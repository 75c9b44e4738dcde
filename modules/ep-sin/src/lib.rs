pub mod contract;
pub mod dedup;
pub mod dlq;
pub mod error;
pub mod governance;
pub mod pipeline;
pub mod producer_registry;
pub mod routing;

pub use error::SinError;
pub use pipeline::{SinPipeline, MAX_BATCH_SIZE};
