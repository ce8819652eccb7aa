pub mod collector;
pub mod config;
pub mod constants;
pub mod converters;
pub mod dedup;
mod error;
pub mod pipeline;
pub mod stages;

pub use collector::{FindingKeyCollector, PartialLoad};
pub use config::{ConfigError, IntegrationConfig};
pub use error::StageError;
pub use pipeline::{Pipeline, RunReport, StageOutcome};
pub use stages::{StageId, StageReport, StageState};
