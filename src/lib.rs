//! Image dataset assembly: harvest search results, download, deduplicate,
//! normalize, and split into train/valid/test directories.

pub mod batch;
pub mod cancel;
pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod logging;
pub mod pipeline;
pub mod workdir;

pub use cancel::CancelToken;
pub use config::{Config, Features, SplitRatios};
pub use error::{ConfigError, Interrupted, ItemError, StageError};
pub use pipeline::{Pipeline, PipelineReport, Stage, StageStatus};
pub use workdir::{Bucket, ImageRef, Origin, WorkingDirectory};
