use std::path::PathBuf;
use thiserror::Error;

use crate::core::harvest::PageError;

/// A failure confined to one image. Counted and logged, never fatal to a batch.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination already exists: {path:?}")]
    AlreadyExists { path: PathBuf },
}

impl ItemError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A failure that ends one stage. The pipeline logs it and moves on.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Search page failure: {0}")]
    Page(#[from] PageError),

    #[error("Failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Interrupted,
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Malformed or unreadable configuration. Aborts the run before any stage.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid split ratios {0:?}: expected \"train/valid/test\" summing to 100")]
    Ratios(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Returned by the orchestrator when a run was interrupted.
#[derive(Debug, Error)]
#[error("Interrupted")]
pub struct Interrupted;
