use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for figure loading, evaluation and export.
#[derive(Debug, Error)]
pub enum Error {
    #[error("resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    #[error("unknown task '{0}' (expected panel_splitting, label_recognition or panel_segmentation)")]
    UnknownTask(String),

    #[error("no data set registered under the name '{0}'")]
    UnknownDataset(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("gather failed: {0}")]
    Gather(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
