//! Error types for seqload.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A key was claimed or completed twice. Indicates a correctness bug,
    /// never an environmental failure.
    #[error("claim conflict on key {key}: {detail}")]
    ClaimConflict { key: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
