use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("csrf token marker not found on landing page")]
    #[diagnostic(help("the site's page layout may have changed"))]
    TokenExtraction,

    #[error("login rejected with status {status}")]
    LoginFailed { status: u16 },

    #[error("no credentials available (pass --username/--password or run `credentials --set`)")]
    MissingCredentials,

    #[error("site request failed: {0}")]
    SiteHttp(String),

    #[error("unexpected search response shape: {0}")]
    Schema(String),

    #[error("search results exhausted after {collected} of {target} items")]
    ExhaustedResults { collected: usize, target: usize },

    #[error("download failed with status {status}")]
    DownloadFailed { status: u16 },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("object store request failed: {0}")]
    ObjectStoreHttp(String),

    #[error("object store returned status {status}: {message}")]
    ObjectStoreStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid category label: {0}")]
    InvalidCategory(String),

    #[error("not found in local library: {0}")]
    ItemNotFound(String),
}

impl HarvestError {
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            HarvestError::TokenExtraction
                | HarvestError::LoginFailed { .. }
                | HarvestError::MissingCredentials
        )
    }

    /// Per-item failures that point at the site and feed the download limit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarvestError::DownloadFailed { .. } | HarvestError::SiteHttp(_)
        )
    }
}
