//! Error types for nats-memory-server.

use std::path::PathBuf;

/// Result type for acquisition and lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // acquisition
    #[error("Failed to download {url}: {status}")]
    DownloadFailed { url: String, status: String },

    #[error("No filename in content-disposition of {url}")]
    MissingFilename { url: String },

    #[error("Invalid file path: {}", path.display())]
    PathTraversalDetected { path: PathBuf },

    #[error("Building nats-server from source failed{}", exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    BuildFailed { exit_code: Option<i32> },

    #[error("nats-server binary missing at {} and downloading is disabled", bin_path.display())]
    DownloadDisabled { bin_path: PathBuf },

    #[error("Invalid proxy {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to extract {}: {message}", archive.display())]
    Extraction { archive: PathBuf, message: String },

    #[error("Invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    // lifecycle
    #[error("Nats server already started at {url}")]
    AlreadyStarted { url: String },

    #[error("Failed to spawn {}: {source}", bin_path.display())]
    SpawnFailed {
        bin_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process was killed{}", code.map(|c| format!(" with exit code: {c}")).unwrap_or_default())]
    ProcessExited { code: Option<i32> },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures of the download/build pipeline.
    pub fn is_acquisition_error(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. }
                | Self::MissingFilename { .. }
                | Self::PathTraversalDetected { .. }
                | Self::BuildFailed { .. }
                | Self::DownloadDisabled { .. }
                | Self::InvalidProxy { .. }
                | Self::Extraction { .. }
                | Self::Http(_)
        )
    }

    /// True for failures of `NatsServer::start`.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyStarted { .. } | Self::SpawnFailed { .. } | Self::ProcessExited { .. }
        )
    }
}
