//! Error taxonomy for a narration run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NarrateError {
    #[error("No chapter files matching *.{extension} in {}", dir.display())]
    EmptyDirectory { dir: PathBuf, extension: String },

    #[error("Chapter '{chapter}' is empty after normalization")]
    EmptyContent { chapter: String },

    #[error("Cannot read chapter {}: {message}", path.display())]
    ChapterUnreadable { path: PathBuf, message: String },

    #[error("TTS request failed{}: {message}", status.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    TransportFailure {
        status: Option<u16>,
        message: String,
    },

    #[error("Output {} is only {size} bytes (minimum {min_bytes})", path.display())]
    UndersizedOutput {
        path: PathBuf,
        size: u64,
        min_bytes: u64,
    },

    #[error("Cannot write {}: {message}", path.display())]
    WriteFailure { path: PathBuf, message: String },

    #[error("Source directory {} is not readable: {source}", dir.display())]
    SourceUnreadable {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output directory {} is not writable: {source}", dir.display())]
    OutputUnwritable {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NarrateError {
    /// Whether this error aborts the whole run rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NarrateError::SourceUnreadable { .. }
                | NarrateError::OutputUnwritable { .. }
                | NarrateError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NarrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_message() {
        let err = NarrateError::TransportFailure {
            status: Some(503),
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "TTS request failed (HTTP 503): Service Unavailable"
        );

        let err = NarrateError::TransportFailure {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "TTS request failed: connection refused");
    }

    #[test]
    fn test_fatal_classification() {
        let io = || std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(NarrateError::SourceUnreadable { dir: "/x".into(), source: io() }.is_fatal());
        assert!(NarrateError::OutputUnwritable { dir: "/x".into(), source: io() }.is_fatal());
        assert!(!NarrateError::EmptyContent { chapter: "1".into() }.is_fatal());
        assert!(
            !NarrateError::ChapterUnreadable { path: "/x/1.txt".into(), message: "denied".into() }
                .is_fatal()
        );
        assert!(
            !NarrateError::EmptyDirectory { dir: "/x".into(), extension: "txt".into() }.is_fatal()
        );
    }
}
