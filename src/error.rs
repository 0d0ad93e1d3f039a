//! Error types for updelta

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for updelta operations
#[derive(Error, Debug)]
pub enum UpdeltaError {
    #[error("Malformed version string: {0:?}")]
    MalformedVersion(String),

    #[error("Malformed release entry: {0:?}")]
    MalformedEntry(String),

    #[error("Base version {base} is newer than target version {new}")]
    NonMonotonicVersion { base: String, new: String },

    #[error("Input archive not found: {0}")]
    MissingInput(PathBuf),

    #[error("Output path already exists: {0}")]
    OutputExists(PathBuf),

    #[error("Patch operation failed for {path}: {reason}")]
    PatchFailed { path: String, reason: String },

    #[error("Checksum verification failed for {path}")]
    ChecksumFailed { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for updelta operations
pub type Result<T> = std::result::Result<T, UpdeltaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpdeltaError::MalformedVersion("v1".to_string());
        assert!(err.to_string().contains("Malformed version"));
        assert!(err.to_string().contains("v1"));

        let err = UpdeltaError::MalformedEntry("too short".to_string());
        assert!(err.to_string().contains("Malformed release entry"));

        let err = UpdeltaError::NonMonotonicVersion {
            base: "2.0".to_string(),
            new: "1.0".to_string(),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));

        let err = UpdeltaError::MissingInput(PathBuf::from("/tmp/base.tar.zst"));
        assert!(err.to_string().contains("/tmp/base.tar.zst"));

        let err = UpdeltaError::OutputExists(PathBuf::from("/tmp/out.tar.zst"));
        assert!(err.to_string().contains("already exists"));

        let err = UpdeltaError::PatchFailed {
            path: "lib/app.dll".to_string(),
            reason: "truncated".to_string(),
        };
        assert!(err.to_string().contains("lib/app.dll"));
        assert!(err.to_string().contains("truncated"));

        let err = UpdeltaError::ChecksumFailed {
            path: "lib/app.dll".to_string(),
        };
        assert!(err.to_string().contains("lib/app.dll"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: UpdeltaError = io_err.into();
        assert!(matches!(err, UpdeltaError::Io(_)));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = UpdeltaError::ChecksumFailed {
            path: "lib/x.dll".to_string(),
        }
        .into();

        match err.downcast_ref::<UpdeltaError>() {
            Some(UpdeltaError::ChecksumFailed { path }) => assert_eq!(path, "lib/x.dll"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
