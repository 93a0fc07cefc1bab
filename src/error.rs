//! Error taxonomy for host telemetry queries

use std::io;
use std::path::Path;
use thiserror::Error;

/// Failure of a single OS query. None of these ever reach the user; callers
/// degrade to a fallback source, skip the item, or disable the resource.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("{0} is not available on this host")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} was disabled after repeated failures")]
    Disabled(String),

    #[error("process {0} exited while being sampled")]
    Exited(u32),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

impl TelemetryError {
    /// Classify an I/O failure on `path`.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::Unavailable(path.display().to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.display().to_string()),
            _ => Self::Io {
                path: path.display().to_string(),
                source: err,
            },
        }
    }

    pub fn parse(what: impl Into<String>, detail: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    /// Sources that will never succeed on this host: retrying them is pointless.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::PermissionDenied(_) | Self::Disabled(_)
        )
    }
}

/// Read a file to a string, mapping the error into the taxonomy.
pub fn read_to_string(path: &Path) -> TelemetryResult<String> {
    std::fs::read_to_string(path).map_err(|e| TelemetryError::from_io(path, e))
}

/// Read a file holding a single unsigned integer (sysfs style).
pub fn read_u64(path: &Path) -> TelemetryResult<u64> {
    let content = read_to_string(path)?;
    content
        .trim()
        .parse::<u64>()
        .map_err(|e| TelemetryError::parse(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_u64(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, TelemetryError::Unavailable(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_read_u64_trims_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy_uj");
        std::fs::write(&path, "123456\n").unwrap();
        assert_eq!(read_u64(&path).unwrap(), 123456);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp1_input");
        std::fs::write(&path, "n/a").unwrap();
        let err = read_u64(&path).unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
        assert!(!err.is_permanent());
    }
}
