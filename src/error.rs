use std::path::PathBuf;

use thiserror::Error;

/// Library-wide error type returned by the cache-record reader, the box
/// walker, the chunk grouper, and the assembler.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// EPERM (macOS TCC/Full Disk Access) vs EACCES (plain POSIX
    /// permissions) are distinguished per the error-handling design: only
    /// EPERM gets the "grant Full Disk Access" guidance.
    #[error("Permission denied reading {path}: {guidance}")]
    PermissionDenied { path: PathBuf, guidance: String },

    #[error("Malformed cache record in {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("Could not recognize the format of {0}")]
    UnrecognizedFormat(PathBuf),

    #[error("Not a readable cache directory: {0}")]
    InvalidDirectory(PathBuf),
}

/// Errors surfaced while invoking the external media tool (an FFmpeg-family
/// binary run as a child process for remux/re-encode).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to spawn external media tool at {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("External media tool exited with {status}: {stderr_tail}")]
    NonZeroExit { status: String, stderr_tail: String },

    #[error("External media tool invocation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Classify a raw OS error into the permission-denied guidance spec.md §7
/// requires: EPERM (1) is a macOS TCC/Full Disk Access failure, EACCES
/// (13) is a plain POSIX permission failure. Anything else is passed
/// through as a generic IO error by the caller instead.
pub fn classify_permission_error(path: &std::path::Path, err: &std::io::Error) -> Option<CacheError> {
    let raw = err.raw_os_error()?;
    let guidance = match raw {
        1 => "grant Full Disk Access to this application in System Settings \
              and try again (macOS blocks reads of other apps' data with TCC)"
            .to_string(),
        13 => "the current user does not have permission to read this path".to_string(),
        _ => return None,
    };
    Some(CacheError::PermissionDenied {
        path: path.to_path_buf(),
        guidance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn eperm_is_tcc_guidance() {
        let err = std::io::Error::from_raw_os_error(1);
        let classified = classify_permission_error(std::path::Path::new("/x"), &err).unwrap();
        match classified {
            CacheError::PermissionDenied { guidance, .. } => {
                assert!(guidance.contains("Full Disk Access"))
            }
            _ => panic!("expected PermissionDenied"),
        }
    }

    #[test]
    fn eacces_is_posix_guidance() {
        let err = std::io::Error::from_raw_os_error(13);
        let classified = classify_permission_error(std::path::Path::new("/x"), &err).unwrap();
        match classified {
            CacheError::PermissionDenied { guidance, .. } => {
                assert!(guidance.contains("permission"))
            }
            _ => panic!("expected PermissionDenied"),
        }
    }

    #[test]
    fn other_errors_not_classified() {
        let err = std::io::Error::new(ErrorKind::NotFound, "nope");
        assert!(classify_permission_error(std::path::Path::new("/x"), &err).is_none());
    }
}
