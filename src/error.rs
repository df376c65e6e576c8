// Error Module - Failure Taxonomy
// =======================================================
// Every fallible operation in the library returns `CipherError`. The display
// strings are what the batch report hands back to the user, so they stay short
// and never include a backtrace.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The error type for all container, engine and batch operations.
#[derive(Error, Debug)]
pub enum CipherError {
    /// The source file does not exist.
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The container framing is truncated or inconsistent.
    #[error("corrupt header: {0}")]
    CorruptHeader(&'static str),

    /// The embedded name (or the content padding) failed to decrypt.
    ///
    /// Padding and UTF-8 failures are folded into this single variant so the
    /// caller learns nothing beyond "this key is wrong".
    #[error("wrong password or corrupted file name")]
    WrongKey,

    /// Disk, permission or other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The operation observed the stop flag and cancelled itself.
    #[error("stopped by user")]
    UserStopped,

    /// The staging volume cannot hold the planned output.
    #[error("insufficient staging space: {needed} bytes needed, {available} available")]
    InsufficientStagingSpace { needed: u64, available: u64 },

    /// A staged entry could not be relocated to its real destination.
    #[error("write-back of {} failed: {reason}", .path.display())]
    CrossDeviceWriteBack { path: PathBuf, reason: String },

    /// The caller asked for something that cannot be done.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CipherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_key_message_is_generic() {
        let text = CipherError::WrongKey.to_string();
        assert!(!text.contains("padding"));
        assert!(!text.contains("UTF"));
    }

    #[test]
    fn io_errors_convert() {
        let err: CipherError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, CipherError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: denied");
    }
}
