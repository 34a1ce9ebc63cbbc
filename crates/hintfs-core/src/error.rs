//! Error type for the hint cache and throttle.

use thiserror::Error;

/// Errors surfaced by hintfs operations.
///
/// The cache itself never fails: its worst case is "no hint". The only
/// errors a caller can see are a cancelled idle wait and I/O errors from the
/// raw probe.
#[derive(Debug, Error)]
pub enum HintError {
    /// An idle wait was aborted by the session's cancellation flag.
    ///
    /// Distinct from a normal "load dropped" return: the waiter must stop
    /// its scan rather than proceed.
    #[error("idle wait interrupted by cancellation")]
    WaitInterrupted,

    /// The raw stat capability failed.
    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_display_non_empty() {
        let err = HintError::WaitInterrupted;
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = HintError::from(io_err);
        assert!(matches!(err, HintError::Io(_)));
    }
}
