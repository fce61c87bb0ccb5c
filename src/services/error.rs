use crate::models::CleanupResult;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by the scan and cleanup services
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Path not found or not accessible: {0}")]
    PathNotFound(Utf8PathBuf),

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Admission gate closed")]
    GateClosed,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl EngineError {
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::OperationCancelled)
    }

    /// The underlying I/O failure was "no such file"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

/// A cleanup that stopped early.
///
/// Deletions are never rolled back, so everything finished before the stop is
/// handed back in `completed`, including the best-effort partial result of the
/// category that was interrupted.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct CleanupAborted {
    #[source]
    pub error: EngineError,
    pub completed: Vec<CleanupResult>,
}

impl CleanupAborted {
    pub fn cancelled(completed: Vec<CleanupResult>) -> Self {
        Self {
            error: EngineError::OperationCancelled,
            completed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }

    /// Put results that finished earlier in the run ahead of the ones carried here
    pub fn prepend(mut self, mut earlier: Vec<CleanupResult>) -> Self {
        earlier.append(&mut self.completed);
        self.completed = earlier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::PathNotFound(Utf8PathBuf::from("/missing"));
        assert_eq!(err.to_string(), "Path not found or not accessible: /missing");
        assert_eq!(EngineError::OperationCancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_aborted_keeps_order() {
        let aborted = CleanupAborted::cancelled(vec![CleanupResult::new("c", "C")])
            .prepend(vec![CleanupResult::new("a", "A"), CleanupResult::new("b", "B")]);

        assert!(aborted.is_cancelled());
        let ids: Vec<_> = aborted.completed.iter().map(|r| r.category_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(aborted.to_string(), "Operation cancelled");
    }
}
