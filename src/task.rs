//! Download task model
//!
//! A [`Task`] is one source-to-destination transfer. The orchestrator turns
//! every task into exactly one [`TaskResult`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// One unit of work: fetch `source` into `destination`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub source: String,
    pub destination: PathBuf,
    /// Size the caller already knows the remote file to have. When absent
    /// the executor asks the server.
    pub expected_size: Option<u64>,
}

impl Task {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            expected_size: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Final path component of the destination, for log lines and prompts
    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.destination.display().to_string())
    }
}

/// What a successful executor call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Bytes were fetched and verified
    Fetched { bytes: u64 },
    /// Destination already held a file of the remote size
    AlreadyPresent { bytes: u64 },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("session rejected by {url} (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("size mismatch for {path}: server reported {expected} bytes, wrote {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors that stop the whole run whatever the failure policy says.
    /// A rejected session will reject every remaining task too.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Unauthorized { .. })
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, TaskError::SizeMismatch { .. })
    }
}

/// Terminal state of one task
#[derive(Debug)]
pub enum TaskOutcome {
    Completed { bytes: u64 },
    Skipped { bytes: u64 },
    Failed(TaskError),
}

impl TaskOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            TaskOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Result<Transfer, TaskError>> for TaskOutcome {
    fn from(result: Result<Transfer, TaskError>) -> Self {
        match result {
            Ok(Transfer::Fetched { bytes }) => TaskOutcome::Completed { bytes },
            Ok(Transfer::AlreadyPresent { bytes }) => TaskOutcome::Skipped { bytes },
            Err(err) => TaskOutcome::Failed(err),
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed { .. } => f.write_str("completed"),
            TaskOutcome::Skipped { .. } => f.write_str("skipped"),
            TaskOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Result reported back to the orchestrator for the task at `index`
#[derive(Debug)]
pub struct TaskResult {
    /// Position of the task in the submitted list
    pub index: usize,
    pub task: Task,
    pub outcome: TaskOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_uses_last_component() {
        let task = Task::new("https://example.com/a/b.tif", "/data/out/dir/b.tif");
        assert_eq!(task.file_name(), "b.tif");
    }

    #[test]
    fn test_outcome_from_transfer() {
        let completed: TaskOutcome = Ok(Transfer::Fetched { bytes: 10 }).into();
        assert!(matches!(completed, TaskOutcome::Completed { bytes: 10 }));

        let skipped: TaskOutcome = Ok(Transfer::AlreadyPresent { bytes: 4 }).into();
        assert!(matches!(skipped, TaskOutcome::Skipped { bytes: 4 }));

        let failed: TaskOutcome = Err(TaskError::Cancelled).into();
        assert!(failed.is_failed());
    }

    #[test]
    fn test_error_classification() {
        let unauthorized = TaskError::Unauthorized {
            url: "https://example.com".to_string(),
            status: 401,
        };
        assert!(unauthorized.is_fatal());
        assert!(!unauthorized.is_verification());

        let mismatch = TaskError::SizeMismatch {
            path: PathBuf::from("x.tif"),
            expected: 10,
            actual: 7,
        };
        assert!(mismatch.is_verification());
        assert!(!mismatch.is_fatal());
        assert_eq!(
            mismatch.to_string(),
            "size mismatch for x.tif: server reported 10 bytes, wrote 7"
        );
    }
}
