//! Task executors
//!
//! The orchestrator only knows the [`TaskExecutor`] trait. [`HttpExecutor`]
//! is the implementation used by the CLI: it fetches over the authenticated
//! session, skips files already present at the remote size, and verifies the
//! written size before moving the file into place.

mod download;
pub mod http;

pub use download::{DownloadOptions, HttpExecutor};
pub use http::{HttpClient, HttpConfig};

use crate::task::{Task, TaskError, Transfer};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Performs one task
///
/// Called concurrently from several workers with different tasks. An
/// implementation performs its own skip check and post-write verification,
/// and should stop early once `cancel` fires.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> Result<Transfer, TaskError>;
}
