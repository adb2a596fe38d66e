use super::TaskExecutor;
use super::http::{HttpClient, HttpError};
use crate::humanize::ByteSize;
use crate::session::Session;
use crate::task::{Task, TaskError, Transfer};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executor behaviour switches
#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    /// Re-fetch even when the destination already has the remote size
    pub overwrite: bool,
    pub write_buffer: ByteSize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            write_buffer: ByteSize::kib(256),
        }
    }
}

/// Fetches tasks over an authenticated session into the local tree
///
/// Bytes land in a hidden sibling of the destination and are renamed into
/// place only once the written size matches the server-reported size, so a
/// file at the destination path is always complete.
pub struct HttpExecutor {
    http: HttpClient,
    options: DownloadOptions,
}

impl HttpExecutor {
    pub fn new(session: &Session, options: DownloadOptions) -> Self {
        Self {
            http: session.http(),
            options,
        }
    }

    async fn remote_size(&self, task: &Task, cancel: &CancellationToken) -> Result<Option<u64>, TaskError> {
        match task.expected_size {
            Some(size) => Ok(Some(size)),
            None => Ok(self.http.content_length(&task.source, cancel).await?),
        }
    }

    async fn fetch(
        &self,
        task: &Task,
        remote_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<u64, TaskError> {
        let destination = &task.destination;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TaskError::io(parent, e))?;
        }

        let mut response = self.http.get(&task.source, cancel).await?;
        let declared = response.content_length();
        let (partial, file) = PartialFile::create(destination).await?;
        let capacity = usize::try_from(self.options.write_buffer.as_u64()).unwrap_or(usize::MAX);
        let mut writer = BufWriter::with_capacity(capacity.max(8 * 1024), file);
        let mut written: u64 = 0;

        loop {
            let chunk: Option<Bytes> = tokio::select! {
                _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|e| HttpError::RequestFailed {
                    url: task.source.clone(),
                    message: format!("body read failed after {written} bytes: {e}"),
                })?,
            };
            let Some(chunk) = chunk else { break };

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TaskError::io(partial.path(), e))?;
            written += chunk.len() as u64;
        }

        writer.flush().await.map_err(|e| TaskError::io(partial.path(), e))?;
        let file = writer.into_inner();
        file.sync_all().await.map_err(|e| TaskError::io(partial.path(), e))?;
        drop(file);

        let on_disk = fs::metadata(partial.path())
            .await
            .map_err(|e| TaskError::io(partial.path(), e))?
            .len();
        let expected = expected_size(remote_size, declared, written);
        if on_disk != expected || written != expected {
            return Err(TaskError::SizeMismatch {
                path: destination.clone(),
                expected,
                actual: on_disk,
            });
        }

        partial.persist(destination).await?;
        Ok(written)
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn execute(&self, task: &Task, cancel: &CancellationToken) -> Result<Transfer, TaskError> {
        let remote_size = self.remote_size(task, cancel).await?;

        if !self.options.overwrite {
            if let (Some(remote), Some(local)) = (remote_size, local_size(&task.destination).await) {
                if remote == local {
                    debug!(path = %task.destination.display(), bytes = local, "Already present, skipping");
                    return Ok(Transfer::AlreadyPresent { bytes: local });
                }
                debug!(path = %task.destination.display(), remote, local, "Local size differs, fetching");
            }
        }

        let bytes = self.fetch(task, remote_size, cancel).await?;
        info!(url = %task.source, path = %task.destination.display(), size = %ByteSize(bytes), "Downloaded");
        Ok(Transfer::Fetched { bytes })
    }
}

/// Size a download must have: the listed or HEAD size, then the GET
/// `Content-Length`, and only with neither the byte count received
fn expected_size(remote: Option<u64>, declared: Option<u64>, written: u64) -> u64 {
    remote.or(declared).unwrap_or(written)
}

async fn local_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Temporary sibling of a destination, removed on drop unless persisted
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    async fn create(destination: &Path) -> Result<(Self, File), TaskError> {
        let name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = destination.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4().simple()));
        let file = File::create(&path)
            .await
            .map_err(|e| TaskError::io(&path, e))?;
        let partial = Self {
            path,
            persisted: false,
        };
        Ok((partial, file))
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(mut self, destination: &Path) -> Result<(), TaskError> {
        fs::rename(&self.path, destination)
            .await
            .map_err(|e| TaskError::io(destination, e))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove partial file");
            }
        }
    }
}
