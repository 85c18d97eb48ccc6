// src/transfer/download.rs

//! Download of a single remote file into the local staging directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::errors::{ReconError, Result};
use crate::transfer::source::RemoteSource;

/// Attempts before a download with a mismatching checksum is given up.
pub const MAX_ATTEMPTS: u32 = 10;

const CHUNK_SIZE: usize = 64 * 1024;

/// Identity of one file download: `<taskId>_<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileTaskKey(String);

impl FileTaskKey {
    pub fn new(task_id: &str, file_path: &str) -> Self {
        Self(format!("{task_id}_{file_path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileTaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a running download should be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCommand {
    /// Stop and report the file as stopped.
    StopAndReport,
    /// Stop without reporting; the file will be dispatched again.
    StopQuietly,
}

/// Reports emitted by a download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started {
        key: FileTaskKey,
        download_path: PathBuf,
    },
    Progress {
        key: FileTaskKey,
        size: u64,
        downloaded: u64,
        progress: u8,
        speed_kb: u64,
    },
    Succeeded {
        key: FileTaskKey,
        download_path: PathBuf,
        size: u64,
        speed_kb: u64,
    },
    Failed {
        key: FileTaskKey,
        download_path: PathBuf,
        reason: String,
    },
    Stopped {
        key: FileTaskKey,
        download_path: PathBuf,
        size: u64,
        progress: u8,
    },
}

impl TransferEvent {
    pub fn key(&self) -> &FileTaskKey {
        match self {
            TransferEvent::Started { key, .. }
            | TransferEvent::Progress { key, .. }
            | TransferEvent::Succeeded { key, .. }
            | TransferEvent::Failed { key, .. }
            | TransferEvent::Stopped { key, .. } => key,
        }
    }

    /// Whether this is the last event of its download.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransferEvent::Succeeded { .. } | TransferEvent::Failed { .. } | TransferEvent::Stopped { .. }
        )
    }
}

/// One file to download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub task_id: String,
    pub file_path: String,
    pub download_dir: PathBuf,
    /// Prepended to the file name of the local copy.
    pub file_prefix: Option<String>,
}

impl DownloadRequest {
    pub fn key(&self) -> FileTaskKey {
        FileTaskKey::new(&self.task_id, &self.file_path)
    }

    /// `<download_dir>/<task_id>/<file_path>` with the prefix applied to the
    /// file name.
    pub fn download_path(&self) -> PathBuf {
        let relative = self.file_path.trim_start_matches('/');
        let (dir, name) = match relative.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, relative),
        };
        let mut path = self.download_dir.join(&self.task_id);
        if let Some(dir) = dir {
            path.push(dir);
        }
        path.push(format!("{}{name}", self.file_prefix.as_deref().unwrap_or("")));
        path
    }
}

/// Live counters of a running download.
#[derive(Debug, Default)]
pub struct TransferProgress {
    size: AtomicU64,
    downloaded: AtomicU64,
    speed_kb: AtomicU64,
    progress: AtomicU8,
}

impl TransferProgress {
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn speed_kb(&self) -> u64 {
        self.speed_kb.load(Ordering::Relaxed)
    }

    fn reset(&self, size: u64) {
        self.size.store(size, Ordering::Relaxed);
        self.downloaded.store(0, Ordering::Relaxed);
        self.progress.store(0, Ordering::Relaxed);
    }

    /// Record `downloaded` bytes. Returns the new percentage if it changed.
    fn advance(&self, downloaded: u64, started: Instant) -> Option<u8> {
        self.downloaded.store(downloaded, Ordering::Relaxed);
        let elapsed_ms = started.elapsed().as_millis().max(1) as u64;
        self.speed_kb
            .store(downloaded * 1000 / 1024 / elapsed_ms, Ordering::Relaxed);

        let size = self.size();
        let progress = if size == 0 {
            100
        } else {
            (downloaded.min(size) * 100 / size) as u8
        };
        let previous = self.progress.swap(progress, Ordering::Relaxed);
        (previous != progress).then_some(progress)
    }
}

/// Download one file, reporting over `events`, until it succeeds, fails, or
/// `cancel_rx` delivers a stop command.
///
/// A stopped download leaves no partial file behind. A dropped cancel sender
/// is treated as an unexpected interruption: the partial file is deleted and
/// nothing is reported.
pub async fn run_download(
    source: Arc<dyn RemoteSource>,
    request: DownloadRequest,
    events: mpsc::Sender<TransferEvent>,
    mut cancel_rx: oneshot::Receiver<StopCommand>,
) {
    let key = request.key();
    let download_path = request.download_path();
    let progress = Arc::new(TransferProgress::default());

    info!(key = %key, path = %download_path.display(), "starting file download");
    let _ = events
        .send(TransferEvent::Started {
            key: key.clone(),
            download_path: download_path.clone(),
        })
        .await;

    tokio::select! {
        result = download_with_retries(source.as_ref(), &request.file_path, &download_path, &progress, &events, &key) => {
            match result {
                Ok(size) => {
                    info!(key = %key, size, "file downloaded");
                    let _ = events
                        .send(TransferEvent::Succeeded {
                            key: key.clone(),
                            download_path: download_path.clone(),
                            size,
                            speed_kb: progress.speed_kb(),
                        })
                        .await;
                }
                Err(e) => {
                    error!(key = %key, path = %download_path.display(), error = %e, "fail to download file");
                    remove_partial(&download_path).await;
                    let _ = events
                        .send(TransferEvent::Failed {
                            key: key.clone(),
                            download_path: download_path.clone(),
                            reason: e.to_string(),
                        })
                        .await;
                }
            }
        }

        command = &mut cancel_rx => {
            remove_partial(&download_path).await;
            match command {
                Ok(StopCommand::StopAndReport) => {
                    info!(key = %key, "download stopped");
                    let _ = events
                        .send(TransferEvent::Stopped {
                            key: key.clone(),
                            download_path: download_path.clone(),
                            size: progress.size(),
                            progress: progress.progress(),
                        })
                        .await;
                }
                Ok(StopCommand::StopQuietly) => {
                    info!(key = %key, "download stopped quietly; waiting to be dispatched again");
                }
                Err(_) => {
                    error!(key = %key, "download interrupted unexpectedly");
                }
            }
        }
    }
}

async fn download_with_retries(
    source: &dyn RemoteSource,
    file_path: &str,
    download_path: &Path,
    progress: &TransferProgress,
    events: &mpsc::Sender<TransferEvent>,
    key: &FileTaskKey,
) -> Result<u64> {
    for attempt in 1..=MAX_ATTEMPTS {
        let metadata = source.metadata(file_path).await?;
        progress.reset(metadata.size);

        let actual = download_once(source, file_path, download_path, progress, events, key).await?;
        match metadata.md5.as_deref() {
            None => {
                warn!(key = %key, md5 = %actual, "no md5 in metadata; skipping checksum");
                return Ok(metadata.size);
            }
            Some(expected) if expected.eq_ignore_ascii_case(&actual) => {
                return Ok(metadata.size);
            }
            Some(expected) => {
                warn!(
                    key = %key,
                    expected,
                    actual = %actual,
                    attempt,
                    "md5 does not match; retrying"
                );
                remove_partial(download_path).await;
            }
        }
    }

    Err(ReconError::Transfer(format!(
        "fail to download {} because md5 did not match {MAX_ATTEMPTS} times, file path={file_path}",
        download_path.display()
    )))
}

/// Stream one copy to disk, returning its MD5.
async fn download_once(
    source: &dyn RemoteSource,
    file_path: &str,
    download_path: &Path,
    progress: &TransferProgress,
    events: &mpsc::Sender<TransferEvent>,
    key: &FileTaskKey,
) -> Result<String> {
    if let Some(parent) = download_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating download dir {}", parent.display()))?;
    }
    let mut reader = source.open(file_path).await?;
    let mut file = tokio::fs::File::create(download_path)
        .await
        .with_context(|| format!("creating {}", download_path.display()))?;

    let started = Instant::now();
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        context.consume(&buf[..n]);
        downloaded += n as u64;

        if let Some(percent) = progress.advance(downloaded, started) {
            let _ = events
                .send(TransferEvent::Progress {
                    key: key.clone(),
                    size: progress.size(),
                    downloaded,
                    progress: percent,
                    speed_kb: progress.speed_kb(),
                })
                .await;
        }
    }
    file.flush().await?;
    if downloaded == 0 {
        progress.advance(0, started);
    }

    let digest = format!("{:x}", context.compute());
    debug!(key = %key, downloaded, md5 = %digest, "download attempt complete");
    Ok(digest)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "fail to delete partial file"),
    }
}
