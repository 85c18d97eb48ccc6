// src/transfer/source.rs

//! Where downloaded files come from.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{ReconError, Result};

/// Future returned by source calls.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Byte stream of one remote file.
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Size and checksum reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Lowercase hex MD5, if the remote side knows it.
    pub md5: Option<String>,
}

/// Remote file storage a worker downloads from.
pub trait RemoteSource: Send + Sync {
    fn metadata(&self, path: &str) -> SourceFuture<'_, FileMetadata>;

    fn open(&self, path: &str) -> SourceFuture<'_, RemoteReader>;
}

/// Serves files below a local directory; stands in for object storage.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ReconError::Transfer(format!(
                "refusing path outside source root: {path}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl RemoteSource for LocalDirSource {
    fn metadata(&self, path: &str) -> SourceFuture<'_, FileMetadata> {
        let resolved = self.resolve(path);
        Box::pin(async move {
            let resolved = resolved?;
            let size = tokio::fs::metadata(&resolved).await?.len();

            let mut file = tokio::fs::File::open(&resolved).await?;
            let mut context = md5::Context::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                context.consume(&buf[..n]);
            }

            Ok(FileMetadata {
                size,
                md5: Some(format!("{:x}", context.compute())),
            })
        })
    }

    fn open(&self, path: &str) -> SourceFuture<'_, RemoteReader> {
        let resolved = self.resolve(path);
        Box::pin(async move {
            let file = tokio::fs::File::open(resolved?).await?;
            Ok(Box::new(file) as RemoteReader)
        })
    }
}
