// src/transfer/mod.rs

//! File worker side of file distribution: pulling source files from remote
//! storage into a local staging directory before they are distributed.
//!
//! - [`source`]: the `RemoteSource` abstraction and a local-directory source.
//! - [`download`]: one download task per file (MD5 check with retries,
//!   progress events, stop handling).
//! - [`supervisor`]: one running task per file key, stop commands.

pub mod download;
pub mod source;
pub mod supervisor;

pub use download::{
    run_download, DownloadRequest, FileTaskKey, StopCommand, TransferEvent, TransferProgress,
    MAX_ATTEMPTS,
};
pub use source::{FileMetadata, LocalDirSource, RemoteReader, RemoteSource, SourceFuture};
pub use supervisor::{spawn_supervisor, DownloadSupervisor, SupervisorCommand};
