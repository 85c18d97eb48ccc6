// src/transfer/supervisor.rs

//! Supervises per-file download tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::transfer::download::{
    run_download, DownloadRequest, FileTaskKey, StopCommand, TransferEvent,
};
use crate::transfer::source::RemoteSource;

/// Commands accepted by a spawned supervisor loop.
#[derive(Debug)]
pub enum SupervisorCommand {
    Dispatch(DownloadRequest),
    Stop { key: FileTaskKey, command: StopCommand },
    StopTask { task_id: String, command: StopCommand },
}

/// Handle for a currently running download.
struct ActiveDownload {
    task_id: String,
    cancel: Option<oneshot::Sender<StopCommand>>,
    handle: JoinHandle<()>,
}

/// Runs at most one download per file key. Finished downloads report over
/// the shared event channel.
pub struct DownloadSupervisor {
    source: Arc<dyn RemoteSource>,
    events: mpsc::Sender<TransferEvent>,
    active: HashMap<FileTaskKey, ActiveDownload>,
}

impl std::fmt::Debug for DownloadSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSupervisor")
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl DownloadSupervisor {
    pub fn new(source: Arc<dyn RemoteSource>, events: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            source,
            events,
            active: HashMap::new(),
        }
    }

    /// Start downloading a file. Ignored (returns `false`) while the same
    /// file of the same task is still downloading.
    pub fn dispatch(&mut self, request: DownloadRequest) -> bool {
        let key = request.key();
        if let Some(existing) = self.active.get(&key) {
            if !existing.handle.is_finished() {
                debug!(key = %key, "download already running; ignoring dispatch");
                return false;
            }
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task_id = request.task_id.clone();
        let handle = tokio::spawn(run_download(
            Arc::clone(&self.source),
            request,
            self.events.clone(),
            cancel_rx,
        ));
        self.active.insert(
            key,
            ActiveDownload {
                task_id,
                cancel: Some(cancel_tx),
                handle,
            },
        );
        true
    }

    /// Stop one download. Returns whether a running download was signalled.
    pub fn stop(&mut self, key: &FileTaskKey, command: StopCommand) -> bool {
        let Some(active) = self.active.get_mut(key) else {
            debug!(key = %key, "no download to stop");
            return false;
        };
        match active.cancel.take() {
            Some(cancel) if !active.handle.is_finished() => {
                info!(key = %key, ?command, "stopping download");
                cancel.send(command).is_ok()
            }
            _ => {
                debug!(key = %key, "download already finished or stopping");
                false
            }
        }
    }

    /// Stop every download belonging to a task. Returns how many were
    /// signalled.
    pub fn stop_task(&mut self, task_id: &str, command: StopCommand) -> usize {
        let keys: Vec<FileTaskKey> = self
            .active
            .iter()
            .filter(|(_, a)| a.task_id == task_id)
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter().filter(|key| self.stop(key, command)).count()
    }

    /// Forget downloads that have finished.
    pub fn reap(&mut self) {
        self.active.retain(|_, a| !a.handle.is_finished());
    }

    pub fn active_count(&self) -> usize {
        self.active
            .values()
            .filter(|a| !a.handle.is_finished())
            .count()
    }

    /// Wait for every download to finish.
    pub async fn join_all(&mut self) {
        for (key, active) in self.active.drain() {
            // Dropping the cancel sender would interrupt the download.
            let ActiveDownload { cancel, handle, .. } = active;
            if let Err(e) = handle.await {
                debug!(key = %key, error = %e, "download task ended abnormally");
            }
            drop(cancel);
        }
    }
}

/// Spawn a supervisor loop driven by [`SupervisorCommand`]s. The loop ends,
/// after waiting for running downloads, when every sender is dropped.
pub fn spawn_supervisor(
    source: Arc<dyn RemoteSource>,
    events: mpsc::Sender<TransferEvent>,
) -> (mpsc::Sender<SupervisorCommand>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SupervisorCommand>(32);

    let handle = tokio::spawn(async move {
        info!("download supervisor started");
        let mut supervisor = DownloadSupervisor::new(source, events);

        while let Some(command) = rx.recv().await {
            supervisor.reap();
            match command {
                SupervisorCommand::Dispatch(request) => {
                    supervisor.dispatch(request);
                }
                SupervisorCommand::Stop { key, command } => {
                    supervisor.stop(&key, command);
                }
                SupervisorCommand::StopTask { task_id, command } => {
                    let stopped = supervisor.stop_task(&task_id, command);
                    debug!(task_id = %task_id, stopped, "stopped task downloads");
                }
            }
        }

        supervisor.join_all().await;
        info!("download supervisor finished (channel closed)");
    });

    (tx, handle)
}
