#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWriteExt, DuplexStream};

use jobrecon::backend::{BackendFuture, FleetBackend, PollRequest, ResultBatch};
use jobrecon::errors::{ReconError, Result};
use jobrecon::model::{FileResultFragment, ScriptResultFragment};
use jobrecon::transfer::{FileMetadata, RemoteReader, RemoteSource, SourceFuture};
use jobrecon::types::{AgentId, TaskKind};

/// What a [`ScriptedBackend`] was asked to do.
#[derive(Debug, Default)]
pub struct BackendCalls {
    pub polls: Vec<PollRequest>,
    pub stops: Vec<(String, Vec<AgentId>)>,
}

/// Backend that answers polls from a fixed queue of responses.
///
/// Once the queue is empty every poll returns an empty batch. Clones of
/// [`ScriptedBackend::calls`] can be inspected after the backend has been
/// moved into a loop or a pool job.
pub struct ScriptedBackend {
    kind: TaskKind,
    responses: VecDeque<Result<ResultBatch>>,
    calls: Arc<Mutex<BackendCalls>>,
    fail_stop: bool,
}

impl ScriptedBackend {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            responses: VecDeque::new(),
            calls: Arc::new(Mutex::new(BackendCalls::default())),
            fail_stop: false,
        }
    }

    pub fn file_batch(mut self, fragments: Vec<FileResultFragment>) -> Self {
        self.responses.push_back(Ok(ResultBatch::File(fragments)));
        self
    }

    pub fn script_batch(mut self, fragments: Vec<ScriptResultFragment>) -> Self {
        self.responses.push_back(Ok(ResultBatch::Script(fragments)));
        self
    }

    pub fn empty_batches(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.responses.push_back(Ok(ResultBatch::empty(self.kind)));
        }
        self
    }

    pub fn poll_error(mut self, message: &str) -> Self {
        self.responses
            .push_back(Err(ReconError::Backend(message.to_string())));
        self
    }

    /// Make `stop_task` fail.
    pub fn refusing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn calls(&self) -> Arc<Mutex<BackendCalls>> {
        Arc::clone(&self.calls)
    }
}

impl FleetBackend for ScriptedBackend {
    fn poll(&mut self, request: PollRequest) -> BackendFuture<'_, ResultBatch> {
        Box::pin(async move {
            self.calls.lock().unwrap().polls.push(request);
            self.responses
                .pop_front()
                .unwrap_or_else(|| Ok(ResultBatch::empty(self.kind)))
        })
    }

    fn stop_task(&mut self, task_id: String, agent_ids: Vec<AgentId>) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().stops.push((task_id, agent_ids));
            if self.fail_stop {
                Err(ReconError::Backend("stop refused".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Remote source backed by in-memory files with an advertised MD5 that can
/// be made to disagree with the content.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, (Vec<u8>, Option<String>)>,
    /// Advertised size and the bytes served before the stream stalls.
    stalled: HashMap<String, (u64, Vec<u8>)>,
    /// Writer halves of stalled streams, kept open so reads pend.
    held: Mutex<Vec<DuplexStream>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// File whose advertised MD5 matches its content.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        let md5 = format!("{:x}", md5::compute(content));
        self.files
            .insert(path.to_string(), (content.to_vec(), Some(md5)));
        self
    }

    /// File advertising `md5` regardless of its content.
    pub fn file_with_md5(mut self, path: &str, content: &[u8], md5: Option<&str>) -> Self {
        self.files.insert(
            path.to_string(),
            (content.to_vec(), md5.map(str::to_string)),
        );
        self
    }

    /// File that serves `head` and then never delivers the rest of `size`.
    pub fn stalled(mut self, path: &str, size: u64, head: &[u8]) -> Self {
        self.stalled
            .insert(path.to_string(), (size, head.to_vec()));
        self
    }

    /// How many times a file was opened.
    pub fn open_count(&self, path: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl RemoteSource for MemorySource {
    fn metadata(&self, path: &str) -> SourceFuture<'_, FileMetadata> {
        let path = path.to_string();
        Box::pin(async move {
            if let Some((size, _)) = self.stalled.get(&path) {
                return Ok(FileMetadata {
                    size: *size,
                    md5: None,
                });
            }
            let (content, md5) = self
                .files
                .get(&path)
                .ok_or_else(|| ReconError::Transfer(format!("no such file: {path}")))?;
            Ok(FileMetadata {
                size: content.len() as u64,
                md5: md5.clone(),
            })
        })
    }

    fn open(&self, path: &str) -> SourceFuture<'_, RemoteReader> {
        let path = path.to_string();
        Box::pin(async move {
            *self.opens.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
            if let Some((_, head)) = self.stalled.get(&path) {
                let (reader, mut writer) = tokio::io::duplex(head.len().max(1));
                writer.write_all(head).await?;
                self.held.lock().unwrap().push(writer);
                let reader: RemoteReader = Box::new(reader);
                return Ok(reader);
            }
            let (content, _) = self
                .files
                .get(&path)
                .ok_or_else(|| ReconError::Transfer(format!("no such file: {path}")))?;
            let reader: RemoteReader = Box::new(std::io::Cursor::new(content.clone()));
            Ok(reader)
        })
    }
}
