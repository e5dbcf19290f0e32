//! In-process stream copy backend.
//!
//! HTTP(S) sources are fetched with `reqwest`; `file://` URLs and plain paths
//! are copied from the local filesystem. Each copy runs on its own task and
//! writes to `<name>.part`, renamed into place once the source is drained.

use std::collections::HashMap;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use haul_config::NativeConfig;
use haul_core::{
    BackendAdapter, BackendKind, NativeRawStatus, NativeState, QueryOutcome, RawStatus,
    TransferError, TransferHandle, TransferRequest, TransferResult,
};
use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{io_failed, op_failed, status_error};

const LOCAL_CHUNK: usize = 64 * 1024;
const FALLBACK_NAME: &str = "download";

#[derive(Debug)]
enum Source {
    Http(Url),
    Local(PathBuf),
}

#[derive(Debug)]
struct Progress {
    name: String,
    state: NativeState,
    bytes_done: u64,
    bytes_total: Option<u64>,
    started: Instant,
    finished: Option<Instant>,
    error: Option<String>,
}

impl Progress {
    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> NativeRawStatus {
        let end = self.finished.unwrap_or_else(Instant::now);
        let elapsed = end.saturating_duration_since(self.started).as_secs_f64();
        let speed_bps = if elapsed > 0.0 {
            self.bytes_done as f64 / elapsed
        } else {
            0.0
        };
        NativeRawStatus {
            name: Some(self.name.clone()),
            state: self.state,
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            speed_bps,
            error: self.error.clone(),
        }
    }

    const fn is_settled(&self) -> bool {
        matches!(
            self.state,
            NativeState::Completed | NativeState::Failed | NativeState::Aborted
        )
    }

    fn settle(&mut self, state: NativeState, error: Option<String>) {
        if self.is_settled() {
            return;
        }
        self.state = state;
        self.error = error;
        self.finished = Some(Instant::now());
    }
}

struct NativeTask {
    progress: Arc<Mutex<Progress>>,
    worker: Option<JoinHandle<()>>,
    part_path: PathBuf,
    final_path: PathBuf,
}

/// Backend adapter that copies bytes itself instead of delegating to a daemon.
#[derive(Clone)]
pub struct NativeAdapter {
    client: Client,
    chunk_timeout: Duration,
    tasks: Arc<Mutex<HashMap<Uuid, NativeTask>>>,
}

impl NativeAdapter {
    /// Build an adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::BackendUnavailable`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: &NativeConfig) -> TransferResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| TransferError::unavailable(BackendKind::Native, "native.client", err))?;
        Ok(Self {
            client,
            chunk_timeout: config.chunk_timeout,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<Uuid, NativeTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open_http(&self, url: Url) -> TransferResult<(String, reqwest::Response)> {
        let subject = url.to_string();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| op_failed(BackendKind::Native, "native.open", &subject, err.into()))?;
        if !response.status().is_success() {
            let err = status_error(response).await;
            return Err(op_failed(BackendKind::Native, "native.open", &subject, err));
        }
        let name = response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
            .map_or_else(|| FALLBACK_NAME.to_string(), sanitize_name);
        Ok((name, response))
    }

    fn spawn_copy<S, B, E>(&self, chunks: S, file: File, task: &NativeTask) -> JoinHandle<()>
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send,
        E: Display + Send,
    {
        let progress = Arc::clone(&task.progress);
        let part_path = task.part_path.clone();
        let final_path = task.final_path.clone();
        let chunk_timeout = self.chunk_timeout;
        tokio::spawn(async move {
            let copied = copy_chunks(chunks, file, &progress, chunk_timeout).await;
            let outcome = match copied {
                Ok(()) => fs::rename(&part_path, &final_path)
                    .await
                    .map_err(|err| format!("failed to move payload into place: {err}")),
                Err(err) => Err(err),
            };
            let mut progress = lock_progress(&progress);
            match outcome {
                Ok(()) => {
                    debug!(
                        path = %final_path.display(),
                        bytes = progress.bytes_done,
                        "native copy completed"
                    );
                    progress.settle(NativeState::Completed, None);
                }
                Err(err) => {
                    warn!(path = %final_path.display(), error = %err, "native copy failed");
                    progress.settle(NativeState::Failed, Some(err));
                }
            }
        })
    }
}

#[async_trait]
impl BackendAdapter for NativeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn add(&self, request: &TransferRequest) -> TransferResult<TransferHandle> {
        let task_id = request.id().as_uuid();
        if self.lock_tasks().contains_key(&task_id) {
            return Ok(TransferHandle::Native { task_id });
        }

        let destination = request.destination();
        let source = parse_source(request.source())?;
        fs::create_dir_all(destination)
            .await
            .map_err(|err| io_failed("native.create_dir", destination, err))?;

        match source {
            Source::Http(url) => {
                let (name, response) = self.open_http(url).await?;
                let total = response.content_length();
                let (task, file) = prepare_task(destination, &name, total).await?;
                let worker = self.spawn_copy(response.bytes_stream(), file, &task);
                self.register(task_id, task, worker);
            }
            Source::Local(path) => {
                let input = File::open(&path)
                    .await
                    .map_err(|err| io_failed("native.open_source", &path, err))?;
                let total = input.metadata().await.ok().map(|meta| meta.len());
                let name = path.file_name().map_or_else(
                    || FALLBACK_NAME.to_string(),
                    |name| sanitize_name(&name.to_string_lossy()),
                );
                let (task, file) = prepare_task(destination, &name, total).await?;
                let worker = self.spawn_copy(local_chunks(input), file, &task);
                self.register(task_id, task, worker);
            }
        }
        Ok(TransferHandle::Native { task_id })
    }

    async fn query_status(&self, handle: &TransferHandle) -> TransferResult<QueryOutcome> {
        let task_id = native_task_id(handle)?;
        let tasks = self.lock_tasks();
        let task = tasks
            .get(&task_id)
            .ok_or_else(|| TransferError::not_found("native task", task_id.to_string()))?;
        let raw = lock_progress(&task.progress).snapshot();
        drop(tasks);
        Ok(QueryOutcome::Status(RawStatus::Native(raw)))
    }

    async fn cancel(&self, handle: &TransferHandle) -> TransferResult<()> {
        let task_id = native_task_id(handle)?;
        let worker = {
            let mut tasks = self.lock_tasks();
            let Some(task) = tasks.get_mut(&task_id) else {
                return Ok(());
            };
            if lock_progress(&task.progress).is_settled() {
                return Ok(());
            }
            let worker = task.worker.take();
            lock_progress(&task.progress).settle(NativeState::Aborted, None);
            worker
        };
        stop_worker(worker).await;
        Ok(())
    }

    async fn remove(&self, handle: &TransferHandle, delete_files: bool) -> TransferResult<()> {
        let task_id = native_task_id(handle)?;
        let Some(mut task) = self.lock_tasks().remove(&task_id) else {
            return Ok(());
        };
        stop_worker(task.worker.take()).await;
        remove_if_present(&task.part_path).await?;
        if delete_files {
            remove_if_present(&task.final_path).await?;
        }
        Ok(())
    }
}

impl NativeAdapter {
    fn register(&self, task_id: Uuid, mut task: NativeTask, worker: JoinHandle<()>) {
        task.worker = Some(worker);
        let _ = self.lock_tasks().insert(task_id, task);
    }
}

fn native_task_id(handle: &TransferHandle) -> TransferResult<Uuid> {
    match handle {
        TransferHandle::Native { task_id } => Ok(*task_id),
        _ => Err(TransferError::InvalidRequest {
            field: "handle",
            reason: "handle belongs to another backend",
        }),
    }
}

fn parse_source(raw: &str) -> TransferResult<Source> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Source::Http(url)),
        Ok(url) if url.scheme() == "file" => {
            url.to_file_path()
                .map(Source::Local)
                .map_err(|()| TransferError::InvalidRequest {
                    field: "source",
                    reason: "file URL does not name a local path",
                })
        }
        // Single-letter schemes are Windows drive prefixes.
        Ok(url) if url.scheme().len() > 1 => Err(TransferError::InvalidRequest {
            field: "source",
            reason: "unsupported source scheme",
        }),
        _ => Ok(Source::Local(PathBuf::from(raw))),
    }
}

fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\' | '\0') { '_' } else { ch })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

async fn prepare_task(
    destination: &Path,
    name: &str,
    total: Option<u64>,
) -> TransferResult<(NativeTask, File)> {
    let final_path = destination.join(name);
    let part_path = destination.join(format!("{name}.part"));
    let file = File::create(&part_path)
        .await
        .map_err(|err| io_failed("native.create_part", &part_path, err))?;
    let progress = Progress {
        name: name.to_string(),
        state: NativeState::Connecting,
        bytes_done: 0,
        bytes_total: total,
        started: Instant::now(),
        finished: None,
        error: None,
    };
    Ok((
        NativeTask {
            progress: Arc::new(Mutex::new(progress)),
            worker: None,
            part_path,
            final_path,
        },
        file,
    ))
}

fn local_chunks(input: File) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    stream::unfold(Some(input), |state| async move {
        let mut input = state?;
        let mut buf = vec![0_u8; LOCAL_CHUNK];
        match input.read(&mut buf).await {
            Ok(0) => None,
            Ok(read) => {
                buf.truncate(read);
                Some((Ok(buf), Some(input)))
            }
            // Yield the error once, then end the stream.
            Err(err) => Some((Err(err), None)),
        }
    })
}

async fn copy_chunks<S, B, E>(
    chunks: S,
    mut file: File,
    progress: &Mutex<Progress>,
    chunk_timeout: Duration,
) -> Result<(), String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut chunks = pin!(chunks);
    lock_progress(progress).state = NativeState::Streaming;
    loop {
        let next = tokio::time::timeout(chunk_timeout, chunks.next())
            .await
            .map_err(|_| format!("no data received for {}s", chunk_timeout.as_secs()))?;
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|err| format!("source read failed: {err}"))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .map_err(|err| format!("destination write failed: {err}"))?;
        let mut progress = lock_progress(progress);
        progress.bytes_done = progress.bytes_done.saturating_add(bytes.len() as u64);
    }
    file.flush()
        .await
        .map_err(|err| format!("destination flush failed: {err}"))?;
    Ok(())
}

async fn stop_worker(worker: Option<JoinHandle<()>>) {
    if let Some(worker) = worker {
        worker.abort();
        let _ = worker.await;
    }
}

async fn remove_if_present(path: &Path) -> TransferResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_failed("native.remove", path, err)),
    }
}

fn lock_progress(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}
