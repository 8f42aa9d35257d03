//! The upload orchestrator.
//!
//! Drives a batch of byte sources through chunk, hash, dedup, and xorb
//! assembly, then finalizes with a shard upload. At most
//! `file_workers` files are chunked concurrently and at most
//! `upload_workers` network uploads are in flight; the two limits are
//! independent semaphores.
//!
//! A file whose source fails is dropped from the batch with a
//! [`UploadEvent::FileFailed`] event; sibling files continue. A failure
//! while uploading a sealed xorb or the final shard fails the whole batch.

use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use seine_cas::parse_shard;
use seine_cdc::{Chunk, Chunker};
use seine_types::{FileUploadResult, UploadConfig, UploadEvent};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::CasClient;
use crate::error::EngineError;
use crate::session::{FileSession, SessionState};

/// One file to upload: a path label, a byte stream, and its length.
pub struct UploadSource {
    pub path: String,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
}

impl UploadSource {
    /// Source backed by an in-memory buffer.
    pub fn from_bytes(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            path: path.into(),
            size: data.len() as u64,
            reader: Box::new(std::io::Cursor::new(data)),
        }
    }

    /// Source backed by a file on disk.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            size,
            reader: Box::new(file),
        })
    }
}

/// Shared handles cloned into every worker task.
struct Shared {
    client: Arc<dyn CasClient>,
    config: UploadConfig,
    state: Mutex<SessionState>,
    upload_permits: Arc<Semaphore>,
    upload_tasks: Mutex<Vec<JoinHandle<Result<(), EngineError>>>>,
    events: mpsc::UnboundedSender<UploadEvent>,
    cancel: CancellationToken,
}

impl Shared {
    fn emit(&self, event: UploadEvent) {
        // The receiver may have been dropped; progress is best-effort.
        let _ = self.events.send(event);
    }

    /// Queue a sealed xorb for upload on the bounded upload pool.
    fn spawn_xorb_upload(self: &Arc<Self>, sealed: seine_cas::SealedXorb) {
        let shared = self.clone();
        let handle = tokio::spawn(async move {
            let _permit = shared
                .upload_permits
                .acquire()
                .await
                .map_err(|_| EngineError::Worker("upload semaphore closed".into()))?;
            let size = sealed.data.len() as u64;
            shared.client.put_xorb(sealed.hash, sealed.data).await?;
            debug!(hash = %sealed.hash, size, "uploaded xorb");
            shared.emit(UploadEvent::XorbUploaded {
                hash: sealed.hash,
                size,
            });
            Ok(())
        });
        self.upload_tasks.lock().expect("lock poisoned").push(handle);
    }
}

/// Uploads batches of files through a [`CasClient`].
pub struct Uploader {
    client: Arc<dyn CasClient>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(client: Arc<dyn CasClient>, config: UploadConfig) -> Self {
        Self { client, config }
    }

    /// Upload a batch of sources.
    ///
    /// Returns per-file results in input order, omitting files whose
    /// sources failed. Progress is reported through `events`; cancelling
    /// `cancel` abandons the batch without corrupting sealed artifacts.
    pub async fn upload(
        &self,
        sources: Vec<UploadSource>,
        events: mpsc::UnboundedSender<UploadEvent>,
        cancel: CancellationToken,
    ) -> Result<Vec<FileUploadResult>, EngineError> {
        let num_files = sources.len();
        info!(files = num_files, "starting upload batch");

        let shared = Arc::new(Shared {
            client: self.client.clone(),
            config: self.config.clone(),
            state: Mutex::new(SessionState::new(&self.config)),
            upload_permits: Arc::new(Semaphore::new(self.config.upload_workers)),
            upload_tasks: Mutex::new(Vec::new()),
            events,
            cancel,
        });

        // File workers.
        let file_permits = Arc::new(Semaphore::new(self.config.file_workers));
        let mut workers: JoinSet<(usize, Result<FileUploadResult, EngineError>)> = JoinSet::new();
        for (index, source) in sources.into_iter().enumerate() {
            let shared = shared.clone();
            let permits = file_permits.clone();
            workers.spawn(async move {
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Err(EngineError::Worker("file semaphore closed".into())),
                        );
                    }
                };
                let path = source.path.clone();
                let result = process_file(&shared, source).await;
                if let Err(error) = &result {
                    warn!(path, %error, "file upload failed");
                    shared.emit(UploadEvent::FileFailed {
                        path,
                        error: error.to_string(),
                    });
                }
                (index, result)
            });
        }

        let mut results = Vec::new();
        let mut failed_files = 0usize;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, Ok(result))) => results.push((index, result)),
                Ok((_, Err(_))) => failed_files += 1,
                Err(join_error) => return Err(EngineError::Worker(join_error.to_string())),
            }
        }

        if shared.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if results.is_empty() && failed_files > 0 {
            return Err(EngineError::AllFilesFailed(failed_files));
        }

        // Finalization: the remaining open xorb, in-flight uploads, then
        // the shard. Failures from here on fail the batch.
        let final_xorb = shared.state.lock().expect("lock poisoned").seal_final();
        if let Some(sealed) = final_xorb {
            shared.spawn_xorb_upload(sealed);
        }

        let upload_tasks = std::mem::take(
            &mut *shared.upload_tasks.lock().expect("lock poisoned"),
        );
        for handle in upload_tasks {
            handle
                .await
                .map_err(|e| EngineError::Worker(e.to_string()))??;
        }

        let shard = shared
            .state
            .lock()
            .expect("lock poisoned")
            .build_shard(None)?;
        if let Some(bytes) = shard {
            let size = bytes.len();
            shared.client.put_shard(bytes).await?;
            debug!(size, "uploaded shard");
        }

        results.sort_by_key(|(index, _)| *index);
        let results: Vec<_> = results.into_iter().map(|(_, result)| result).collect();
        info!(
            files = results.len(),
            failed = failed_files,
            "upload batch finished"
        );
        Ok(results)
    }
}

/// Chunk, hash, and place one file.
async fn process_file(
    shared: &Arc<Shared>,
    mut source: UploadSource,
) -> Result<FileUploadResult, EngineError> {
    let mut file = FileSession::new(source.path);
    let mut chunker = Chunker::new(shared.config.chunker);
    let mut buf = vec![0u8; shared.config.read_block_size];
    let mut bytes_read = 0u64;

    loop {
        if shared.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let n = source.reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        bytes_read += n as u64;
        file.update_sha256(&buf[..n]);
        for chunk in chunker.feed(&buf[..n])? {
            place_chunk(shared, &mut file, chunk).await?;
        }
        if source.size > 0 {
            shared.emit(UploadEvent::FileProgress {
                path: file.path().to_string(),
                progress: (bytes_read as f64 / source.size as f64).min(1.0),
            });
        }
    }
    if let Some(chunk) = chunker.finish()? {
        place_chunk(shared, &mut file, chunk).await?;
    }

    debug!(
        path = file.path(),
        bytes = file.total_bytes(),
        "file chunking complete"
    );

    let (info, result) = file.finish();
    shared
        .state
        .lock()
        .expect("lock poisoned")
        .add_file(info);
    shared.emit(UploadEvent::FileDone {
        path: result.path.clone(),
        sha256: result.sha256,
        dedup_ratio: result.dedup_ratio,
    });
    Ok(result)
}

/// Resolve one chunk against the dedup cache and the remote CAS, placing
/// it into the open xorb only if it is new everywhere.
async fn place_chunk(
    shared: &Arc<Shared>,
    file: &mut FileSession,
    chunk: Chunk,
) -> Result<(), EngineError> {
    // Fast path: already known to this session.
    let cached = shared
        .state
        .lock()
        .expect("lock poisoned")
        .cache
        .get(&chunk.hash);
    if let Some(location) = cached {
        file.record_chunk(chunk.hash, location, true);
        return Ok(());
    }

    // Remote lookup, outside the session lock. Any failure downgrades to
    // a miss; the chunk is then uploaded redundantly, which is safe.
    match shared.client.query_dedup(chunk.hash).await {
        Ok(Some(shard_bytes)) => match parse_shard(&shard_bytes) {
            Ok(shard) => {
                let learned = shared
                    .state
                    .lock()
                    .expect("lock poisoned")
                    .register_dedup_shard(&shard);
                debug!(hash = %chunk.hash, learned, "dedup query hit");
            }
            Err(error) => {
                warn!(hash = %chunk.hash, %error, "discarding unparseable dedup shard");
            }
        },
        Ok(None) => {}
        Err(error) => {
            warn!(hash = %chunk.hash, %error, "dedup query failed, treating as miss");
        }
    }

    // Re-check under the lock: the query (or a sibling worker) may have
    // registered this chunk while we were off the lock.
    let mut state = shared.state.lock().expect("lock poisoned");
    if let Some(location) = state.cache.get(&chunk.hash) {
        drop(state);
        file.record_chunk(chunk.hash, location, true);
        return Ok(());
    }
    let (location, sealed) = state.place_new(chunk.hash, &chunk.data)?;
    drop(state);

    if let Some(sealed) = sealed {
        shared.spawn_xorb_upload(sealed);
    }
    file.record_chunk(chunk.hash, location, false);
    Ok(())
}
