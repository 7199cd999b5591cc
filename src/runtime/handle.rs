use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{
        Mutex, broadcast,
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    core::{Document, DocumentError, DocumentSnapshot, Reconciliation},
    delta::Delta,
    math::Transform,
    persist::{PersistError, RecordSink},
    record::{DeltasRecord, StoredRecord},
    state::MoiState,
    types::{DocHash, Guid, ObjId, RecordSeq},
};

use super::events::DocumentEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("document runtime has shut down")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Make every committed record durable before accepting the next batch.
    pub flush_on_commit: bool,
    pub batch_max_records: usize,
    pub batch_max_latency_ms: u64,
    pub persist_queue_bound: usize,
    /// Write a snapshot after this many records; 0 disables automatic snapshots.
    pub snapshot_every_records: usize,
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_commit: true,
            batch_max_records: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_records: 2000,
            compact_after_snapshot: false,
        }
    }
}

pub struct DocumentHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<DocumentEvent>,
}

impl Clone for DocumentHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

enum Command {
    Apply {
        deltas: Vec<Delta>,
        resp: Reply<Option<DeltasRecord>>,
    },
    SubmitRemote {
        record: DeltasRecord,
        resp: Reply<Reconciliation>,
    },
    Undo {
        resp: Reply<()>,
    },
    Redo {
        resp: Reply<()>,
    },
    PropagateDirty {
        resp: Reply<Option<DeltasRecord>>,
    },
    CreateSymbol {
        group_id: ObjId,
        resp: Reply<Guid>,
    },
    PlaceSymbolInstance {
        guid: Guid,
        parent_group: ObjId,
        placement: Transform,
        resp: Reply<ObjId>,
    },
    GetObject {
        id: ObjId,
        resp: oneshot::Sender<Option<MoiState>>,
    },
    LatestHash {
        resp: oneshot::Sender<DocHash>,
    },
    Snapshot {
        resp: oneshot::Sender<DocumentSnapshot>,
    },
    Flush {
        resp: Reply<RecordSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

enum PersistMsg {
    Record(StoredRecord),
    Flush {
        resp: oneshot::Sender<Result<RecordSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: Box<DocumentSnapshot>,
        last_seq: RecordSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Moves `document` onto its own task and returns a handle to it.
pub fn spawn_document(
    document: Document,
    sink: Option<Box<dyn RecordSink>>,
    config: RuntimeConfig,
) -> DocumentHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<DocumentEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<RecordSeq, String>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut writer = Writer {
            document,
            events_tx: events_tx_loop.clone(),
            persist_tx: persist_tx_opt,
            config,
            records_since_snapshot: 0,
        };

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if writer.handle_command(cmd).await {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(seq)) => {
                                let _ = events_tx_loop.send(DocumentEvent::DurableUpTo { seq });
                            }
                            Some(Err(err)) => warn!(%err, "journal append failed"),
                            None => {}
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if writer.handle_command(cmd).await {
                    break;
                }
            }
        }
        debug!("document runtime stopped");
    });

    DocumentHandle { cmd_tx, events_tx }
}

impl DocumentHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn apply(&self, deltas: Vec<Delta>) -> Result<Option<DeltasRecord>, RuntimeError> {
        self.request(|resp| Command::Apply { deltas, resp }).await?
    }

    /// Reconciles a record authored elsewhere and applies it unless it is rejected.
    pub async fn submit_remote(&self, record: DeltasRecord) -> Result<Reconciliation, RuntimeError> {
        self.request(|resp| Command::SubmitRemote { record, resp }).await?
    }

    pub async fn undo(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Undo { resp }).await?
    }

    pub async fn redo(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Redo { resp }).await?
    }

    pub async fn propagate_dirty(&self) -> Result<Option<DeltasRecord>, RuntimeError> {
        self.request(|resp| Command::PropagateDirty { resp }).await?
    }

    pub async fn create_symbol(&self, group_id: ObjId) -> Result<Guid, RuntimeError> {
        self.request(|resp| Command::CreateSymbol { group_id, resp }).await?
    }

    pub async fn place_symbol_instance(
        &self,
        guid: Guid,
        parent_group: ObjId,
        placement: Transform,
    ) -> Result<ObjId, RuntimeError> {
        self.request(|resp| Command::PlaceSymbolInstance {
            guid,
            parent_group,
            placement,
            resp,
        })
        .await?
    }

    pub async fn get(&self, id: ObjId) -> Result<Option<MoiState>, RuntimeError> {
        self.request(|resp| Command::GetObject { id, resp }).await
    }

    pub async fn latest_hash(&self) -> Result<DocHash, RuntimeError> {
        self.request(|resp| Command::LatestHash { resp }).await
    }

    pub async fn snapshot(&self) -> Result<DocumentSnapshot, RuntimeError> {
        self.request(|resp| Command::Snapshot { resp }).await
    }

    pub async fn flush(&self) -> Result<RecordSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

/// State owned by the command loop.
struct Writer {
    document: Document,
    events_tx: broadcast::Sender<DocumentEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: RuntimeConfig,
    records_since_snapshot: usize,
}

impl Writer {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Apply { deltas, resp } => {
                let res = self.document.apply_deltas(deltas).map_err(RuntimeError::from);
                let res = self
                    .after_write(res, |record| {
                        record.as_ref().map(|r| DocumentEvent::Committed {
                            total_hash: r.total_hash,
                            origin: r.origin_user_id.clone(),
                        })
                    })
                    .await;
                let _ = resp.send(res);
            }
            Command::SubmitRemote { record, resp } => {
                let res = self.submit_remote(record);
                let res = self.after_write(res, |_| None).await;
                let _ = resp.send(res);
            }
            Command::Undo { resp } => {
                let res = self.document.undo().map(|_| ()).map_err(RuntimeError::from);
                let res = self.after_write(res, |_| Some(DocumentEvent::UndoApplied)).await;
                let _ = resp.send(res);
            }
            Command::Redo { resp } => {
                let res = self.document.redo().map(|_| ()).map_err(RuntimeError::from);
                let res = self.after_write(res, |_| Some(DocumentEvent::RedoApplied)).await;
                let _ = resp.send(res);
            }
            Command::PropagateDirty { resp } => {
                let res = self.document.propagate_dirty_symbols().map_err(RuntimeError::from);
                let res = self
                    .after_write(res, |record| {
                        record.as_ref().map(|r| DocumentEvent::Committed {
                            total_hash: r.total_hash,
                            origin: r.origin_user_id.clone(),
                        })
                    })
                    .await;
                let _ = resp.send(res);
            }
            Command::CreateSymbol { group_id, resp } => {
                let res = self.document.create_symbol(group_id).map_err(RuntimeError::from);
                let res = self.after_write(res, |_| None).await;
                let _ = resp.send(res);
            }
            Command::PlaceSymbolInstance {
                guid,
                parent_group,
                placement,
                resp,
            } => {
                let res = self
                    .document
                    .place_symbol_instance(guid, parent_group, &placement)
                    .map_err(RuntimeError::from);
                let res = self.after_write(res, |_| None).await;
                let _ = resp.send(res);
            }
            Command::GetObject { id, resp } => {
                let _ = resp.send(self.document.object(id).cloned());
            }
            Command::LatestHash { resp } => {
                let _ = resp.send(self.document.latest_verified_doc_hash());
            }
            Command::Snapshot { resp } => {
                let _ = resp.send(self.document.export_snapshot());
            }
            Command::Flush { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (flush_tx, flush_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        flush_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                } else {
                    Ok(self.document.latest_record_seq())
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                    }
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
                return true;
            }
        }

        if self.config.snapshot_every_records > 0
            && self.records_since_snapshot >= self.config.snapshot_every_records
        {
            if let Err(err) = self.checkpoint().await {
                warn!(%err, "automatic snapshot failed");
            }
        }
        false
    }

    fn submit_remote(&mut self, record: DeltasRecord) -> Result<Reconciliation, RuntimeError> {
        let reconciliation = self.document.reconcile_remote_record(&record);
        match &reconciliation {
            Reconciliation::Accepted(record) | Reconciliation::Rebased(record) => {
                let rebased = matches!(reconciliation, Reconciliation::Rebased(_));
                let applied = self.document.apply_remote_record(record.clone())?;
                let _ = self.events_tx.send(DocumentEvent::RemoteApplied {
                    total_hash: applied.total_hash,
                    rebased,
                });
            }
            Reconciliation::Rejected(reason) => {
                let _ = self
                    .events_tx
                    .send(DocumentEvent::RemoteRejected { reason: *reason });
            }
        }
        Ok(reconciliation)
    }

    /// Ships the records produced by a write to persistence and announces the write.
    ///
    /// A committed write never fails here. A full queue blocks the writer until the
    /// worker catches up; records a closed queue refuses go back to the document.
    async fn after_write<T>(
        &mut self,
        res: Result<T, RuntimeError>,
        event: impl FnOnce(&T) -> Option<DocumentEvent>,
    ) -> Result<T, RuntimeError> {
        let pending = self.document.drain_pending_records();
        let value = res?;
        if !pending.is_empty() {
            self.records_since_snapshot += pending.len();
            if let Some(tx) = &self.persist_tx {
                let mut pending = pending.into_iter();
                while let Some(stored) = pending.next() {
                    if let Err(refused) = enqueue_persist(tx, stored).await {
                        warn!(seq = refused.seq, "persist queue closed; keeping records pending");
                        let mut undelivered = vec![refused];
                        undelivered.extend(pending);
                        self.records_since_snapshot -= undelivered.len();
                        self.document.requeue_pending_records(undelivered);
                        break;
                    }
                }
            } else {
                let _ = self.events_tx.send(DocumentEvent::DurableUpTo {
                    seq: self.document.latest_record_seq(),
                });
            }
        }
        if let Some(event) = event(&value) {
            let _ = self.events_tx.send(event);
        }
        Ok(value)
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };
        let snapshot = Box::new(self.document.export_snapshot());
        let last_seq = self.document.latest_record_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;
        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        self.records_since_snapshot = 0;
        Ok(())
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn RecordSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<RecordSeq, String>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredRecord>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: RecordSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Record(stored) => {
                            buf.push(stored);
                            if buf.len() >= config.batch_max_records || config.flush_on_commit {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    let sink_ref = Arc::clone(&sink);
                                    tokio::task::spawn_blocking(move || {
                                        let mut sink = sink_ref.blocking_lock();
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            sink.compact_through(last_seq)?;
                                        }
                                        Result::<(), PersistError>::Ok(())
                                    })
                                    .await
                                    .map_err(PersistError::from)
                                    .and_then(|inner| inner)
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn RecordSink>>>,
    buf: &mut Vec<StoredRecord>,
    last_durable: &mut RecordSeq,
    durable_tx: &mpsc::UnboundedSender<Result<RecordSeq, String>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await??;
        }
        return Ok(());
    }

    let records = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<RecordSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_records(&records)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(err.to_string()));
            Err(err)
        }
    }
}

/// Queues one record, waiting for room when the queue is full.
///
/// Hands the record back when the persistence worker has stopped.
async fn enqueue_persist(
    tx: &mpsc::Sender<PersistMsg>,
    stored: StoredRecord,
) -> Result<(), StoredRecord> {
    let refused = match tx.try_send(PersistMsg::Record(stored)) {
        Ok(()) => return Ok(()),
        Err(TrySendError::Full(msg)) => {
            debug!("persist queue full; waiting for the worker");
            match tx.send(msg).await {
                Ok(()) => return Ok(()),
                Err(err) => err.0,
            }
        }
        Err(TrySendError::Closed(msg)) => msg,
    };
    match refused {
        PersistMsg::Record(stored) => Err(stored),
        _ => Ok(()),
    }
}
