use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tempfile::TempDir;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use bimdelta::{
    config::DocumentConfig,
    core::{Document, ROOT_GRAPH_ID, Reconciliation, RejectReason},
    delta::{Delta, MoiDelta},
    math::Transform,
    persist::{PersistResult, RecordSink, sqlite::SqliteRecordSink},
    record::{AffectedResults, DeltasRecord, StoredRecord},
    runtime::{DocumentEvent, RuntimeConfig, RuntimeError, spawn_document},
    state::{FfeData, MetaGraphData, MoiState},
    types::{DeltaKind, ObjId, ObjectType, RecordSeq},
    wrapper::TypeRegistry,
};
use glam::DVec3;

fn group(registry: &TypeRegistry, id: ObjId) -> MoiState {
    MoiState::new(id, ObjectType::MetaGraph, ROOT_GRAPH_ID)
        .with_custom_data(registry, &MetaGraphData::default())
        .expect("group data")
}

fn chair(registry: &TypeRegistry, id: ObjId, parent: ObjId, x: f64) -> MoiState {
    MoiState::new(id, ObjectType::Furniture, parent)
        .with_custom_data(registry, &FfeData::at(DVec3::new(x, 0.0, 0.0)))
        .expect("chair data")
}

fn create(states: Vec<MoiState>) -> Vec<Delta> {
    let mut delta = MoiDelta::new();
    for state in states {
        delta.add_create_destroy(state, DeltaKind::Create);
    }
    vec![delta.into()]
}

fn rename(old: MoiState, name: &str) -> Vec<Delta> {
    let mut new = old.clone();
    new.display_name = name.to_string();
    let mut delta = MoiDelta::new();
    delta.add_mutation(old, new);
    vec![delta.into()]
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Next event that is not a durability notice.
async fn next_change(sub: &mut broadcast::Receiver<DocumentEvent>) -> DocumentEvent {
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, DocumentEvent::DurableUpTo { .. }) {
            return evt;
        }
    }
}

struct SlowSink {
    seen: Arc<Mutex<Vec<RecordSeq>>>,
    delay: Duration,
}

impl RecordSink for SlowSink {
    fn append_records(&mut self, records: &[StoredRecord]) -> PersistResult<RecordSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        for stored in records {
            seen.push(stored.seq);
        }
        Ok(records.last().map(|r| r.seq).unwrap_or(0))
    }
}

#[tokio::test]
async fn runtime_apply_undo_query_and_events_ordered() {
    init_tracing();
    let registry = TypeRegistry::with_builtin_types();
    let handle = spawn_document(
        Document::new(DocumentConfig::default()),
        None,
        RuntimeConfig::default(),
    );
    let mut sub = handle.subscribe();

    let record = handle
        .apply(create(vec![group(&registry, 10), chair(&registry, 11, 10, 1.0)]))
        .await
        .expect("apply")
        .expect("record");
    let chair_state = handle.get(11).await.expect("get").expect("chair");
    handle
        .apply(rename(chair_state, "stool"))
        .await
        .expect("rename");
    handle.undo().await.expect("undo");
    handle.redo().await.expect("redo");

    let renamed = handle.get(11).await.expect("get").expect("chair");
    assert_eq!(renamed.display_name, "stool");

    assert_eq!(
        next_change(&mut sub).await,
        DocumentEvent::Committed {
            total_hash: record.total_hash,
            origin: record.origin_user_id.clone(),
        }
    );
    assert!(matches!(next_change(&mut sub).await, DocumentEvent::Committed { .. }));
    assert_eq!(next_change(&mut sub).await, DocumentEvent::UndoApplied);
    assert_eq!(next_change(&mut sub).await, DocumentEvent::RedoApplied);

    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.next_record_seq, 5);
    assert_eq!(snapshot.latest_hash, handle.latest_hash().await.expect("hash"));

    handle.shutdown().await.expect("shutdown");
    assert!(matches!(
        handle.get(11).await,
        Err(RuntimeError::ChannelClosed)
    ));
}

#[tokio::test]
async fn runtime_symbol_commands_mirror_edits() {
    init_tracing();
    let registry = TypeRegistry::with_builtin_types();
    let handle = spawn_document(
        Document::new(DocumentConfig::default()),
        None,
        RuntimeConfig::default(),
    );

    handle
        .apply(create(vec![group(&registry, 10), chair(&registry, 11, 10, 1.0)]))
        .await
        .expect("apply");
    let guid = handle.create_symbol(10).await.expect("symbol");
    let placement = Transform::from_translation(DVec3::new(100.0, 0.0, 0.0));
    let instance = handle
        .place_symbol_instance(guid, ROOT_GRAPH_ID, placement)
        .await
        .expect("instance");

    let instance_group = handle.get(instance).await.expect("get").expect("group");
    assert_eq!(instance_group.assembly_guid, Some(guid));
    let data: MetaGraphData = instance_group.custom_data.load().expect("group data");
    assert_eq!(data.location, DVec3::new(100.0, 0.0, 0.0));
    assert!(handle.propagate_dirty().await.expect("propagate").is_none());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn runtime_reconciles_remote_records() {
    init_tracing();
    let registry = TypeRegistry::with_builtin_types();
    let handle = spawn_document(
        Document::new(DocumentConfig::default().with_user("alice")),
        None,
        RuntimeConfig::default(),
    );
    let mut sub = handle.subscribe();

    let base = handle.latest_hash().await.expect("hash");
    let deltas = create(vec![group(&registry, 20)]);
    let mut from_bob = DeltasRecord::new(&registry, &deltas, "bob", base, false).expect("record");
    from_bob.set_results(AffectedResults::from_deltas(&deltas));

    let outcome = handle.submit_remote(from_bob.clone()).await.expect("submit");
    assert!(matches!(outcome, Reconciliation::Accepted(_)));
    assert!(handle.get(20).await.expect("get").is_some());
    assert_eq!(
        next_change(&mut sub).await,
        DocumentEvent::RemoteApplied {
            total_hash: handle.latest_hash().await.expect("hash"),
            rebased: false,
        }
    );

    let outcome = handle.submit_remote(from_bob).await.expect("resubmit");
    assert_eq!(outcome, Reconciliation::Rejected(RejectReason::Conflict));
    assert_eq!(
        next_change(&mut sub).await,
        DocumentEvent::RemoteRejected {
            reason: RejectReason::Conflict
        }
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn durable_event_advances_and_full_queue_keeps_every_record() {
    init_tracing();
    let registry = TypeRegistry::with_builtin_types();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(20),
    };

    let cfg = RuntimeConfig {
        flush_on_commit: true,
        batch_max_records: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_records: 0,
        compact_after_snapshot: false,
    };

    let handle = spawn_document(
        Document::new(DocumentConfig::default()),
        Some(Box::new(sink)),
        cfg,
    );
    let mut sub = handle.subscribe();

    handle
        .apply(create(vec![group(&registry, 10)]))
        .await
        .expect("apply");

    let mut durable_seen = false;
    for _ in 0..5 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if evt == (DocumentEvent::DurableUpTo { seq: 1 }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    for i in 0..12u32 {
        handle
            .apply(create(vec![chair(&registry, 100 + i, 10, f64::from(i))]))
            .await
            .expect("committed write succeeds under a full queue");
    }
    assert_eq!(handle.flush().await.expect("flush"), 13);

    handle.shutdown().await.expect("shutdown");
    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen, (1..=13).collect::<Vec<RecordSeq>>());
}

#[tokio::test]
async fn sqlite_backed_runtime_survives_restart() {
    init_tracing();
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("model.db");
    let registry = Arc::new(TypeRegistry::with_builtin_types());

    let sink = SqliteRecordSink::open(&db_path).expect("open sqlite");
    let handle = spawn_document(
        Document::with_registry(DocumentConfig::default(), Arc::clone(&registry)),
        Some(Box::new(sink)),
        RuntimeConfig::default(),
    );
    handle
        .apply(create(vec![group(&registry, 10), chair(&registry, 11, 10, 2.0)]))
        .await
        .expect("apply");
    handle.create_symbol(10).await.expect("symbol");
    handle.checkpoint().await.expect("checkpoint");
    let chair_state = handle.get(11).await.expect("get").expect("chair");
    handle
        .apply(rename(chair_state, "armchair"))
        .await
        .expect("rename");
    assert_eq!(handle.flush().await.expect("flush"), 3);

    let before = handle.snapshot().await.expect("snapshot");
    handle.shutdown().await.expect("shutdown");

    let sink = SqliteRecordSink::open(&db_path).expect("reopen");
    let reloaded = sink
        .load_document(DocumentConfig::default(), registry)
        .expect("replay");
    assert_eq!(reloaded.export_snapshot(), before);
}
