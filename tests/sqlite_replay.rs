use rusqlite::{Connection, params};
use tempfile::TempDir;

use bimdelta::{
    config::DocumentConfig,
    core::{Document, ROOT_GRAPH_ID},
    delta::{Delta, MoiDelta},
    persist::{PersistError, RecordSink, sqlite::SqliteRecordSink},
    record::{StoredRecord, StoredRecordEnvelope},
    state::{FfeData, MetaGraphData, MoiState},
    types::{DeltaKind, ObjId, ObjectType},
};
use glam::DVec3;

fn group(doc: &Document, id: ObjId) -> MoiState {
    MoiState::new(id, ObjectType::MetaGraph, ROOT_GRAPH_ID)
        .with_custom_data(doc.registry(), &MetaGraphData::default())
        .expect("group data")
}

fn chair(doc: &Document, id: ObjId, parent: ObjId, x: f64) -> MoiState {
    MoiState::new(id, ObjectType::Furniture, parent)
        .with_custom_data(doc.registry(), &FfeData::at(DVec3::new(x, 0.0, 0.0)))
        .expect("chair data")
}

fn create(states: Vec<MoiState>) -> Vec<Delta> {
    let mut delta = MoiDelta::new();
    for state in states {
        delta.add_create_destroy(state, DeltaKind::Create);
    }
    vec![delta.into()]
}

fn moved(doc: &Document, id: ObjId, x: f64) -> Vec<Delta> {
    let old = doc.object(id).expect("object").clone();
    let new = chair(doc, id, old.parent_id, x);
    let mut delta = MoiDelta::new();
    delta.add_mutation(old, new);
    vec![delta.into()]
}

/// Builds a small model: a Symbol with two chairs, a second instance, an edit and an undo.
fn populate(doc: &mut Document) {
    doc.apply_deltas(create(vec![
        group(doc, 10),
        chair(doc, 11, 10, 1.0),
        chair(doc, 12, 10, 2.0),
    ]))
    .expect("create");
    let guid = doc.create_symbol(10).expect("symbol");
    doc.place_symbol_instance(guid, ROOT_GRAPH_ID, &Default::default())
        .expect("instance");
    doc.apply_deltas(moved(doc, 11, 5.0)).expect("move");
    doc.apply_deltas(moved(doc, 12, 6.0)).expect("move");
    doc.undo().expect("undo");
}

#[test]
fn journal_replay_rebuilds_the_document() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("model.db");

    let mut doc = Document::new(DocumentConfig::default());
    populate(&mut doc);

    let mut sink = SqliteRecordSink::open(&db_path).expect("open sqlite");
    let pending = doc.drain_pending_records();
    assert_eq!(pending.len(), 6);
    let durable = sink.append_records(&pending).expect("append");
    assert_eq!(durable, doc.latest_record_seq());
    drop(sink);

    let sink = SqliteRecordSink::open(&db_path).expect("reopen");
    let replayed = sink
        .load_document(DocumentConfig::default(), doc.registry().clone())
        .expect("replay");

    assert_eq!(replayed.export_snapshot(), doc.export_snapshot());
    assert_eq!(replayed.latest_verified_doc_hash(), doc.latest_verified_doc_hash());
    assert_eq!(replayed.latest_record_seq(), doc.latest_record_seq());
    assert_eq!(replayed.undo_len(), 0);
}

#[test]
fn snapshot_and_compaction_keep_the_tail_replayable() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("model.db");
    let mut sink = SqliteRecordSink::open(&db_path).expect("open sqlite");

    let mut doc = Document::new(DocumentConfig::default());
    populate(&mut doc);
    sink.append_records(&doc.drain_pending_records()).expect("append");

    let snapshot_seq = doc.latest_record_seq();
    sink.write_snapshot(&doc.export_snapshot(), snapshot_seq)
        .expect("snapshot");
    let removed = sink.compact_through(snapshot_seq).expect("compact");
    assert_eq!(removed as u64, snapshot_seq);
    assert_eq!(sink.latest_seq().expect("latest"), 0);

    doc.apply_deltas(moved(&doc, 11, 9.0)).expect("move");
    sink.append_records(&doc.drain_pending_records()).expect("append tail");
    assert_eq!(sink.load_records_after(0).expect("tail").len(), 1);
    drop(sink);

    let sink = SqliteRecordSink::open(&db_path).expect("reopen");
    let replayed = sink
        .load_document(DocumentConfig::default(), doc.registry().clone())
        .expect("replay");

    assert_eq!(replayed.export_snapshot(), doc.export_snapshot());
    assert_eq!(replayed.latest_verified_doc_hash(), doc.latest_verified_doc_hash());
}

#[test]
fn origins_follow_journal_order() {
    let mut sink = SqliteRecordSink::open_in_memory().expect("open sqlite");
    let mut alice = Document::new(DocumentConfig::default().with_user("alice"));
    alice
        .apply_deltas(create(vec![group(&alice, 10)]))
        .expect("create");

    let mut bob = Document::new(DocumentConfig::default().with_user("bob"));
    let from_alice = alice.verified_records()[0].clone();
    bob.apply_remote_record(from_alice).expect("remote");
    bob.apply_deltas(create(vec![chair(&bob, 11, 10, 1.0)]))
        .expect("create");

    sink.append_records(&bob.drain_pending_records()).expect("append");
    assert_eq!(sink.origins().expect("origins"), vec!["alice", "bob"]);
    assert_eq!(sink.latest_seq().expect("latest"), 2);
}

#[test]
fn unknown_record_format_is_refused() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("model.db");
    let mut sink = SqliteRecordSink::open(&db_path).expect("open sqlite");

    let mut doc = Document::new(DocumentConfig::default());
    doc.apply_deltas(create(vec![group(&doc, 10)])).expect("create");
    let pending = doc.drain_pending_records();
    sink.append_records(&pending).expect("append");
    drop(sink);

    let mut envelope = StoredRecordEnvelope::new(StoredRecord {
        seq: 2,
        record: pending[0].record.clone(),
    });
    envelope.format_version = 99;
    let conn = Connection::open(&db_path).expect("raw open");
    conn.execute(
        "INSERT INTO records(seq, ts_ms, origin, total_hash, payload) VALUES (?1, 0, 'local', 0, ?2)",
        params![2i64, serde_json::to_vec(&envelope).expect("encode")],
    )
    .expect("insert");
    drop(conn);

    let sink = SqliteRecordSink::open(&db_path).expect("reopen");
    let err = sink.load_records_after(0).unwrap_err();
    assert!(matches!(
        err,
        PersistError::UnsupportedFormat {
            what: "record",
            version: 99
        }
    ));
}
