use bimdelta::{
    config::DocumentConfig,
    core::{Document, DocumentError, ROOT_GRAPH_ID, Reconciliation, RejectReason},
    delta::{Delta, MoiDelta},
    math::Transform,
    record::{AffectedResults, DeltasRecord},
    state::{MetaGraphData, MoiState},
    types::{DeltaKind, ObjId, ObjectType},
    wrapper::TypeRegistry,
};
use glam::DVec3;

fn document(user: &str) -> Document {
    Document::new(DocumentConfig::default().with_user(user))
}

fn group_at(doc: &Document, id: ObjId, x: f64) -> MoiState {
    let placement = Transform::from_translation(DVec3::new(x, 0.0, 0.0));
    MoiState::new(id, ObjectType::MetaGraph, ROOT_GRAPH_ID)
        .with_custom_data(doc.registry(), &MetaGraphData::from_transform(&placement))
        .unwrap()
}

fn create(state: MoiState) -> Vec<Delta> {
    let mut delta = MoiDelta::new();
    delta.add_create_destroy(state, DeltaKind::Create);
    vec![delta.into()]
}

fn rename(doc: &Document, id: ObjId, name: &str) -> Vec<Delta> {
    let old = doc.object(id).unwrap().clone();
    let mut new = old.clone();
    new.display_name = name.to_string();
    let mut delta = MoiDelta::new();
    delta.add_mutation(old, new);
    vec![delta.into()]
}

/// A record authored by `user` on top of `doc`'s latest verified hash.
fn remote(doc: &Document, user: &str, deltas: &[Delta]) -> DeltasRecord {
    let mut record =
        DeltasRecord::new(doc.registry(), deltas, user, doc.latest_verified_doc_hash(), false)
            .unwrap();
    record.set_results(AffectedResults::from_deltas(deltas));
    record
}

#[test]
fn total_hash_depends_only_on_payload_origin_and_predecessor() {
    let registry = TypeRegistry::with_builtin_types();
    let doc = document("alice");
    let deltas = create(group_at(&doc, 10, 0.0));

    let a = DeltasRecord::new(&registry, &deltas, "alice", 7, false).unwrap();
    let b = DeltasRecord::new(&registry, &deltas, "alice", 7, true).unwrap();
    assert_eq!(a.total_hash, b.total_hash);
    assert_eq!(a, b);

    let other_user = DeltasRecord::new(&registry, &deltas, "bob", 7, false).unwrap();
    assert_ne!(a.total_hash, other_user.total_hash);
    let other_prev = DeltasRecord::new(&registry, &deltas, "alice", 8, false).unwrap();
    assert_ne!(a.total_hash, other_prev.total_hash);
    assert_eq!(a.self_hash, other_prev.self_hash);
}

#[test]
fn record_on_latest_hash_is_accepted_and_applied() {
    let mut alice = document("alice");
    let mut bob = document("bob");

    let record = alice
        .apply_deltas(create(group_at(&alice, 10, 0.0)))
        .unwrap()
        .unwrap();

    let accepted = match bob.reconcile_remote_record(&record) {
        Reconciliation::Accepted(record) => record,
        other => panic!("expected acceptance, got {other:?}"),
    };
    let applied = bob.apply_remote_record(accepted).unwrap();

    assert!(bob.object(10).is_some());
    assert!(applied.results.added.contains(&10));
    assert_eq!(bob.latest_verified_doc_hash(), alice.latest_verified_doc_hash());
    assert_eq!(bob.undo_len(), 0);
}

#[test]
fn disjoint_record_on_older_hash_is_rebased() {
    let mut alice = document("alice");
    let mut bob = document("bob");

    alice
        .apply_deltas(create(group_at(&alice, 10, 0.0)))
        .unwrap();
    let from_bob = bob
        .apply_deltas(create(group_at(&bob, 20, 1000.0)))
        .unwrap()
        .unwrap();

    let rebased = match alice.reconcile_remote_record(&from_bob) {
        Reconciliation::Rebased(record) => record,
        other => panic!("expected a rebase, got {other:?}"),
    };
    assert_eq!(rebased.prev_doc_hash, alice.latest_verified_doc_hash());
    assert_eq!(rebased.origin_user_id, "bob");
    assert_eq!(rebased, from_bob);

    alice.apply_remote_record(rebased).unwrap();
    assert!(alice.object(10).is_some());
    assert!(alice.object(20).is_some());
}

#[test]
fn overlapping_objects_are_rejected() {
    let mut alice = document("alice");
    let mut bob = document("bob");

    alice
        .apply_deltas(create(group_at(&alice, 10, 0.0)))
        .unwrap();
    let from_bob = bob
        .apply_deltas(create(group_at(&bob, 10, 1000.0)))
        .unwrap()
        .unwrap();

    assert_eq!(
        alice.reconcile_remote_record(&from_bob),
        Reconciliation::Rejected(RejectReason::Conflict)
    );
}

#[test]
fn nearby_bounds_are_rejected() {
    let mut alice = document("alice");
    let mut bob = document("bob");

    alice
        .apply_deltas(create(group_at(&alice, 10, 0.0)))
        .unwrap();
    let from_bob = bob
        .apply_deltas(create(group_at(&bob, 20, 0.005)))
        .unwrap()
        .unwrap();

    assert_eq!(
        alice.reconcile_remote_record(&from_bob),
        Reconciliation::Rejected(RejectReason::Conflict)
    );
}

#[test]
fn unknown_predecessor_is_rejected() {
    let mut alice = document("alice");
    alice
        .apply_deltas(create(group_at(&alice, 10, 0.0)))
        .unwrap();

    let stray = DeltasRecord::new(
        alice.registry(),
        &create(group_at(&alice, 20, 50.0)),
        "mallory",
        0xdead_beef,
        false,
    )
    .unwrap();
    assert_eq!(
        alice.reconcile_remote_record(&stray),
        Reconciliation::Rejected(RejectReason::UnknownPredecessor(0xdead_beef))
    );
}

#[test]
fn applying_a_record_on_a_stale_hash_fails_without_changes() {
    let mut alice = document("alice");
    let stale = remote(&alice, "bob", &create(group_at(&alice, 20, 50.0)));
    alice
        .apply_deltas(create(group_at(&alice, 10, 0.0)))
        .unwrap();

    let err = alice.apply_remote_record(stale).unwrap_err();
    assert!(matches!(err, DocumentError::HashMismatch { .. }));
    assert!(alice.object(20).is_none());
}

#[test]
fn conflict_check_is_symmetric_for_disjoint_records() {
    let doc = document("alice");
    let a = remote(&doc, "alice", &create(group_at(&doc, 10, 0.0)));
    let b = remote(&doc, "bob", &create(group_at(&doc, 20, 500.0)));

    assert!(!a.conflicts_with_results(&b.results, 0.01));
    assert!(!b.conflicts_with_results(&a.results, 0.01));
    assert!(a.conflicts_with_results(&a.results, 0.01));
}

#[test]
fn user_undo_also_reverts_dependent_records() {
    let mut doc = document("alice");
    doc.apply_deltas(create(group_at(&doc, 10, 0.0))).unwrap();

    let from_bob = remote(&doc, "bob", &create(group_at(&doc, 20, 1000.0)));
    doc.apply_remote_record(from_bob).unwrap();
    let from_carol = remote(&doc, "carol", &rename(&doc, 10, "lobby"));
    doc.apply_remote_record(from_carol).unwrap();

    let undo = doc.undo_records_for_user("alice").unwrap();
    assert_eq!(undo.len(), 2);
    assert_eq!(undo[0].prev_doc_hash, doc.latest_verified_doc_hash());
    assert_eq!(undo[1].prev_doc_hash, undo[0].total_hash);
    assert!(undo.iter().all(|record| record.origin_user_id == "alice"));

    for record in undo {
        doc.apply_remote_record(record).unwrap();
    }
    assert!(doc.object(10).is_none());
    assert!(doc.object(20).is_some());
}

#[test]
fn user_undo_reverts_only_the_latest_own_record() {
    let mut doc = document("alice");
    doc.apply_deltas(create(group_at(&doc, 10, 0.0))).unwrap();
    doc.apply_deltas(create(group_at(&doc, 20, 5000.0))).unwrap();

    let undo = doc.undo_records_for_user("alice").unwrap();
    assert_eq!(undo.len(), 1);
    for record in undo {
        doc.apply_remote_record(record).unwrap();
    }
    assert!(doc.object(10).is_some());
    assert!(doc.object(20).is_none());
}

#[test]
fn user_without_records_has_nothing_to_undo() {
    let mut doc = document("alice");
    doc.apply_deltas(create(group_at(&doc, 10, 0.0))).unwrap();
    assert!(doc.undo_records_for_user("nobody").unwrap().is_empty());
}
