use std::collections::BTreeMap;

use proptest::prelude::*;

use bimdelta::{
    config::DocumentConfig,
    core::{Document, DocumentView, ROOT_GRAPH_ID},
    delta::{Delta, MoiDelta},
    graph::Graph3d,
    math::Transform,
    record::{AffectedResults, DeltasRecord},
    state::{FfeData, MetaGraphData, MoiState},
    types::{DeltaKind, ObjId, ObjectType},
};
use glam::DVec3;

#[derive(Debug, Clone)]
enum Action {
    Group { x: i16 },
    Chair { target: u8, x: i16 },
    Rename { target: u8, name: u8 },
    Move { target: u8, x: i16 },
    Destroy { target: u8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (-500i16..500).prop_map(|x| Action::Group { x }),
        (0u8..32, -500i16..500).prop_map(|(target, x)| Action::Chair { target, x }),
        (0u8..32, 0u8..8).prop_map(|(target, name)| Action::Rename { target, name }),
        (0u8..32, -500i16..500).prop_map(|(target, x)| Action::Move { target, x }),
        (0u8..32).prop_map(|target| Action::Destroy { target }),
    ]
}

fn pick(ids: &[ObjId], target: u8) -> Option<ObjId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[usize::from(target) % ids.len()])
    }
}

fn deltas_for(doc: &Document, action: &Action) -> Option<Vec<Delta>> {
    let registry = doc.registry();
    let chairs = doc.objects_of_type(ObjectType::Furniture);
    let mut delta = MoiDelta::new();
    match action {
        Action::Group { x } => {
            let placement = Transform::from_translation(DVec3::new(f64::from(*x), 0.0, 0.0));
            let state = MoiState::new(doc.next_available_id(), ObjectType::MetaGraph, ROOT_GRAPH_ID)
                .with_custom_data(registry, &MetaGraphData::from_transform(&placement))
                .unwrap();
            delta.add_create_destroy(state, DeltaKind::Create);
        }
        Action::Chair { target, x } => {
            let groups = doc.objects_of_type(ObjectType::MetaGraph);
            let parent = pick(&groups, *target)?;
            let state = MoiState::new(doc.next_available_id(), ObjectType::Furniture, parent)
                .with_custom_data(registry, &FfeData::at(DVec3::new(f64::from(*x), 1.0, 0.0)))
                .unwrap();
            delta.add_create_destroy(state, DeltaKind::Create);
        }
        Action::Rename { target, name } => {
            let old = doc.object(pick(&chairs, *target)?)?.clone();
            let mut new = old.clone();
            new.display_name = format!("chair-{name}");
            delta.add_mutation(old, new);
        }
        Action::Move { target, x } => {
            let old = doc.object(pick(&chairs, *target)?)?.clone();
            let mut data: FfeData = old.custom_data.load().unwrap();
            data.location.x = f64::from(*x);
            let new = old.clone().with_custom_data(registry, &data).unwrap();
            delta.add_mutation(old, new);
        }
        Action::Destroy { target } => {
            let old = doc.object(pick(&chairs, *target)?)?.clone();
            delta.add_create_destroy(old, DeltaKind::Destroy);
        }
    }
    Some(vec![delta.into()])
}

type ModelState = (Vec<MoiState>, BTreeMap<ObjId, Graph3d>);

fn model_state(doc: &Document) -> ModelState {
    let snapshot = doc.export_snapshot();
    (snapshot.objects, snapshot.volume_graphs)
}

fn placed_record(id: ObjId, x: f64, user: &str) -> DeltasRecord {
    let doc = Document::new(DocumentConfig::default());
    let placement = Transform::from_translation(DVec3::new(x, 0.0, 0.0));
    let state = MoiState::new(id, ObjectType::MetaGraph, ROOT_GRAPH_ID)
        .with_custom_data(doc.registry(), &MetaGraphData::from_transform(&placement))
        .unwrap();
    let mut delta = MoiDelta::new();
    delta.add_create_destroy(state, DeltaKind::Create);
    let deltas: Vec<Delta> = vec![delta.into()];
    let mut record = DeltasRecord::new(doc.registry(), &deltas, user, 0, false).unwrap();
    record.set_results(AffectedResults::from_deltas(&deltas));
    record
}

proptest! {
    #[test]
    fn undo_all_then_redo_all_round_trips(actions in prop::collection::vec(action_strategy(), 1..60)) {
        let mut doc = Document::new(DocumentConfig {
            max_undo_depth: 0,
            ..DocumentConfig::default()
        });
        let initial = model_state(&doc);
        let mut committed = 0usize;

        for action in &actions {
            let Some(deltas) = deltas_for(&doc, action) else {
                continue;
            };
            if doc.apply_deltas(deltas).unwrap().is_some() {
                committed += 1;
            }
        }
        prop_assert_eq!(doc.undo_len(), committed);
        let last = model_state(&doc);

        for _ in 0..committed {
            doc.undo().unwrap();
        }
        prop_assert_eq!(model_state(&doc), initial);

        for _ in 0..committed {
            doc.redo().unwrap();
        }
        prop_assert_eq!(model_state(&doc), last);
        prop_assert_eq!(doc.verified_records().len(), committed * 3);
    }

    #[test]
    fn conflict_check_is_symmetric(
        a_id in 2u32..40,
        b_id in 2u32..40,
        a_x in -100.0f64..100.0,
        b_x in -100.0f64..100.0,
        epsilon in 0.0f64..5.0,
    ) {
        let a = placed_record(a_id, a_x, "alice");
        let b = placed_record(b_id, b_x, "bob");
        prop_assert_eq!(
            a.conflicts_with_results(&b.results, epsilon),
            b.conflicts_with_results(&a.results, epsilon)
        );
        if a_id != b_id && (a_x - b_x).abs() > 2.0 * epsilon + 1e-9 {
            prop_assert!(!a.conflicts_with_results(&b.results, epsilon));
        }
    }

    #[test]
    fn total_hash_is_deterministic(id in 2u32..1000, x in -1000.0f64..1000.0) {
        let a = placed_record(id, x, "alice");
        let b = placed_record(id, x, "alice");
        prop_assert_eq!(a.total_hash, b.total_hash);
        prop_assert_eq!(a.self_hash, b.self_hash);
    }
}
