use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glam::DVec3;

use bimdelta::{
    config::DocumentConfig,
    core::{Document, ROOT_GRAPH_ID},
    delta::{Delta, MoiDelta},
    math::Transform,
    state::{FfeData, MetaGraphData, MoiState},
    types::{DeltaKind, ObjId, ObjectType},
};

fn chair(doc: &Document, id: ObjId, parent: ObjId, x: f64) -> MoiState {
    MoiState::new(id, ObjectType::Furniture, parent)
        .with_custom_data(doc.registry(), &FfeData::at(DVec3::new(x, 0.0, 0.0)))
        .expect("chair data")
}

fn single(state: MoiState, kind: DeltaKind) -> Vec<Delta> {
    let mut delta = MoiDelta::new();
    delta.add_create_destroy(state, kind);
    vec![delta.into()]
}

fn moved(doc: &Document, id: ObjId, x: f64) -> Vec<Delta> {
    let old = doc.object(id).expect("object").clone();
    let new = chair(doc, id, old.parent_id, x);
    let mut delta = MoiDelta::new();
    delta.add_mutation(old, new);
    vec![delta.into()]
}

/// A Symbol with one chair, placed `instances` times along x.
fn symbol_document(instances: usize) -> Document {
    let mut doc = Document::new(DocumentConfig::default());
    let group = MoiState::new(10, ObjectType::MetaGraph, ROOT_GRAPH_ID)
        .with_custom_data(doc.registry(), &MetaGraphData::default())
        .expect("group data");
    doc.apply_deltas(single(group, DeltaKind::Create)).expect("group");
    doc.apply_deltas(single(chair(&doc, 11, 10, 1.0), DeltaKind::Create))
        .expect("chair");
    let guid = doc.create_symbol(10).expect("symbol");
    for i in 1..instances {
        let placement = Transform::from_translation(DVec3::new(10.0 * i as f64, 0.0, 0.0));
        doc.place_symbol_instance(guid, ROOT_GRAPH_ID, &placement)
            .expect("instance");
    }
    doc
}

fn bench_creates(c: &mut Criterion) {
    c.bench_function("document_create_5k", |b| {
        b.iter(|| {
            let mut doc = Document::new(DocumentConfig::default());
            for i in 0..5_000u32 {
                let state = chair(&doc, 10 + i, ROOT_GRAPH_ID, f64::from(i));
                doc.apply_deltas(single(state, DeltaKind::Create))
                    .expect("create");
            }
        });
    });
}

fn bench_undo_redo(c: &mut Criterion) {
    c.bench_function("document_undo_redo_1k", |b| {
        b.iter(|| {
            let mut doc = Document::new(DocumentConfig {
                max_undo_depth: 0,
                ..DocumentConfig::default()
            });
            doc.apply_deltas(single(chair(&doc, 10, ROOT_GRAPH_ID, 0.0), DeltaKind::Create))
                .expect("create");
            for i in 1..1_000u32 {
                doc.apply_deltas(moved(&doc, 10, f64::from(i))).expect("move");
            }
            for _ in 0..1_000 {
                doc.undo().expect("undo");
            }
            for _ in 0..1_000 {
                doc.redo().expect("redo");
            }
        });
    });
}

fn bench_mirrored_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("mirrored_edit");
    for instances in [2usize, 16, 128] {
        let mut doc = symbol_document(instances);
        let mut x = 1.0;
        group.bench_with_input(BenchmarkId::from_parameter(instances), &instances, |b, _| {
            b.iter(|| {
                x += 1.0;
                doc.apply_deltas(moved(&doc, 11, x)).expect("move");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_creates, bench_undo_redo, bench_mirrored_edit);
criterion_main!(benches);
