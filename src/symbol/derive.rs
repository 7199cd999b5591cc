use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{Derivation, SymbolError, equivalents_of, reposition, walk_group};
use crate::{
    core::DocumentView,
    delta::{Graph2dDelta, Graph3dDelta, MoiDelta, MoiDeltaState, PresetDelta},
    math::Transform,
    state::MoiState,
    types::{DeltaKind, Guid, ObjId, ObjectType},
};

/// The group an edited object belongs to and the Symbol instance enclosing it.
struct SymbolContext {
    group_id: ObjId,
    symbol_group_id: ObjId,
    guid: Guid,
}

fn symbol_context<V: DocumentView + ?Sized>(view: &V, id: ObjId) -> Option<SymbolContext> {
    let object = view.object_by_id(id)?;
    if object.object_type.is_span() {
        return None;
    }
    let group_id = view.group_id_for_object(id)?;
    if group_id == view.root_volume_graph_id() {
        return None;
    }
    let (symbol_group_id, guid) = view.symbol_group_for(group_id)?;
    Some(SymbolContext {
        group_id,
        symbol_group_id,
        guid,
    })
}

/// Types whose custom data names other objects of the same instance.
fn references_ids(object_type: ObjectType) -> bool {
    object_type.is_graph_element() || object_type == ObjectType::SurfaceGraph
}

pub(crate) fn derive_for_moi<V: DocumentView + ?Sized>(
    view: &V,
    state: &MoiDeltaState,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    match state.kind {
        DeltaKind::Mutate => derive_for_mutation(view, &state.old, &state.new, out),
        DeltaKind::Create => derive_for_creation(view, &state.new, out),
        DeltaKind::Destroy => derive_for_destruction(view, &state.old, out),
    }
}

/// Replays `old -> new` on every equivalent object and stores the canonical copy.
fn derive_for_mutation<V: DocumentView + ?Sized>(
    view: &V,
    old: &MoiState,
    new: &MoiState,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    let Some(ctx) = symbol_context(view, old.id) else {
        return Ok(());
    };
    let mut data = out.catalog().symbol_data(ctx.guid)?;
    let Some(primary) = data.primary_for(old.id) else {
        debug!(id = old.id, symbol = %ctx.guid, "object has no equivalents");
        return Ok(());
    };

    let registry = out.registry();
    let source = view.group_world_transform(ctx.symbol_group_id);
    let mut mirrored = MoiDelta::new();
    for other in equivalents_of(&data, primary, old.id) {
        if out.is_destroyed(other) {
            continue;
        }
        let Some(current) = view.object_by_id(other) else {
            continue;
        };
        let mut next = new.clone();
        next.id = other;
        next.parent_id = current.parent_id;
        if references_ids(next.object_type) {
            next.custom_data = current.custom_data.clone();
        }
        let other_group = view
            .group_id_for_object(other)
            .and_then(|group| view.symbol_group_for(group));
        if let Some((other_symbol_group, _)) = other_group {
            let relative = Transform::relative(&source, &view.group_world_transform(other_symbol_group));
            reposition(registry, &mut next, &relative)?;
        }
        mirrored.add_mutation(current.clone(), next);
    }
    out.push(mirrored);

    if new.object_type.is_graph_element() {
        return Ok(());
    }
    let member = data
        .members
        .get_mut(&primary)
        .ok_or(SymbolError::MissingMember {
            guid: ctx.guid,
            id: primary,
        })?;
    let mut canonical = new.clone();
    canonical.id = primary;
    canonical.parent_id = member.parent_id;
    if references_ids(canonical.object_type) {
        canonical.custom_data = member.custom_data.clone();
    }
    reposition(registry, &mut canonical, &source.inverse())?;
    *member = canonical;
    out.catalog().store_symbol_data(ctx.guid, &data)
}

/// A new object inside an instance dirties that instance, and a new group also dirties
/// the instance enclosing it.
fn derive_for_creation<V: DocumentView + ?Sized>(
    view: &V,
    state: &MoiState,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    if state.object_type.is_span() {
        return Ok(());
    }
    let Some(group_id) = view.group_id_for_object(state.parent_id) else {
        return Ok(());
    };
    if group_id == view.root_volume_graph_id() {
        return Ok(());
    }
    let Some((symbol_group_id, guid)) = view.symbol_group_for(group_id) else {
        return Ok(());
    };
    out.catalog().symbol_data(guid)?;
    out.dirty(symbol_group_id);

    if state.object_type == ObjectType::MetaGraph {
        let outer = view
            .object_by_id(symbol_group_id)
            .and_then(|group| view.symbol_group_for(group.parent_id));
        if let Some((outer_group_id, _)) = outer {
            out.dirty(outer_group_id);
        }
    }
    Ok(())
}

/// Destroying a group drops its members from every equivalence set; destroying anything
/// else dirties the instance.
fn derive_for_destruction<V: DocumentView + ?Sized>(
    view: &V,
    state: &MoiState,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    let Some(ctx) = symbol_context(view, state.id) else {
        return Ok(());
    };
    let mut data = out.catalog().symbol_data(ctx.guid)?;

    if state.object_type == ObjectType::MetaGraph {
        let contents = walk_group(view, ctx.group_id);
        let mut removed: BTreeSet<ObjId> = contents.members.into_iter().collect();
        removed.extend(contents.groups);
        removed.insert(ctx.group_id);
        if data.remove_group_members(&removed) {
            out.catalog().store_symbol_data(ctx.guid, &data)?;
        }
        out.clean(ctx.group_id);
    } else {
        out.dirty(ctx.symbol_group_id);
    }
    Ok(())
}

/// Structural edits dirty the instance; pure vertex moves are replayed on every
/// equivalent vertex, in the frame of its own instance.
pub(crate) fn derive_for_graph3d<V: DocumentView + ?Sized>(
    view: &V,
    delta: &Graph3dDelta,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    let Some((symbol_group_id, guid)) = view.symbol_group_for(delta.graph_id) else {
        return Ok(());
    };
    let mut data = out.catalog().symbol_data(guid)?;
    if delta.has_structural_changes() {
        out.dirty(symbol_group_id);
        return Ok(());
    }
    if delta.vertex_movements.is_empty() {
        return Ok(());
    }

    let source = view.group_world_transform(symbol_group_id);
    let to_canonical = source.inverse();
    let graph_key = data.primary_for(delta.graph_id).unwrap_or(data.root_graph);
    if !data.graphs.contains_key(&graph_key) {
        return Err(SymbolError::MissingGraph {
            guid,
            graph: graph_key,
        });
    }

    let mut mirrored: BTreeMap<ObjId, Graph3dDelta> = BTreeMap::new();
    for (vertex, (from, to)) in &delta.vertex_movements {
        let Some(primary) = data.primary_for(*vertex) else {
            continue;
        };
        let canonical = data
            .graphs
            .get_mut(&graph_key)
            .and_then(|graph| graph.vertices.get_mut(&primary))
            .ok_or(SymbolError::MissingMember { guid, id: primary })?;
        *canonical = to_canonical.transform_point(*to);

        for other in equivalents_of(&data, primary, *vertex) {
            let Some(other_graph) = view.graph_id_for_element(other) else {
                continue;
            };
            let Some((other_symbol_group, _)) = view.symbol_group_for(other_graph) else {
                continue;
            };
            let relative = Transform::relative(&source, &view.group_world_transform(other_symbol_group));
            mirrored
                .entry(other_graph)
                .or_insert_with(|| Graph3dDelta::new(other_graph))
                .vertex_movements
                .insert(other, (relative.transform_point(*from), relative.transform_point(*to)));
        }
    }

    for mirrored in mirrored.into_values() {
        out.push(mirrored);
    }
    out.catalog().store_symbol_data(guid, &data)
}

/// Surface-graph counterpart of [`derive_for_graph3d`]. Surface coordinates are local to
/// their host face, so moves are replayed verbatim.
pub(crate) fn derive_for_graph2d<V: DocumentView + ?Sized>(
    view: &V,
    delta: &Graph2dDelta,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    let Some((symbol_group_id, guid)) = view.symbol_group_for(delta.graph_id) else {
        return Ok(());
    };
    let mut data = out.catalog().symbol_data(guid)?;
    if delta.has_structural_changes() {
        out.dirty(symbol_group_id);
        return Ok(());
    }
    if delta.vertex_movements.is_empty() {
        return Ok(());
    }

    let graph_key = data.primary_for(delta.graph_id).unwrap_or(delta.graph_id);
    if !data.surface_graphs.contains_key(&graph_key) {
        return Err(SymbolError::MissingGraph {
            guid,
            graph: graph_key,
        });
    }

    let mut mirrored: BTreeMap<ObjId, Graph2dDelta> = BTreeMap::new();
    for (vertex, (from, to)) in &delta.vertex_movements {
        let Some(primary) = data.primary_for(*vertex) else {
            continue;
        };
        if let Some(graph) = data.surface_graphs.get_mut(&graph_key) {
            graph.vertices.insert(primary, *to);
        }
        for other in equivalents_of(&data, primary, *vertex) {
            let Some(other_graph) = view.graph_id_for_element(other) else {
                continue;
            };
            mirrored
                .entry(other_graph)
                .or_insert_with(|| Graph2dDelta::new(other_graph))
                .vertex_movements
                .insert(other, (*from, *to));
        }
    }

    for mirrored in mirrored.into_values() {
        out.push(mirrored);
    }
    out.catalog().store_symbol_data(guid, &data)
}

/// Deleting a Symbol preset turns its instances into plain groups.
pub(crate) fn derive_for_preset<V: DocumentView + ?Sized>(
    view: &V,
    delta: &PresetDelta,
    out: &mut Derivation<'_>,
) -> Result<(), SymbolError> {
    if !delta.is_deletion() {
        return Ok(());
    }
    let Some(guid) = delta.guid() else {
        return Ok(());
    };
    let mut cleared = MoiDelta::new();
    for group_id in super::all_root_groups_for_symbol(view, guid) {
        let Some(group) = view.object_by_id(group_id) else {
            continue;
        };
        let mut plain = group.clone();
        plain.assembly_guid = None;
        cleared.add_mutation(group.clone(), plain);
    }
    out.push(cleared);
    Ok(())
}
