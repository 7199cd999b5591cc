use std::collections::BTreeSet;

use tracing::debug;

use super::{SymbolCatalog, SymbolError, create_preset_data_for_symbol, instance::Instancer};
use crate::{
    core::DocumentView,
    delta::{Delta, Graph2dDelta, Graph3dDelta, MoiDelta},
    preset::SymbolPresetData,
    types::{DeltaKind, Guid, ObjId, ObjectType},
};

/// Everything under a group, split at nested group boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupContents {
    /// Non-group descendants, graph elements included, sorted.
    pub members: Vec<ObjId>,
    /// Groups reached without crossing another group, sorted.
    pub groups: Vec<ObjId>,
}

/// Collects the descendants of `group_id`, stopping at nested groups.
pub fn walk_group<V: DocumentView + ?Sized>(view: &V, group_id: ObjId) -> GroupContents {
    let mut contents = GroupContents::default();
    let mut stack = view.child_ids(group_id);
    while let Some(id) = stack.pop() {
        let Some(object) = view.object_by_id(id) else {
            continue;
        };
        if object.object_type == ObjectType::MetaGraph {
            contents.groups.push(id);
            continue;
        }
        contents.members.push(id);
        stack.extend(view.child_ids(id));
    }
    contents.members.sort_unstable();
    contents.groups.sort_unstable();
    contents
}

/// Every group instancing `guid`, nested instances included, sorted.
pub fn all_root_groups_for_symbol<V: DocumentView + ?Sized>(view: &V, guid: Guid) -> Vec<ObjId> {
    view.objects_of_type(ObjectType::MetaGraph)
        .into_iter()
        .filter(|id| {
            view.object_by_id(*id)
                .is_some_and(|group| group.assembly_guid == Some(guid))
        })
        .collect()
}

/// Deltas removing the content of `group_id`, and the group itself when `include_group`.
///
/// Nested groups go first, then surface graphs, then objects, then the volume graph.
pub fn graph_delete_recursive<V: DocumentView + ?Sized>(
    view: &V,
    group_id: ObjId,
    include_group: bool,
) -> Result<Vec<Delta>, SymbolError> {
    let group = view
        .object_by_id(group_id)
        .filter(|object| object.object_type == ObjectType::MetaGraph)
        .ok_or(SymbolError::NotAGroup(group_id))?;
    let contents = walk_group(view, group_id);
    let mut deltas = Vec::new();

    for child in &contents.groups {
        deltas.extend(graph_delete_recursive(view, *child, true)?);
    }

    let mut objects = MoiDelta::new();
    for id in &contents.members {
        let Some(object) = view.object_by_id(*id) else {
            continue;
        };
        if object.object_type.is_graph_element() {
            continue;
        }
        if object.object_type == ObjectType::SurfaceGraph {
            let graph = view
                .find_surface_graph(*id)
                .ok_or(SymbolError::MissingSurfaceGraph(*id))?;
            deltas.push(Graph2dDelta::removing_all(*id, graph).into());
        }
        objects.add_create_destroy(object.clone(), DeltaKind::Destroy);
    }
    deltas.push(objects.into());

    let graph = view
        .find_volume_graph(group_id)
        .ok_or(SymbolError::MissingVolumeGraph(group_id))?;
    deltas.push(Graph3dDelta::removing_all(group_id, graph).into());

    if include_group {
        let mut destroy = MoiDelta::new();
        destroy.add_create_destroy(group.clone(), DeltaKind::Destroy);
        deltas.push(destroy.into());
    }

    deltas.retain(|delta| !delta.is_empty());
    Ok(deltas)
}

/// Re-syncs each dirty instance: its content becomes the Symbol's canonical data and is
/// copied over every other instance of the same Symbol.
///
/// Groups that no longer exist or no longer instance a Symbol are skipped, as is any
/// group whose Symbol was already re-synced from another dirty group in this pass.
pub fn propagate_all_dirty<V: DocumentView + ?Sized>(
    view: &V,
    dirty: &BTreeSet<ObjId>,
) -> Result<Vec<Delta>, SymbolError> {
    let mut instancer = Instancer::new(view);
    let mut synced = BTreeSet::new();

    for group_id in dirty {
        let Some(guid) = view
            .object_by_id(*group_id)
            .filter(|group| group.object_type == ObjectType::MetaGraph)
            .and_then(|group| group.assembly_guid)
        else {
            debug!(group = group_id, "dirty group is gone or no longer a symbol instance");
            continue;
        };
        if !synced.insert(guid) {
            debug!(group = group_id, symbol = %guid, "symbol already re-synced in this pass");
            continue;
        }

        let previous = instancer.catalog.symbol_data(guid)?;
        let mut data = SymbolPresetData {
            anchor: previous.anchor,
            root_graph: *group_id,
            ..SymbolPresetData::default()
        };
        let to_canonical = view.group_world_transform(*group_id).inverse();
        create_preset_data_for_symbol(view, *group_id, &to_canonical, &mut data)?;

        let visiting = BTreeSet::from([guid]);
        for other in all_root_groups_for_symbol(view, guid) {
            if other == *group_id {
                continue;
            }
            prune_nested_equivalences(view, &mut instancer.catalog, other, guid)?;
            instancer.extend(graph_delete_recursive(view, other, false)?);
            let placement = view.group_world_transform(other);
            instancer.instantiate(other, guid, &mut data, &placement, &visiting)?;
        }
        instancer.catalog.store_symbol_data(guid, &data)?;
    }
    Ok(instancer.finish())
}

/// Removes the content of every nested instance under `group_id` from the equivalence
/// sets of the Symbol that nested instance belongs to. `resynced` is left alone.
fn prune_nested_equivalences<V: DocumentView + ?Sized>(
    view: &V,
    catalog: &mut SymbolCatalog<'_>,
    group_id: ObjId,
    resynced: Guid,
) -> Result<(), SymbolError> {
    let mut stack = walk_group(view, group_id).groups;
    while let Some(nested) = stack.pop() {
        let contents = walk_group(view, nested);
        let sub_guid = view.object_by_id(nested).and_then(|group| group.assembly_guid);
        if let Some(sub_guid) = sub_guid.filter(|sub| *sub != resynced) {
            let removed: BTreeSet<ObjId> =
                contents.members.iter().chain(&contents.groups).copied().collect();
            let mut data = catalog.symbol_data(sub_guid)?;
            if data.remove_group_members(&removed) {
                debug!(group = nested, symbol = %sub_guid, "pruned replaced nested instance");
                catalog.store_symbol_data(sub_guid, &data)?;
            }
        }
        stack.extend(contents.groups);
    }
    Ok(())
}

/// Deltas that make `group_id` stop instancing its Symbol.
///
/// The group's content is dropped from the Symbol's equivalence sets; the objects stay.
pub fn detach_symbol<V: DocumentView + ?Sized>(
    view: &V,
    group_id: ObjId,
) -> Result<Vec<Delta>, SymbolError> {
    let group = view
        .object_by_id(group_id)
        .filter(|object| object.object_type == ObjectType::MetaGraph)
        .ok_or(SymbolError::NotAGroup(group_id))?;
    let guid = group
        .assembly_guid
        .ok_or(SymbolError::NotSymbolInstance(group_id))?;

    let mut catalog = SymbolCatalog::new(view);
    let mut data = catalog.symbol_data(guid)?;
    let contents = walk_group(view, group_id);
    let removed: BTreeSet<ObjId> = contents.members.into_iter().chain(contents.groups).collect();
    if data.remove_group_members(&removed) {
        catalog.store_symbol_data(guid, &data)?;
    }

    let mut plain = group.clone();
    plain.assembly_guid = None;
    let mut detach = MoiDelta::new();
    detach.add_mutation(group.clone(), plain);

    let mut deltas: Vec<Delta> = vec![detach.into()];
    deltas.extend(catalog.into_deltas());
    Ok(deltas)
}
