use std::collections::BTreeSet;

use super::{SymbolError, reposition, walk_group};
use crate::{
    core::DocumentView,
    delta::{Delta, MoiDelta},
    graph::Graph3d,
    math::Transform,
    preset::{Preset, SYMBOL_NCP, SymbolPresetData},
    types::{Guid, ObjId, ObjectType},
};

/// Captures the content of `group_id` into `data`, mapped into canonical space by
/// `to_canonical`.
///
/// Every captured object starts as its own sole equivalent. Nested groups are captured
/// as members; the ones that do not instance a Symbol themselves are descended into.
pub fn create_preset_data_for_symbol<V: DocumentView + ?Sized>(
    view: &V,
    group_id: ObjId,
    to_canonical: &Transform,
    data: &mut SymbolPresetData,
) -> Result<(), SymbolError> {
    let registry = view.type_registry();
    let contents = walk_group(view, group_id);

    for id in &contents.members {
        let Some(object) = view.object_by_id(*id) else {
            continue;
        };
        if !object.object_type.is_graph_element() {
            let mut member = object.clone();
            match member.object_type {
                ObjectType::Furniture => reposition(registry, &mut member, to_canonical)?,
                ObjectType::SurfaceGraph => {
                    let graph = view
                        .find_surface_graph(*id)
                        .ok_or(SymbolError::MissingSurfaceGraph(*id))?;
                    data.surface_graphs.insert(*id, graph.clone());
                }
                _ => {}
            }
            data.members.insert(*id, member);
        }
        data.equivalent_ids.insert(*id, BTreeSet::from([*id]));
    }

    let graph = view
        .find_volume_graph(group_id)
        .ok_or(SymbolError::MissingVolumeGraph(group_id))?;
    data.graphs.insert(group_id, in_frame(graph, to_canonical));

    for child in &contents.groups {
        let Some(object) = view.object_by_id(*child) else {
            continue;
        };
        let mut member = object.clone();
        reposition(registry, &mut member, to_canonical)?;
        data.members.insert(*child, member);
        data.equivalent_ids.insert(*child, BTreeSet::from([*child]));
        if object.assembly_guid.is_none() {
            create_preset_data_for_symbol(view, *child, to_canonical, data)?;
        }
    }
    Ok(())
}

fn in_frame(graph: &Graph3d, transform: &Transform) -> Graph3d {
    if transform.is_identity() {
        graph.clone()
    } else {
        graph.transformed(transform)
    }
}

/// Deltas that turn `group_id` into the first instance of a new Symbol.
///
/// The preset is named `Symbol N` with the smallest `N` not already used
/// (case-insensitively) under the Symbol tag path. The group keeps its content where it
/// is and its own placement is reset to the identity.
pub fn create_deltas_for_new_symbol<V: DocumentView + ?Sized>(
    view: &V,
    group_id: ObjId,
) -> Result<(Guid, Vec<Delta>), SymbolError> {
    if group_id == view.root_volume_graph_id() {
        return Err(SymbolError::RootGroup);
    }
    let group = view
        .object_by_id(group_id)
        .filter(|object| object.object_type == ObjectType::MetaGraph)
        .ok_or(SymbolError::NotAGroup(group_id))?;
    if group.assembly_guid.is_some() {
        return Err(SymbolError::AlreadySymbol(group_id));
    }

    let registry = view.type_registry();
    let presets = view.preset_collection();
    let taken: BTreeSet<String> = presets
        .presets_for_ncp(SYMBOL_NCP)
        .iter()
        .filter_map(|guid| presets.preset_from_guid(guid))
        .map(|preset| preset.display_name.to_lowercase())
        .collect();
    let mut number = 1u32;
    let name = loop {
        let candidate = format!("Symbol {number}");
        if !taken.contains(&candidate.to_lowercase()) {
            break candidate;
        }
        number += 1;
    };

    let mut data = SymbolPresetData {
        root_graph: group_id,
        ..SymbolPresetData::default()
    };
    create_preset_data_for_symbol(view, group_id, &Transform::IDENTITY, &mut data)?;
    data.anchor = data.compute_anchor();

    let guid = Guid::new_v4();
    let mut preset = Preset::new(guid, name, SYMBOL_NCP, ObjectType::MetaGraph);
    preset.set_custom_data(registry, &data)?;
    let create_preset = presets.make_create_new_delta(preset);

    let mut instance = group.clone();
    instance.assembly_guid = Some(guid);
    instance.set_placement(registry, &Transform::IDENTITY)?;
    let mut mark_instance = MoiDelta::new();
    mark_instance.add_mutation(group.clone(), instance);

    Ok((guid, vec![create_preset.into(), mark_instance.into()]))
}
