use bimdelta::{
    config::{DirtyFlush, DocumentConfig},
    runtime::RuntimeConfig,
    state::{FfeData, MetaGraphData},
    wrapper::{StructDataWrapper, TypeRegistry, WrapperError},
};
use glam::DVec3;

#[test]
fn document_config_defaults_fill_missing_keys() {
    let config = DocumentConfig::from_toml_str(
        r#"
        local_user_id = "alice"
        dirty_flush = "manual"
        "#,
    )
    .expect("parse");

    assert_eq!(config.local_user_id, "alice");
    assert_eq!(config.dirty_flush, DirtyFlush::Manual);
    assert_eq!(config.max_undo_depth, DocumentConfig::default().max_undo_depth);
    assert_eq!(config.conflict_bounds_epsilon, 0.01);

    let empty = DocumentConfig::from_toml_str("").expect("parse empty");
    assert_eq!(empty, DocumentConfig::default());
    assert_eq!(empty.dirty_flush, DirtyFlush::EndOfTransaction);
}

#[test]
fn document_config_rejects_unknown_flush_mode() {
    assert!(DocumentConfig::from_toml_str(r#"dirty_flush = "sometimes""#).is_err());
}

#[test]
fn runtime_config_reads_from_toml() {
    let config: RuntimeConfig = toml::from_str(
        r#"
        batch_max_records = 8
        compact_after_snapshot = true
        "#,
    )
    .expect("parse");
    assert_eq!(config.batch_max_records, 8);
    assert!(config.compact_after_snapshot);
    assert!(config.flush_on_commit);
}

#[test]
fn wrapper_loads_only_the_stored_type() {
    let registry = TypeRegistry::with_builtin_types();
    let wrapper = StructDataWrapper::new(&registry, &FfeData::at(DVec3::new(1.0, 2.0, 3.0)))
        .expect("wrap");

    let chair: FfeData = wrapper.load().expect("load");
    assert_eq!(chair.location, DVec3::new(1.0, 2.0, 3.0));
    assert!(matches!(
        wrapper.load::<MetaGraphData>(),
        Err(WrapperError::TypeMismatch { .. })
    ));
    assert!(matches!(
        StructDataWrapper::default().load::<FfeData>(),
        Err(WrapperError::Invalid)
    ));
}

#[test]
fn wrapper_forms_convert_both_ways() {
    let registry = TypeRegistry::with_builtin_types();
    let mut wrapper = StructDataWrapper::new(&registry, &FfeData::at(DVec3::new(4.0, 0.0, 0.0)))
        .expect("wrap");
    assert!(wrapper.human_readable().is_none());
    wrapper.ensure_human_readable(&registry).expect("to json");
    let json = wrapper.human_readable().cloned().expect("json");

    let mut rebuilt = StructDataWrapper::from_human_readable(wrapper.struct_name(), json);
    rebuilt.ensure_binary(&registry).expect("to binary");
    assert_eq!(rebuilt, wrapper);
    assert_eq!(rebuilt.content_hash(), wrapper.content_hash());
}

#[test]
fn unregistered_names_do_not_resolve() {
    let registry = TypeRegistry::with_builtin_types();
    let mut wrapper = StructDataWrapper::from_human_readable("NoSuchType", serde_json::json!({}));
    assert!(matches!(
        wrapper.ensure_binary(&registry),
        Err(WrapperError::Unregistered(name)) if name == "NoSuchType"
    ));
    assert!(TypeRegistry::new().is_empty());
}

#[test]
fn wrapper_equality_ignores_cached_type_resolution() {
    let registry = TypeRegistry::with_builtin_types();
    let resolved = StructDataWrapper::new(&registry, &FfeData::at(DVec3::X)).expect("wrap");
    let json: StructDataWrapper =
        serde_json::from_value(serde_json::to_value(&resolved).expect("encode")).expect("decode");
    let mut reloaded = json.clone();
    reloaded.ensure_human_readable(&registry).expect("resolve");

    assert_eq!(resolved, json);
    assert_eq!(json, reloaded);
    assert_eq!(resolved, reloaded);

    let other = StructDataWrapper::new(&registry, &FfeData::at(DVec3::Y)).expect("wrap");
    assert_ne!(resolved, other);
}
