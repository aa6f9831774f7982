use simstate::params::ParamNode;
use simstate::templates::TemplateCatalog;
use simstate::{
    Component, ComponentManager, ComponentRegistry, Deserializer, EntityId, ObjectRef,
    SYSTEM_ENTITY, ScriptContext, ScriptValue, Scripted, SerializeError, SerializeResult,
    Serializer, SimContext, StateHash, TemplateManager, stock_registry,
};

/// Minimal two-field component used to pin down the wire layout.
#[derive(Debug, Default, PartialEq)]
struct Marker {
    x: f64,
    label: String,
}

impl Component for Marker {
    fn init(&mut self, _context: &SimContext, params: &ParamNode) -> SerializeResult<()> {
        self.x = params.parse_child("x")?.unwrap_or(0.0);
        self.label = params.child("label").map(|p| p.value().to_string()).unwrap_or_default();
        Ok(())
    }

    fn serialize(&self, serializer: &mut dyn Serializer) -> SerializeResult<()> {
        serializer.number_f64_unbounded("x", self.x)?;
        serializer.string("label", &self.label)
    }

    fn deserialize(
        &mut self,
        _context: &SimContext,
        _params: &ParamNode,
        deserializer: &mut dyn Deserializer,
    ) -> SerializeResult<()> {
        self.x = deserializer.number_f64_unbounded()?;
        self.label = deserializer.string()?;
        Ok(())
    }
}

fn marker_factory(_context: &SimContext) -> Box<dyn Component> {
    Box::new(Marker::default())
}

fn marker_manager() -> ComponentManager {
    let mut registry = ComponentRegistry::new();
    registry.register("Position", marker_factory).unwrap();
    ComponentManager::new(SimContext::default(), registry)
}

fn marker_params(x: &str, label: &str) -> ParamNode {
    ParamNode::new().with_child("x", ParamNode::leaf(x)).with_child("label", ParamNode::leaf(label))
}

fn serialize(manager: &ComponentManager) -> Vec<u8> {
    let mut bytes = Vec::new();
    manager.serialize_state(&mut bytes).unwrap();
    bytes
}

fn scripted_manager(catalog: TemplateCatalog) -> ComponentManager {
    ComponentManager::new(SimContext::new(ScriptContext::new(), catalog), stock_registry().unwrap())
}

#[test]
fn test_single_component_has_the_documented_wire_layout() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(2), ty, &marker_params("3.5", "east")).unwrap();

    let mut expected = vec![1, 0, 0, 0];
    expected.extend_from_slice(&[8, 0, 0, 0]);
    expected.extend_from_slice(b"Position");
    expected.extend_from_slice(&[1, 0, 0, 0]);
    expected.extend_from_slice(&[2, 0, 0, 0]);
    expected.extend_from_slice(&3.5f64.to_le_bytes());
    expected.extend_from_slice(&[4, 0, 0, 0]);
    expected.extend_from_slice(b"east");
    let bytes = serialize(&manager);
    assert_eq!(bytes, expected);

    let mut restored = marker_manager();
    restored.deserialize_state(bytes.as_slice()).unwrap();
    assert_eq!(restored.component_count(), 1);
    let marker = restored.query::<Marker>(EntityId(2), ty).unwrap();
    assert_eq!(marker, &Marker { x: 3.5, label: "east".to_string() });
}

#[test]
fn test_empty_state_is_a_zero_type_count() {
    let manager = marker_manager();
    assert_eq!(serialize(&manager), vec![0, 0, 0, 0]);

    let mut restored = marker_manager();
    restored.deserialize_state(&[0u8, 0, 0, 0][..]).unwrap();
    assert_eq!(restored.component_count(), 0);
}

#[test]
fn test_emptied_types_are_skipped() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(2), ty, &marker_params("1", "a")).unwrap();
    let empty_hash = marker_manager().compute_state_hash().unwrap();
    assert!(manager.destroy_component(EntityId(2), ty));

    assert_eq!(serialize(&manager), vec![0, 0, 0, 0]);
    assert_eq!(manager.compute_state_hash().unwrap(), empty_hash);
}

#[test]
fn test_round_trip_preserves_state_hash_and_bytes() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    for (entity, x, label) in [(9, "1.25", "north"), (2, "-4", "south"), (40, "0", "")] {
        manager.add_component(EntityId(entity), ty, &marker_params(x, label)).unwrap();
    }
    let bytes = serialize(&manager);

    let mut restored = marker_manager();
    restored.deserialize_state(bytes.as_slice()).unwrap();
    assert_eq!(restored.compute_state_hash().unwrap(), manager.compute_state_hash().unwrap());
    assert_eq!(serialize(&restored), bytes);
}

#[test]
fn test_entities_are_written_in_ascending_order() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(300), ty, &marker_params("0", "")).unwrap();
    manager.add_component(EntityId(3), ty, &marker_params("0", "")).unwrap();

    let bytes = serialize(&manager);
    // type count, name, component count, then the first entity id
    assert_eq!(&bytes[20..24], &[3, 0, 0, 0]);
}

#[test]
fn test_hash_tracks_entity_ids_and_field_values() {
    let build = |entity: u32, x: &str| {
        let mut manager = marker_manager();
        let ty = manager.lookup_type_id("Position").unwrap();
        manager.add_component(EntityId(entity), ty, &marker_params(x, "east")).unwrap();
        manager.compute_state_hash().unwrap()
    };
    let base = build(2, "3.5");
    assert_eq!(base, build(2, "3.5"));
    assert_ne!(base, build(3, "3.5"));
    assert_ne!(base, build(2, "3.25"));
}

#[test]
fn test_hash_is_keyed_by_type_id_not_name() {
    let mut first = ComponentRegistry::new();
    first.register("Position", marker_factory).unwrap();
    let mut second = ComponentRegistry::new();
    second.register("Other", marker_factory).unwrap();
    second.register("Position", marker_factory).unwrap();

    let hash_with = |registry: ComponentRegistry| -> StateHash {
        let mut manager = ComponentManager::new(SimContext::default(), registry);
        let ty = manager.lookup_type_id("Position").unwrap();
        manager.add_component(EntityId(2), ty, &marker_params("1", "x")).unwrap();
        manager.compute_state_hash().unwrap()
    };
    assert_ne!(hash_with(first), hash_with(second));
}

#[test]
fn test_unknown_component_type_fails_and_leaves_no_components() {
    let mut bytes = vec![1, 0, 0, 0, 5, 0, 0, 0];
    bytes.extend_from_slice(b"Ghost");
    bytes.extend_from_slice(&[0, 0, 0, 0]);

    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(2), ty, &marker_params("1", "x")).unwrap();
    let result = manager.deserialize_state(bytes.as_slice());
    assert!(matches!(
        result,
        Err(SerializeError::UnrecognizedComponentType(name)) if name == "Ghost"
    ));
    assert_eq!(manager.component_count(), 0);
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(2), ty, &marker_params("3.5", "east")).unwrap();
    let mut bytes = serialize(&manager);
    let len = bytes.len() as u64;
    bytes.push(0);

    let mut restored = marker_manager();
    let result = restored.deserialize_state(bytes.as_slice());
    assert!(matches!(result, Err(SerializeError::TrailingData { offset }) if offset == len));
    assert_eq!(restored.component_count(), 0);
}

#[test]
fn test_truncated_state_is_rejected_at_every_cut() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(2), ty, &marker_params("3.5", "east")).unwrap();
    let bytes = serialize(&manager);

    for cut in 0..bytes.len() {
        let mut restored = marker_manager();
        let result = restored.deserialize_state(&bytes[..cut]);
        assert!(
            matches!(result, Err(SerializeError::TruncatedData { .. })),
            "cut at {cut}: {result:?}"
        );
        assert_eq!(restored.component_count(), 0);
    }
}

#[test]
fn test_duplicate_entity_in_stream_is_rejected() {
    let mut bytes = vec![1, 0, 0, 0, 8, 0, 0, 0];
    bytes.extend_from_slice(b"Position");
    bytes.extend_from_slice(&[2, 0, 0, 0]);
    for _ in 0..2 {
        bytes.extend_from_slice(&[2, 0, 0, 0]);
        bytes.extend_from_slice(&0.0f64.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
    }

    let mut manager = marker_manager();
    let result = manager.deserialize_state(bytes.as_slice());
    assert!(matches!(result, Err(SerializeError::DuplicateComponent { entity: EntityId(2), .. })));
    assert_eq!(manager.component_count(), 0);
}

#[test]
fn test_debug_dump_groups_components_by_entity() {
    let mut manager = marker_manager();
    let ty = manager.lookup_type_id("Position").unwrap();
    manager.add_component(EntityId(7), ty, &marker_params("1", "b")).unwrap();
    manager.add_component(EntityId(2), ty, &marker_params("3.5", "east")).unwrap();

    let mut out = Vec::new();
    manager.dump_debug_state(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(
        text,
        "- id: 2\n  Position:\n    x: 3.5\n    label: \"east\"\n\n\
         - id: 7\n  Position:\n    x: 1.0\n    label: \"b\"\n\n"
    );
}

#[test]
fn test_template_only_fields_come_back_from_the_template() {
    let catalog = TemplateCatalog::from_json_str(
        r#"{
            "unit": { "params": { "Position": { "altitude": 7.5 } } },
            "unit/scout": { "parent": "unit", "params": { "Position": { "x": 4, "z": 2 } } }
        }"#,
    )
    .unwrap();
    let mut manager = scripted_manager(catalog.clone());
    let template_manager = manager.lookup_type_id("TemplateManager").unwrap();
    manager.add_component(SYSTEM_ENTITY, template_manager, &ParamNode::new()).unwrap();
    manager.add_entity("unit/scout", EntityId(10)).unwrap();

    let position = manager.lookup_type_id("Position").unwrap();
    let original = manager.query::<simstate::Position>(EntityId(10), position).unwrap();
    assert_eq!(original.altitude(), 7.5);

    let bytes = serialize(&manager);
    let mut restored = scripted_manager(catalog);
    restored.deserialize_state(bytes.as_slice()).unwrap();
    let loaded = restored.query::<simstate::Position>(EntityId(10), position).unwrap();
    assert_eq!(loaded.position(), Some((4.0, 2.0)));
    assert_eq!(loaded.altitude(), 7.5);
    assert_eq!(restored.entity_components(EntityId(10)), vec![position]);
    assert_eq!(restored.compute_state_hash().unwrap(), manager.compute_state_hash().unwrap());
}

#[test]
fn test_add_entity_requires_a_template_manager() {
    let mut manager = scripted_manager(TemplateCatalog::new());
    let result = manager.add_entity("anything", EntityId(3));
    assert!(matches!(result, Err(SerializeError::Template(_))));
}

#[test]
fn test_failed_add_entity_leaves_the_entity_untouched() {
    let catalog = TemplateCatalog::from_json_str(
        r#"{
            "unit": { "params": { "Position": { "x": 1, "z": 2 }, "Scripted": { "hp": 5 } } },
            "odd": { "params": { "Position": { "x": 1 }, "Wings": {} } }
        }"#,
    )
    .unwrap();
    let mut manager = scripted_manager(catalog);
    let template_manager = manager.lookup_type_id("TemplateManager").unwrap();
    manager.add_component(SYSTEM_ENTITY, template_manager, &ParamNode::new()).unwrap();
    let scripted = manager.lookup_type_id("Scripted").unwrap();
    manager.add_component(EntityId(10), scripted, &ParamNode::new()).unwrap();

    match manager.add_entity("unit", EntityId(10)) {
        Err(SerializeError::DuplicateComponent { entity, type_id }) => {
            assert_eq!((entity, type_id), (EntityId(10), scripted));
        }
        other => panic!("expected a duplicate component, got {other:?}"),
    }
    match manager.add_entity("odd", EntityId(11)) {
        Err(SerializeError::UnrecognizedComponentType(name)) => assert_eq!(name, "Wings"),
        other => panic!("expected an unrecognized type, got {other:?}"),
    }

    assert_eq!(manager.entity_components(EntityId(10)), vec![scripted]);
    assert!(manager.entity_components(EntityId(11)).is_empty());
    let templates = manager.query::<TemplateManager>(SYSTEM_ENTITY, template_manager).unwrap();
    assert_eq!(templates.latest_template_name(EntityId(10)), None);
    assert_eq!(templates.latest_template_name(EntityId(11)), None);
}

#[test]
fn test_shared_script_objects_survive_across_components() {
    let mut manager = scripted_manager(TemplateCatalog::new());
    let scripted = manager.lookup_type_id("Scripted").unwrap();
    manager.add_component(EntityId(2), scripted, &ParamNode::new()).unwrap();
    manager.add_component(EntityId(3), scripted, &ParamNode::new()).unwrap();

    let shared = ObjectRef::new_object();
    shared.set("hp", ScriptValue::Int(40));
    for entity in [EntityId(2), EntityId(3)] {
        let component = manager.query_mut::<Scripted>(entity, scripted).unwrap();
        let holder = ObjectRef::new_object();
        holder.set("target", ScriptValue::Object(shared.clone()));
        component.set_state(ScriptValue::Object(holder));
    }

    let bytes = serialize(&manager);
    let mut restored = scripted_manager(TemplateCatalog::new());
    restored.deserialize_state(bytes.as_slice()).unwrap();

    let target = |entity| {
        let component = restored.query::<Scripted>(entity, scripted).unwrap();
        let holder = component.state().as_object().unwrap().clone();
        match holder.get("target") {
            Some(ScriptValue::Object(object)) => object,
            other => panic!("unexpected target {other:?}"),
        }
    };
    let (a, b) = (target(EntityId(2)), target(EntityId(3)));
    assert!(a.ptr_eq(&b));
    assert_eq!(a.get("hp"), Some(ScriptValue::Int(40)));
    assert_eq!(restored.context().script().rooted_count(), 0);
}

#[test]
fn test_unserializable_script_state_fails_the_whole_save() {
    let mut manager = scripted_manager(TemplateCatalog::new());
    let scripted = manager.lookup_type_id("Scripted").unwrap();
    manager.add_component(EntityId(2), scripted, &ParamNode::new()).unwrap();
    let holder = ObjectRef::new_object();
    holder.set("callback", ScriptValue::Function("onTick".into()));
    let component = manager.query_mut::<Scripted>(EntityId(2), scripted).unwrap();
    component.set_state(ScriptValue::Object(holder));

    let mut bytes = Vec::new();
    let result = manager.serialize_state(&mut bytes);
    assert!(matches!(result, Err(SerializeError::InvalidScriptValue("function"))));
    assert!(manager.compute_state_hash().is_err());
    assert_eq!(manager.context().script().rooted_count(), 0);
}
