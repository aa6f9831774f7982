//! Component storage and whole-state persistence.
//!
//! Components live in a type-major table: type id -> entity id -> instance.
//! Both levels are ordered maps, so every traversal below visits types and
//! entities in ascending id order and the produced bytes are deterministic.
//!
//! Stream layout written by [`ComponentManager::serialize_state`]:
//! - `u32` number of non-empty component types
//! - per type: ASCII type name (0..=255 bytes), `u32` component count
//! - per component: `u32` entity id, then the component's own fields
//!
//! Type names rather than ids are persisted so that saves survive changes to
//! registration order.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use crate::component::{Component, ComponentRegistry, SimContext};
use crate::error::{SerializeError, SerializeResult, TemplateError};
use crate::params::ParamNode;
use crate::serialization::{
    DebugSerializer, Deserializer, HashSerializer, Serializer, StateHash, StreamDeserializer,
    StreamSerializer,
};
use crate::templates::TemplateResolver;
use crate::types::{ComponentTypeId, EntityId, MAX_TYPE_NAME_LEN, SYSTEM_ENTITY};

type ComponentTable = BTreeMap<ComponentTypeId, BTreeMap<EntityId, Box<dyn Component>>>;

pub struct ComponentManager {
    context: SimContext,
    registry: ComponentRegistry,
    components: ComponentTable,
    /// Type of the system-entity component acting as template resolver.
    template_manager: Option<ComponentTypeId>,
}

impl ComponentManager {
    pub fn new(context: SimContext, registry: ComponentRegistry) -> Self {
        Self { context, registry, components: BTreeMap::new(), template_manager: None }
    }

    pub fn context(&self) -> &SimContext {
        &self.context
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn lookup_type_id(&self, name: &str) -> Option<ComponentTypeId> {
        self.registry.lookup_id(name)
    }

    pub fn lookup_type_name(&self, id: ComponentTypeId) -> Option<&str> {
        self.registry.lookup_name(id)
    }

    // -----------------------------------------------------------------------
    // Construction and queries
    // -----------------------------------------------------------------------

    /// Constructs a component of type `type_id`, initialises it from `params`
    /// and attaches it to `entity`.
    pub fn add_component(
        &mut self,
        entity: EntityId,
        type_id: ComponentTypeId,
        params: &ParamNode,
    ) -> SerializeResult<()> {
        if self.has_component(entity, type_id) {
            return Err(SerializeError::DuplicateComponent { entity, type_id });
        }
        let mut component = self.registry.construct(type_id, &self.context)?;
        component.init(&self.context, params)?;
        self.insert_component(entity, type_id, component)
    }

    /// Loads `template` through the system template manager and adds one
    /// component per top-level template child. Every child must name a
    /// registered type the entity does not already hold.
    ///
    /// All components are built and initialised before any is attached, so on
    /// failure the entity and its recorded template are left untouched.
    pub fn add_entity(&mut self, template: &str, entity: EntityId) -> SerializeResult<EntityId> {
        let resolver = self.template_resolver_mut().ok_or(TemplateError::NoTemplateManager)?;
        let params = resolver.resolve_template(template)?;

        let mut staged = Vec::new();
        for (name, subtree) in params.children() {
            let type_id = self
                .registry
                .lookup_id(name)
                .ok_or_else(|| SerializeError::UnrecognizedComponentType(name.to_string()))?;
            if self.has_component(entity, type_id) {
                return Err(SerializeError::DuplicateComponent { entity, type_id });
            }
            let mut component = self.registry.construct(type_id, &self.context)?;
            component.init(&self.context, subtree)?;
            staged.push((type_id, component));
        }

        let resolver = self.template_resolver_mut().ok_or(TemplateError::NoTemplateManager)?;
        resolver.load_template(entity, template)?;
        for (type_id, component) in staged {
            self.insert_component(entity, type_id, component)?;
        }
        log::debug!("added entity {entity} from template '{template}'");
        Ok(entity)
    }

    pub fn has_component(&self, entity: EntityId, type_id: ComponentTypeId) -> bool {
        self.components.get(&type_id).is_some_and(|by_entity| by_entity.contains_key(&entity))
    }

    pub fn query_component(
        &self,
        entity: EntityId,
        type_id: ComponentTypeId,
    ) -> Option<&dyn Component> {
        self.components.get(&type_id)?.get(&entity).map(|component| component.as_ref())
    }

    /// Typed lookup; `None` if absent or of a different concrete type.
    pub fn query<T: Component>(&self, entity: EntityId, type_id: ComponentTypeId) -> Option<&T> {
        let component: &dyn Any = self.query_component(entity, type_id)?;
        component.downcast_ref::<T>()
    }

    pub fn query_mut<T: Component>(
        &mut self,
        entity: EntityId,
        type_id: ComponentTypeId,
    ) -> Option<&mut T> {
        let component: &mut dyn Any =
            self.components.get_mut(&type_id)?.get_mut(&entity)?.as_mut();
        component.downcast_mut::<T>()
    }

    /// Types attached to `entity`, in ascending type id order.
    pub fn entity_components(&self, entity: EntityId) -> Vec<ComponentTypeId> {
        self.components
            .iter()
            .filter(|(_, by_entity)| by_entity.contains_key(&entity))
            .map(|(type_id, _)| *type_id)
            .collect()
    }

    pub fn component_count(&self) -> usize {
        self.components.values().map(BTreeMap::len).sum()
    }

    /// Detaches one component. The type's (possibly now empty) entity map is
    /// kept; empty types are skipped when hashing or serializing.
    pub fn destroy_component(&mut self, entity: EntityId, type_id: ComponentTypeId) -> bool {
        let removed = self
            .components
            .get_mut(&type_id)
            .and_then(|by_entity| by_entity.remove(&entity))
            .is_some();
        if removed && entity == SYSTEM_ENTITY && self.template_manager == Some(type_id) {
            self.template_manager = None;
        }
        removed
    }

    pub fn destroy_all_components(&mut self) {
        self.components.clear();
        self.template_manager = None;
    }

    fn insert_component(
        &mut self,
        entity: EntityId,
        type_id: ComponentTypeId,
        component: Box<dyn Component>,
    ) -> SerializeResult<()> {
        let is_resolver = component.as_template_resolver().is_some();
        let by_entity = self.components.entry(type_id).or_default();
        if by_entity.contains_key(&entity) {
            return Err(SerializeError::DuplicateComponent { entity, type_id });
        }
        by_entity.insert(entity, component);
        if entity == SYSTEM_ENTITY && is_resolver {
            self.template_manager = Some(type_id);
        }
        Ok(())
    }

    fn template_resolver(&self) -> Option<&dyn TemplateResolver> {
        let type_id = self.template_manager?;
        self.query_component(SYSTEM_ENTITY, type_id)?.as_template_resolver()
    }

    fn template_resolver_mut(&mut self) -> Option<&mut dyn TemplateResolver> {
        let type_id = self.template_manager?;
        self.components
            .get_mut(&type_id)?
            .get_mut(&SYSTEM_ENTITY)?
            .as_template_resolver_mut()
    }

    /// Subtree of `entity`'s latest template for component type `name`.
    fn template_params(&self, entity: EntityId, name: &str) -> Option<ParamNode> {
        let template = self.template_resolver()?.load_latest_template(entity)?;
        template.child(name).cloned()
    }

    fn type_name(&self, type_id: ComponentTypeId) -> SerializeResult<&str> {
        self.registry.lookup_name(type_id).ok_or(SerializeError::UnknownComponentTypeId(type_id))
    }

    // -----------------------------------------------------------------------
    // State persistence
    // -----------------------------------------------------------------------

    /// Writes every live component, grouped by entity, as indented text.
    pub fn dump_debug_state<W: Write>(&self, out: W) -> SerializeResult<()> {
        self.write_debug_state(out)
            .inspect_err(|err| log::error!("failed to dump debug state: {err}"))
    }

    fn write_debug_state<W: Write>(&self, out: W) -> SerializeResult<()> {
        let mut by_entity: BTreeMap<EntityId, BTreeMap<ComponentTypeId, &dyn Component>> =
            BTreeMap::new();
        for (type_id, components) in &self.components {
            for (entity, component) in components {
                by_entity.entry(*entity).or_default().insert(*type_id, component.as_ref());
            }
        }

        let mut serializer = DebugSerializer::new(self.context.script(), out);
        for (entity, components) in &by_entity {
            serializer.text_line(&format!("- id: {entity}"))?;
            for (type_id, component) in components {
                serializer.text_line(&format!("  {}:", self.type_name(*type_id)?))?;
                serializer.indent(4);
                component.serialize(&mut serializer)?;
                serializer.dedent(4);
            }
            serializer.text_line("")?;
        }
        serializer.into_inner().flush()?;
        Ok(())
    }

    /// SHA-256 digest of the binary encoding of all live components, keyed
    /// by type id rather than name.
    pub fn compute_state_hash(&self) -> SerializeResult<StateHash> {
        self.hash_state().inspect_err(|err| log::error!("failed to compute state hash: {err}"))
    }

    fn hash_state(&self) -> SerializeResult<StateHash> {
        let mut serializer = HashSerializer::new(self.context.script());
        for (type_id, components) in &self.components {
            if components.is_empty() {
                continue;
            }
            let raw_id = i32::try_from(type_id.0).map_err(|_| SerializeError::NumberOutOfRange {
                name: "component type id".to_string(),
                value: i64::from(type_id.0),
                min: i64::from(i32::MIN),
                max: i64::from(i32::MAX),
            })?;
            serializer.number_i32_unbounded("component type id", raw_id)?;
            for (entity, component) in components {
                serializer.number_u32_unbounded("entity id", entity.0)?;
                component.serialize(&mut serializer)?;
            }
        }
        Ok(serializer.compute_hash())
    }

    /// Writes the full component state to `out` in the stream layout above.
    pub fn serialize_state<W: Write>(&self, out: W) -> SerializeResult<()> {
        self.write_state(out).inspect_err(|err| log::error!("failed to serialize state: {err}"))
    }

    fn write_state<W: Write>(&self, out: W) -> SerializeResult<()> {
        let live: Vec<_> =
            self.components.iter().filter(|(_, components)| !components.is_empty()).collect();

        let mut serializer = StreamSerializer::new(self.context.script(), out);
        serializer.number_u32_unbounded("num component types", count_u32(live.len())?)?;
        for (type_id, components) in live {
            let name = self.type_name(*type_id)?;
            serializer.string_ascii("name", name, 0, MAX_TYPE_NAME_LEN)?;
            serializer.number_u32_unbounded("num components", count_u32(components.len())?)?;
            log::trace!("serializing {} components of type {name}", components.len());
            for (entity, component) in components {
                serializer.number_u32_unbounded("entity id", entity.0)?;
                component.serialize(&mut serializer)?;
            }
        }
        let written = serializer.bytes_written();
        serializer.finish()?;
        log::debug!("serialized {} components in {written} bytes", self.component_count());
        Ok(())
    }

    /// Replaces all components with the state read from `input`.
    ///
    /// The input must be consumed exactly. On any failure the table is left
    /// empty.
    pub fn deserialize_state<R: BufRead>(&mut self, input: R) -> SerializeResult<()> {
        self.destroy_all_components();
        let mut deserializer = StreamDeserializer::new(input);
        let result = self.read_state(&mut deserializer);
        if let Err(err) = &result {
            log::error!("failed to deserialize state at offset {}: {err}", deserializer.offset());
            self.destroy_all_components();
        }
        result
    }

    fn read_state<R: BufRead>(
        &mut self,
        deserializer: &mut StreamDeserializer<R>,
    ) -> SerializeResult<()> {
        let num_types = deserializer.number_u32_unbounded()?;
        log::debug!("deserializing {num_types} component types");
        for _ in 0..num_types {
            let name = deserializer.string_ascii(0, MAX_TYPE_NAME_LEN)?;
            let Some(type_id) = self.registry.lookup_id(&name) else {
                return Err(SerializeError::UnrecognizedComponentType(name));
            };
            let count = deserializer.number_u32_unbounded()?;
            log::trace!("deserializing {count} components of type {name}");
            for _ in 0..count {
                let entity = EntityId(deserializer.number_u32_unbounded()?);
                let mut component = self.registry.construct(type_id, &self.context)?;
                let params = if entity == SYSTEM_ENTITY {
                    None
                } else {
                    self.template_params(entity, &name)
                };
                let params = params.unwrap_or_default();
                component.deserialize(&self.context, &params, deserializer)?;
                self.insert_component(entity, type_id, component)?;
            }
        }

        if !deserializer.is_exhausted()? {
            return Err(SerializeError::TrailingData { offset: deserializer.offset() });
        }
        Ok(())
    }
}

fn count_u32(len: usize) -> SerializeResult<u32> {
    u32::try_from(len).map_err(|_| SerializeError::NumberOutOfRange {
        name: "count".to_string(),
        value: i64::try_from(len).unwrap_or(i64::MAX),
        min: 0,
        max: i64::from(u32::MAX),
    })
}
