//! The component capability and the registry of constructible types.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{SerializeError, SerializeResult};
use crate::params::ParamNode;
use crate::script::ScriptContext;
use crate::serialization::{Deserializer, Serializer};
use crate::templates::{TemplateCatalog, TemplateResolver};
use crate::types::{ComponentTypeId, validate_type_name};

/// Shared simulation context handed to components.
#[derive(Debug, Default)]
pub struct SimContext {
    script: ScriptContext,
    templates: Rc<TemplateCatalog>,
}

impl SimContext {
    pub fn new(script: ScriptContext, templates: TemplateCatalog) -> Self {
        Self { script, templates: Rc::new(templates) }
    }

    pub fn script(&self) -> &ScriptContext {
        &self.script
    }

    pub fn templates(&self) -> &Rc<TemplateCatalog> {
        &self.templates
    }
}

/// A piece of per-entity simulation state.
///
/// `serialize` and `deserialize` must agree on field order and bounds.
/// `deserialize` is called on a freshly constructed instance and receives the
/// same template parameters `init` would have seen, so template-only fields
/// need not be persisted.
pub trait Component: Any {
    fn init(&mut self, _context: &SimContext, _params: &ParamNode) -> SerializeResult<()> {
        Ok(())
    }

    fn serialize(&self, serializer: &mut dyn Serializer) -> SerializeResult<()>;

    fn deserialize(
        &mut self,
        context: &SimContext,
        params: &ParamNode,
        deserializer: &mut dyn Deserializer,
    ) -> SerializeResult<()>;

    fn as_template_resolver(&self) -> Option<&dyn TemplateResolver> {
        None
    }

    fn as_template_resolver_mut(&mut self) -> Option<&mut dyn TemplateResolver> {
        None
    }
}

pub type ComponentFactory = fn(&SimContext) -> Box<dyn Component>;

struct ComponentType {
    name: String,
    factory: ComponentFactory,
}

/// Name <-> id mapping plus a factory per registered component type.
/// Ids are handed out from 1 in registration order.
#[derive(Default)]
pub struct ComponentRegistry {
    types: BTreeMap<ComponentTypeId, ComponentType>,
    ids_by_name: BTreeMap<String, ComponentTypeId>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: ComponentFactory,
    ) -> SerializeResult<ComponentTypeId> {
        validate_type_name(name)?;
        if self.ids_by_name.contains_key(name) {
            return Err(SerializeError::DuplicateComponentType(name.to_string()));
        }
        let next = u32::try_from(self.types.len() + 1)
            .map_err(|_| SerializeError::DuplicateComponentType(name.to_string()))?;
        let id = ComponentTypeId(next);
        self.types.insert(id, ComponentType { name: name.to_string(), factory });
        self.ids_by_name.insert(name.to_string(), id);
        log::trace!("registered component type {name} as {id}");
        Ok(id)
    }

    pub fn lookup_id(&self, name: &str) -> Option<ComponentTypeId> {
        self.ids_by_name.get(name).copied()
    }

    pub fn lookup_name(&self, id: ComponentTypeId) -> Option<&str> {
        self.types.get(&id).map(|ty| ty.name.as_str())
    }

    pub fn construct(
        &self,
        id: ComponentTypeId,
        context: &SimContext,
    ) -> SerializeResult<Box<dyn Component>> {
        let ty = self.types.get(&id).ok_or(SerializeError::UnknownComponentTypeId(id))?;
        Ok((ty.factory)(context))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
