//! Entity templates: a catalog of raw definitions with single inheritance,
//! and the system component that resolves and remembers them per entity.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;

use crate::component::{Component, SimContext};
use crate::error::{SerializeError, SerializeResult, TemplateError};
use crate::params::ParamNode;
use crate::serialization::{Deserializer, Serializer};
use crate::types::EntityId;

pub const TEMPLATE_MANAGER_TYPE: &str = "TemplateManager";

#[derive(Deserialize)]
struct TemplateDef {
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RawTemplate {
    parent: Option<String>,
    params: ParamNode,
}

/// Unmerged template definitions keyed by name.
#[derive(Clone, Debug, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, RawTemplate>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{ "name": { "parent": "...", "params": { ... } }, ... }`.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let defs: BTreeMap<String, TemplateDef> = serde_json::from_str(text)?;
        let templates = defs
            .into_iter()
            .map(|(name, def)| {
                let params = ParamNode::from_json(&def.params);
                (name, RawTemplate { parent: def.parent, params })
            })
            .collect();
        Ok(Self { templates })
    }

    pub fn load(path: &Path) -> SerializeResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|err| SerializeError::Io(io::Error::from(err)))
    }

    pub fn insert(&mut self, name: impl Into<String>, parent: Option<&str>, params: ParamNode) {
        let raw = RawTemplate { parent: parent.map(str::to_string), params };
        self.templates.insert(name.into(), raw);
    }

    /// Merges the parent chain of `name`, root ancestor first.
    pub fn resolve(&self, name: &str) -> Result<ParamNode, TemplateError> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut child: Option<&str> = None;
        let mut current = name;
        loop {
            if !seen.insert(current) {
                return Err(TemplateError::InheritanceLoop(name.to_string()));
            }
            let Some(raw) = self.templates.get(current) else {
                return Err(match child {
                    None => TemplateError::NotFound(name.to_string()),
                    Some(child) => TemplateError::BrokenInheritance {
                        template: child.to_string(),
                        parent: current.to_string(),
                    },
                });
            };
            chain.push(&raw.params);
            match raw.parent.as_deref() {
                Some(parent) => {
                    child = Some(current);
                    current = parent;
                }
                None => break,
            }
        }

        let mut merged = ParamNode::new();
        for params in chain.iter().rev() {
            merged.merge(params);
        }
        Ok(merged)
    }
}

/// Resolves templates for entities and remembers which one each entity
/// was built from.
pub trait TemplateResolver {
    /// The merged tree for `name`, without recording it against an entity.
    fn resolve_template(&mut self, name: &str) -> Result<Rc<ParamNode>, TemplateError>;

    /// Resolves `name` and remembers it as the latest template of `entity`.
    fn load_template(
        &mut self,
        entity: EntityId,
        name: &str,
    ) -> Result<Rc<ParamNode>, TemplateError>;

    /// The merged template most recently loaded for `entity`.
    fn load_latest_template(&self, entity: EntityId) -> Option<Rc<ParamNode>>;
}

/// System component owning the template cache. Its persisted state is the
/// entity -> template name map; merged trees are rebuilt from the catalog.
pub struct TemplateManager {
    catalog: Rc<TemplateCatalog>,
    cache: BTreeMap<String, Rc<ParamNode>>,
    latest: BTreeMap<EntityId, String>,
}

impl TemplateManager {
    pub fn new(catalog: Rc<TemplateCatalog>) -> Self {
        Self { catalog, cache: BTreeMap::new(), latest: BTreeMap::new() }
    }

    pub fn factory(context: &SimContext) -> Box<dyn Component> {
        Box::new(Self::new(Rc::clone(context.templates())))
    }

    pub fn latest_template_name(&self, entity: EntityId) -> Option<&str> {
        self.latest.get(&entity).map(String::as_str)
    }
}

impl TemplateResolver for TemplateManager {
    fn resolve_template(&mut self, name: &str) -> Result<Rc<ParamNode>, TemplateError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Rc::clone(cached));
        }
        let merged = Rc::new(self.catalog.resolve(name)?);
        self.cache.insert(name.to_string(), Rc::clone(&merged));
        Ok(merged)
    }

    fn load_template(
        &mut self,
        entity: EntityId,
        name: &str,
    ) -> Result<Rc<ParamNode>, TemplateError> {
        let template = self.resolve_template(name)?;
        self.latest.insert(entity, name.to_string());
        Ok(template)
    }

    fn load_latest_template(&self, entity: EntityId) -> Option<Rc<ParamNode>> {
        let name = self.latest.get(&entity)?;
        self.cache.get(name).cloned()
    }
}

impl Component for TemplateManager {
    fn serialize(&self, serializer: &mut dyn Serializer) -> SerializeResult<()> {
        let count = u32::try_from(self.latest.len()).map_err(|_| {
            SerializeError::ScriptEngine("too many template entries".to_string())
        })?;
        serializer.number_u32_unbounded("num entities", count)?;
        for (entity, name) in &self.latest {
            serializer.number_u32_unbounded("id", entity.0)?;
            serializer.string("template", name)?;
        }
        Ok(())
    }

    fn deserialize(
        &mut self,
        context: &SimContext,
        _params: &ParamNode,
        deserializer: &mut dyn Deserializer,
    ) -> SerializeResult<()> {
        self.catalog = Rc::clone(context.templates());
        self.cache.clear();
        self.latest.clear();
        let count = deserializer.number_u32_unbounded()?;
        for _ in 0..count {
            let entity = EntityId(deserializer.number_u32_unbounded()?);
            let name = deserializer.string()?;
            self.load_template(entity, &name)?;
        }
        Ok(())
    }

    fn as_template_resolver(&self) -> Option<&dyn TemplateResolver> {
        Some(self)
    }

    fn as_template_resolver_mut(&mut self) -> Option<&mut dyn TemplateResolver> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::from_json_str(
            r#"{
                "basic": { "params": { "x": 12345 } },
                "inherit1": { "params": { "x": { "a": "a1", "b": "b1", "d": "d1" } } },
                "inherit2": { "parent": "inherit1", "params": { "x": { "a": "a2", "d": "d2", "g": "g2" } } },
                "inherit-loop": { "parent": "inherit-loop", "params": {} },
                "inherit-broken": { "parent": "nowhere", "params": {} }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_parent_chain_with_child_overrides() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("basic").unwrap().to_xml(), "<x>12345</x>");
        assert_eq!(
            catalog.resolve("inherit2").unwrap().to_xml(),
            "<x><a>a2</a><b>b1</b><d>d2</d><g>g2</g></x>"
        );
        assert_eq!(
            catalog.resolve("inherit1").unwrap().to_xml(),
            "<x><a>a1</a><b>b1</b><d>d1</d></x>"
        );
    }

    #[test]
    fn reports_missing_looping_and_broken_templates() {
        let catalog = catalog();
        assert_eq!(
            catalog.resolve("nonexistent"),
            Err(TemplateError::NotFound("nonexistent".to_string()))
        );
        assert_eq!(
            catalog.resolve("inherit-loop"),
            Err(TemplateError::InheritanceLoop("inherit-loop".to_string()))
        );
        assert_eq!(
            catalog.resolve("inherit-broken"),
            Err(TemplateError::BrokenInheritance {
                template: "inherit-broken".to_string(),
                parent: "nowhere".to_string(),
            })
        );
    }

    #[test]
    fn manager_caches_merged_templates_and_tracks_latest() {
        let mut manager = TemplateManager::new(Rc::new(catalog()));
        let first = manager.load_template(EntityId(2), "basic").unwrap();
        let second = manager.load_template(EntityId(3), "basic").unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        manager.load_template(EntityId(2), "inherit2").unwrap();
        assert_eq!(manager.latest_template_name(EntityId(2)), Some("inherit2"));
        assert!(manager.load_template(EntityId(2), "inherit-loop").is_err());
        assert!(manager.load_template(EntityId(2), "inherit-loop").is_err());
        assert_eq!(manager.latest_template_name(EntityId(2)), Some("inherit2"));
        assert!(manager.load_latest_template(EntityId(9)).is_none());
    }
}
