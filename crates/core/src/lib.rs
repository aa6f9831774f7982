//! Deterministic (de)serialization of entity-component simulation state.

pub mod component;
pub mod components;
pub mod error;
pub mod manager;
pub mod params;
pub mod save_file;
pub mod script;
pub mod serialization;
pub mod snapshot;
pub mod templates;
pub mod types;

pub use component::{Component, ComponentFactory, ComponentRegistry, SimContext};
pub use components::{Position, Scripted, stock_registry};
pub use error::{SerializeError, SerializeResult, TemplateError};
pub use manager::ComponentManager;
pub use params::ParamNode;
pub use save_file::{SaveFile, SaveFileError, SaveHeader};
pub use script::{ObjectRef, ScriptContext, ScriptString, ScriptValue};
pub use serialization::{Deserializer, Serializer, StateHash};
pub use snapshot::{SnapshotError, StateSnapshot};
pub use templates::{TemplateCatalog, TemplateManager, TemplateResolver};
pub use types::*;
