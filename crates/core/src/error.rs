//! Error types for state serialization.
//!
//! Codec and orchestration failures all surface as [`SerializeError`]. None of
//! them are recoverable within the operation that raised them: the top-level
//! entry points on [`crate::ComponentManager`] log the first failure and
//! return it unchanged.

use std::io;

use crate::types::{ComponentTypeId, EntityId};

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Errors raised while encoding, decoding or hashing simulation state.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// The scripting runtime refused an operation (pinning, property access).
    #[error("script engine error: {0}")]
    ScriptEngine(String),

    /// The value graph holds a kind that has no wire representation.
    #[error("cannot serialize script values of type '{0}'")]
    InvalidScriptValue(&'static str),

    /// Text could not be converted to or from UTF-8 (or ASCII where required).
    #[error("string contains characters that cannot be serialized")]
    InvalidCharInString,

    /// A persisted component type name has no registered counterpart.
    #[error("unrecognized component type '{0}'")]
    UnrecognizedComponentType(String),

    /// The stream ended before a complete value could be read.
    #[error("truncated data: needed {needed} bytes at offset {offset}")]
    TruncatedData { offset: u64, needed: usize },

    /// The stream continued after the last expected record.
    #[error("trailing data after offset {offset}")]
    TrailingData { offset: u64 },

    #[error("unknown script value tag {0}")]
    UnknownValueTag(u8),

    /// Objects and arrays nest deeper than [`crate::serialization::MAX_NESTING_DEPTH`].
    #[error("script values nest deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("backref tag {0} does not name a previously decoded object")]
    UndefinedBackref(u32),

    #[error("{name} = {value} is outside [{min}, {max}]")]
    NumberOutOfRange { name: String, value: i64, min: i64, max: i64 },

    #[error("{name} has length {len}, expected {min}..={max}")]
    StringTooLong { name: String, len: usize, min: usize, max: usize },

    #[error("entity {entity} already has a component of type {type_id}")]
    DuplicateComponent { entity: EntityId, type_id: ComponentTypeId },

    #[error("component type '{0}' is already registered")]
    DuplicateComponentType(String),

    #[error("component type {0} is not registered")]
    UnknownComponentTypeId(ComponentTypeId),

    #[error("invalid template parameter {name}: '{value}'")]
    InvalidTemplateParam { name: String, value: String },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the template resolver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template '{0}' does not exist")]
    NotFound(String),

    #[error("template '{0}' inherits from itself")]
    InheritanceLoop(String),

    #[error("template '{template}' inherits from missing template '{parent}'")]
    BrokenInheritance { template: String, parent: String },

    #[error("no template manager is registered on the system entity")]
    NoTemplateManager,
}
