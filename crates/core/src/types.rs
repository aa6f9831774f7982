use std::fmt;

use crate::error::{SerializeError, SerializeResult};

/// Longest persisted component type name, in bytes.
pub const MAX_TYPE_NAME_LEN: usize = 255;

/// Opaque entity identifier. Ordering is the canonical iteration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u32);

/// Never assigned to a live entity.
pub const INVALID_ENTITY: EntityId = EntityId(0);

/// Owner of global singletons such as the template manager.
pub const SYSTEM_ENTITY: EntityId = EntityId(1);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-local component kind. Assigned at registration, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeId(pub u32);

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Checks that `name` can be persisted as a component type name.
pub fn validate_type_name(name: &str) -> SerializeResult<()> {
    if name.is_empty() || name.len() > MAX_TYPE_NAME_LEN {
        return Err(SerializeError::StringTooLong {
            name: "component type name".to_string(),
            len: name.len(),
            min: 1,
            max: MAX_TYPE_NAME_LEN,
        });
    }
    if !name.is_ascii() {
        return Err(SerializeError::InvalidCharInString);
    }
    Ok(())
}
