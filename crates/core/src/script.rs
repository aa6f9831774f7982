//! Value graph of the embedded scripting runtime, as seen by the codec.
//! This module exists to give the serializers a typed view of script state
//! (objects, arrays, primitives) plus the runtime's pinning API.
//! It does not evaluate scripts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{SerializeError, SerializeResult};

/// Smallest integer the runtime stores unboxed.
pub const SCRIPT_INT_MIN: i32 = -(1 << 30);
/// Largest integer the runtime stores unboxed.
pub const SCRIPT_INT_MAX: i32 = (1 << 30) - 1;

/// Runtime-native text (UTF-16 code units, possibly ill-formed).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ScriptString(Vec<u16>);

impl ScriptString {
    pub fn from_utf16(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    /// Fails with `InvalidCharInString` on unpaired surrogates.
    pub fn to_utf8(&self) -> SerializeResult<String> {
        String::from_utf16(&self.0).map_err(|_| SerializeError::InvalidCharInString)
    }
}

impl From<&str> for ScriptString {
    fn from(value: &str) -> Self {
        Self(value.encode_utf16().collect())
    }
}

impl fmt::Debug for ScriptString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf16_lossy(&self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Array,
}

#[derive(Clone, Debug)]
enum Property {
    Value(ScriptValue),
    Getter,
}

#[derive(Debug)]
struct ScriptObject {
    kind: ObjectKind,
    // Insertion order is the runtime's enumeration order.
    properties: Vec<(String, Property)>,
}

/// Address-based identity of a live object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectIdentity(usize);

/// Shared handle to a runtime object or array.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<ScriptObject>>);

impl ObjectRef {
    fn with_kind(kind: ObjectKind) -> Self {
        Self(Rc::new(RefCell::new(ScriptObject { kind, properties: Vec::new() })))
    }

    pub fn new_object() -> Self {
        Self::with_kind(ObjectKind::Plain)
    }

    pub fn new_array() -> Self {
        Self::with_kind(ObjectKind::Array)
    }

    pub fn from_values(values: impl IntoIterator<Item = ScriptValue>) -> Self {
        let array = Self::new_array();
        for value in values {
            array.push(value);
        }
        array
    }

    pub fn kind(&self) -> ObjectKind {
        self.0.borrow().kind
    }

    pub fn is_array(&self) -> bool {
        self.kind() == ObjectKind::Array
    }

    pub fn identity(&self) -> ObjectIdentity {
        ObjectIdentity(Rc::as_ptr(&self.0) as usize)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Sets a property. Existing properties keep their enumeration position.
    pub fn set(&self, name: impl Into<String>, value: ScriptValue) {
        self.put_property(name.into(), Property::Value(value));
    }

    /// Appends at the next positional index.
    pub fn push(&self, value: ScriptValue) {
        let index = self.len();
        self.set(index.to_string(), value);
    }

    /// Defines an accessor property. Accessors are visible to enumeration
    /// but cannot be read during serialization.
    pub fn define_getter(&self, name: impl Into<String>) {
        self.put_property(name.into(), Property::Getter);
    }

    fn put_property(&self, name: String, property: Property) {
        let mut object = self.0.borrow_mut();
        match object.properties.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = property,
            None => object.properties.push((name, property)),
        }
    }

    pub fn get(&self, name: &str) -> Option<ScriptValue> {
        self.0.borrow().properties.iter().find(|(existing, _)| existing == name).and_then(
            |(_, property)| match property {
                Property::Value(value) => Some(value.clone()),
                Property::Getter => None,
            },
        )
    }

    pub fn len(&self) -> usize {
        self.0.borrow().properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn property_names(&self) -> Vec<String> {
        self.0.borrow().properties.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Name and value of every property; `None` marks an accessor.
    pub(crate) fn entries(&self) -> Vec<(String, Option<ScriptValue>)> {
        self.0
            .borrow()
            .properties
            .iter()
            .map(|(name, property)| {
                let value = match property {
                    Property::Value(value) => Some(value.clone()),
                    Property::Getter => None,
                };
                (name.clone(), value)
            })
            .collect()
    }

    fn same_contents(&self, other: &ObjectRef) -> bool {
        let left = self.0.borrow();
        let right = other.0.borrow();
        left.kind == right.kind
            && left.properties.len() == right.properties.len()
            && left.properties.iter().zip(right.properties.iter()).all(|(a, b)| {
                a.0 == b.0
                    && match (&a.1, &b.1) {
                        (Property::Value(x), Property::Value(y)) => x == y,
                        (Property::Getter, Property::Getter) => true,
                        _ => false,
                    }
            })
    }
}

impl fmt::Debug for ObjectRef {
    // Shallow on purpose: graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let object = self.0.borrow();
        let names: Vec<&String> = object.properties.iter().map(|(name, _)| name).collect();
        write!(f, "{:?}{names:?}", object.kind)
    }
}

/// A value owned by the scripting runtime.
#[derive(Clone, Debug)]
pub enum ScriptValue {
    Void,
    Null,
    Bool(bool),
    Int(i32),
    Double(f64),
    String(ScriptString),
    Object(ObjectRef),
    Function(Rc<str>),
    Xml(Rc<str>),
}

impl ScriptValue {
    pub fn string(value: &str) -> Self {
        Self::String(ScriptString::from(value))
    }

    /// Stores `value` the way the runtime would: unboxed when it is an
    /// integer in the small-int range, boxed as a double otherwise.
    pub fn number(value: f64) -> Self {
        let is_small_int = value.fract() == 0.0
            && value >= f64::from(SCRIPT_INT_MIN)
            && value <= f64::from(SCRIPT_INT_MAX)
            && !(value == 0.0 && value.is_sign_negative());
        if is_small_int { Self::Int(value as i32) } else { Self::Double(value) }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Void => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Double(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Xml(_) => "xml",
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(f64::from(*value)),
            Self::Double(value) => Some(*value),
            _ => None,
        }
    }
}

/// Structural equality. Doubles compare bitwise, so `-0.0 != 0.0` and a NaN
/// equals the identical NaN. Objects short-circuit on identity; comparing
/// two distinct cyclic graphs does not terminate.
impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b) || a.same_contents(b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Xml(a), Self::Xml(b)) => a == b,
            _ => false,
        }
    }
}

/// Runtime services the codec relies on: enumeration, property reads, and
/// GC pins that keep objects alive and unmoved while they are traversed.
#[derive(Debug, Default)]
pub struct ScriptContext {
    roots: RefCell<HashMap<ObjectIdentity, usize>>,
    root_limit: Option<usize>,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of simultaneous pins; acquiring past the cap fails.
    pub fn with_root_limit(limit: usize) -> Self {
        Self { roots: RefCell::default(), root_limit: Some(limit) }
    }

    pub fn add_root(&self, object: &ObjectRef) -> SerializeResult<()> {
        if let Some(limit) = self.root_limit
            && self.rooted_count() >= limit
        {
            return Err(SerializeError::ScriptEngine(format!("root limit of {limit} exceeded")));
        }
        *self.roots.borrow_mut().entry(object.identity()).or_insert(0) += 1;
        Ok(())
    }

    pub fn remove_root(&self, object: &ObjectRef) -> SerializeResult<()> {
        let mut roots = self.roots.borrow_mut();
        let identity = object.identity();
        match roots.get_mut(&identity) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                roots.remove(&identity);
            }
            None => {
                return Err(SerializeError::ScriptEngine("removing an unrooted object".to_string()));
            }
        }
        Ok(())
    }

    /// Pins `object` until the returned guard is dropped.
    pub fn root(&self, object: &ObjectRef) -> SerializeResult<RootGuard<'_>> {
        self.add_root(object)?;
        Ok(RootGuard { context: self, object: object.clone() })
    }

    /// Total pins currently held.
    pub fn rooted_count(&self) -> usize {
        self.roots.borrow().values().sum()
    }

    pub fn is_rooted(&self, object: &ObjectRef) -> bool {
        self.roots.borrow().contains_key(&object.identity())
    }

    /// Property names in insertion order.
    pub fn enumerate(&self, object: &ObjectRef) -> SerializeResult<Vec<String>> {
        Ok(object.property_names())
    }

    pub fn get_property(&self, object: &ObjectRef, name: &str) -> SerializeResult<ScriptValue> {
        let inner = object.0.borrow();
        match inner.properties.iter().find(|(existing, _)| existing == name) {
            Some((_, Property::Value(value))) => Ok(value.clone()),
            Some((_, Property::Getter)) => {
                Err(SerializeError::ScriptEngine("cannot serialize property getters".to_string()))
            }
            None => Err(SerializeError::ScriptEngine(format!(
                "enumerated property '{name}' not found"
            ))),
        }
    }
}

/// Scoped pin on one object. Released on drop.
pub struct RootGuard<'a> {
    context: &'a ScriptContext,
    object: ObjectRef,
}

impl RootGuard<'_> {
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }
}

impl Drop for RootGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.context.remove_root(&self.object) {
            log::warn!("failed to release script root: {err}");
        }
    }
}
