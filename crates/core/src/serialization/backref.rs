use std::collections::HashMap;

use crate::error::SerializeResult;
use crate::script::{ObjectIdentity, ObjectRef, RootGuard, ScriptContext};

/// Tags objects in first-sighting order (1, 2, 3, ...) for one encode.
///
/// Every registered object stays pinned until the table is cleared or
/// dropped, so identities cannot be reused mid-operation.
pub struct BackrefTable<'a> {
    script: &'a ScriptContext,
    tags: HashMap<ObjectIdentity, u32>,
    pins: Vec<RootGuard<'a>>,
}

impl<'a> BackrefTable<'a> {
    pub fn new(script: &'a ScriptContext) -> Self {
        Self { script, tags: HashMap::new(), pins: Vec::new() }
    }

    pub fn tag_of(&self, object: &ObjectRef) -> Option<u32> {
        self.tags.get(&object.identity()).copied()
    }

    /// Assigns the next tag. Callers check [`Self::tag_of`] first.
    pub fn register(&mut self, object: &ObjectRef) -> SerializeResult<u32> {
        let pin = self.script.root(object)?;
        self.pins.push(pin);
        let tag = self.pins.len() as u32;
        self.tags.insert(object.identity(), tag);
        Ok(tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
        self.pins.clear();
    }
}
