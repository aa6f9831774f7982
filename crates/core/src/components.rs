//! Stock component types and the default registry.

use crate::component::{Component, ComponentRegistry, SimContext};
use crate::error::SerializeResult;
use crate::params::ParamNode;
use crate::script::{ObjectRef, ScriptValue};
use crate::serialization::{Deserializer, Serializer};
use crate::templates::{TEMPLATE_MANAGER_TYPE, TemplateManager};

pub const POSITION_TYPE: &str = "Position";
pub const SCRIPTED_TYPE: &str = "Scripted";

/// Registry with `TemplateManager`, `Position` and `Scripted`, in that order.
pub fn stock_registry() -> SerializeResult<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    registry.register(TEMPLATE_MANAGER_TYPE, TemplateManager::factory)?;
    registry.register(POSITION_TYPE, Position::factory)?;
    registry.register(SCRIPTED_TYPE, Scripted::factory)?;
    Ok(registry)
}

/// Location on the ground plane.
///
/// Template params: `x`, `z` (optional; both absent means out of world) and
/// `altitude`. Altitude comes from the template only and is not persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Position {
    in_world: bool,
    x: f64,
    z: f64,
    altitude: f64,
}

impl Position {
    pub fn factory(_context: &SimContext) -> Box<dyn Component> {
        Box::new(Self::default())
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.in_world.then_some((self.x, self.z))
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    pub fn move_to(&mut self, x: f64, z: f64) {
        self.in_world = true;
        self.x = x;
        self.z = z;
    }

    pub fn move_out_of_world(&mut self) {
        self.in_world = false;
    }
}

impl Component for Position {
    fn init(&mut self, _context: &SimContext, params: &ParamNode) -> SerializeResult<()> {
        self.altitude = params.parse_child("altitude")?.unwrap_or(0.0);
        let x = params.parse_child("x")?;
        let z = params.parse_child("z")?;
        if x.is_some() || z.is_some() {
            self.move_to(x.unwrap_or(0.0), z.unwrap_or(0.0));
        }
        Ok(())
    }

    fn serialize(&self, serializer: &mut dyn Serializer) -> SerializeResult<()> {
        serializer.bool("in world", self.in_world)?;
        if self.in_world {
            serializer.number_f64_unbounded("x", self.x)?;
            serializer.number_f64_unbounded("z", self.z)?;
        }
        Ok(())
    }

    fn deserialize(
        &mut self,
        context: &SimContext,
        params: &ParamNode,
        deserializer: &mut dyn Deserializer,
    ) -> SerializeResult<()> {
        self.init(context, params)?;
        self.in_world = deserializer.bool()?;
        if self.in_world {
            self.x = deserializer.number_f64_unbounded()?;
            self.z = deserializer.number_f64_unbounded()?;
        }
        Ok(())
    }
}

/// Component whose state is an arbitrary script value, as held by
/// script-defined component types.
///
/// `init` converts the template subtree into a script object: children become
/// properties, numeric leaves become numbers, other leaves strings.
#[derive(Clone, Debug)]
pub struct Scripted {
    state: ScriptValue,
}

impl Default for Scripted {
    fn default() -> Self {
        Self { state: ScriptValue::Object(ObjectRef::new_object()) }
    }
}

impl Scripted {
    pub fn factory(_context: &SimContext) -> Box<dyn Component> {
        Box::new(Self::default())
    }

    pub fn state(&self) -> &ScriptValue {
        &self.state
    }

    pub fn set_state(&mut self, state: ScriptValue) {
        self.state = state;
    }
}

fn params_to_script(params: &ParamNode) -> ScriptValue {
    if params.children().next().is_none() {
        return match params.value().trim().parse::<f64>() {
            Ok(number) => ScriptValue::number(number),
            Err(_) => ScriptValue::string(params.value()),
        };
    }
    let object = ObjectRef::new_object();
    for (name, child) in params.children() {
        object.set(name, params_to_script(child));
    }
    ScriptValue::Object(object)
}

impl Component for Scripted {
    fn init(&mut self, _context: &SimContext, params: &ParamNode) -> SerializeResult<()> {
        if !params.is_empty() {
            self.state = params_to_script(params);
        }
        Ok(())
    }

    fn serialize(&self, serializer: &mut dyn Serializer) -> SerializeResult<()> {
        serializer.script_val("state", &self.state)
    }

    fn deserialize(
        &mut self,
        _context: &SimContext,
        _params: &ParamNode,
        deserializer: &mut dyn Deserializer,
    ) -> SerializeResult<()> {
        self.state = deserializer.script_val()?;
        Ok(())
    }
}
