use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::io::Write;

use super::{Serializer, enter_nested};
use crate::error::SerializeResult;
use crate::script::{ObjectIdentity, ObjectRef, ScriptContext, ScriptValue};

/// Human-readable dump of component state, one `name: value` line per field.
pub struct DebugSerializer<'a, W: Write> {
    writer: W,
    script: &'a ScriptContext,
    indent: usize,
}

impl<'a, W: Write> DebugSerializer<'a, W> {
    pub fn new(script: &'a ScriptContext, writer: W) -> Self {
        Self { writer, script, indent: 0 }
    }

    pub fn text_line(&mut self, text: &str) -> SerializeResult<()> {
        if text.is_empty() {
            writeln!(self.writer)?;
        } else {
            writeln!(self.writer, "{:indent$}{text}", "", indent = self.indent)?;
        }
        Ok(())
    }

    pub fn indent(&mut self, spaces: usize) {
        self.indent += spaces;
    }

    pub fn dedent(&mut self, spaces: usize) {
        self.indent = self.indent.saturating_sub(spaces);
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn field(&mut self, name: &str, value: impl fmt::Display) -> SerializeResult<()> {
        self.text_line(&format!("{name}: {value}"))
    }
}

impl<W: Write> Serializer for DebugSerializer<'_, W> {
    fn put_u8(&mut self, name: &str, value: u8, _bounds: Option<(u8, u8)>) -> SerializeResult<()> {
        self.field(name, value)
    }

    fn put_i32(
        &mut self,
        name: &str,
        value: i32,
        _bounds: Option<(i32, i32)>,
    ) -> SerializeResult<()> {
        self.field(name, value)
    }

    fn put_u32(
        &mut self,
        name: &str,
        value: u32,
        _bounds: Option<(u32, u32)>,
    ) -> SerializeResult<()> {
        self.field(name, value)
    }

    fn put_f32(&mut self, name: &str, value: f32) -> SerializeResult<()> {
        self.field(name, format!("{value:?}"))
    }

    fn put_f64(&mut self, name: &str, value: f64) -> SerializeResult<()> {
        self.field(name, format!("{value:?}"))
    }

    fn put_bool(&mut self, name: &str, value: bool) -> SerializeResult<()> {
        self.field(name, value)
    }

    fn put_string(&mut self, name: &str, value: &str) -> SerializeResult<()> {
        self.field(name, format!("{value:?}"))
    }

    fn put_script_val(&mut self, name: &str, value: &ScriptValue) -> SerializeResult<()> {
        let source = ScriptSource::render(self.script, value)?;
        self.field(name, source)
    }
}

/// Renders a value graph as script-like source. Objects reached more than
/// once are written as `#n=...` at first sight and `#n#` afterwards.
struct ScriptSource<'a> {
    script: &'a ScriptContext,
    seen: HashMap<ObjectIdentity, usize>,
    labels: HashMap<ObjectIdentity, Option<usize>>,
    next_label: usize,
    depth: usize,
    out: String,
}

impl<'a> ScriptSource<'a> {
    fn render(script: &'a ScriptContext, value: &ScriptValue) -> SerializeResult<String> {
        let mut source = Self {
            script,
            seen: HashMap::new(),
            labels: HashMap::new(),
            next_label: 1,
            depth: 0,
            out: String::new(),
        };
        source.count(value)?;
        source.write_value(value)?;
        Ok(source.out)
    }

    fn count(&mut self, value: &ScriptValue) -> SerializeResult<()> {
        let ScriptValue::Object(object) = value else { return Ok(()) };
        let seen = self.seen.entry(object.identity()).or_insert(0);
        *seen += 1;
        if *seen > 1 {
            return Ok(());
        }
        enter_nested(&mut self.depth)?;
        let result = object
            .entries()
            .into_iter()
            .filter_map(|(_, property)| property)
            .try_for_each(|property| self.count(&property));
        self.depth -= 1;
        result
    }

    fn write_value(&mut self, value: &ScriptValue) -> SerializeResult<()> {
        match value {
            ScriptValue::Void => self.out.push_str("undefined"),
            ScriptValue::Null => self.out.push_str("null"),
            ScriptValue::Bool(value) => {
                let _ = write!(self.out, "{value}");
            }
            ScriptValue::Int(value) => {
                let _ = write!(self.out, "{value}");
            }
            ScriptValue::Double(value) => {
                let _ = write!(self.out, "{value:?}");
            }
            ScriptValue::String(value) => {
                let _ = write!(self.out, "{value:?}");
            }
            ScriptValue::Object(object) => return self.write_object(object),
            ScriptValue::Function(name) => {
                let _ = write!(self.out, "(function {name})");
            }
            ScriptValue::Xml(text) => {
                let _ = write!(self.out, "<xml>{text}</xml>");
            }
        }
        Ok(())
    }

    fn write_object(&mut self, object: &ObjectRef) -> SerializeResult<()> {
        let identity = object.identity();
        if let Some(label) = self.labels.get(&identity) {
            match label {
                Some(label) => {
                    let _ = write!(self.out, "#{label}#");
                }
                None => self.out.push_str("#?#"),
            }
            return Ok(());
        }
        let shared = self.seen.get(&identity).copied().unwrap_or(0) > 1;
        let label = shared.then(|| {
            let label = self.next_label;
            self.next_label += 1;
            label
        });
        self.labels.insert(identity, label);
        if let Some(label) = label {
            let _ = write!(self.out, "#{label}=");
        }

        let _pin = self.script.root(object)?;
        enter_nested(&mut self.depth)?;
        let result = self.write_entries(object);
        self.depth -= 1;
        result
    }

    fn write_entries(&mut self, object: &ObjectRef) -> SerializeResult<()> {
        let is_array = object.is_array();
        self.out.push(if is_array { '[' } else { '{' });
        for (index, (name, property)) in object.entries().into_iter().enumerate() {
            if index > 0 {
                self.out.push_str(", ");
            }
            if !is_array {
                let _ = write!(self.out, "{name}: ");
            }
            match property {
                Some(property) => self.write_value(&property)?,
                None => self.out.push_str("(getter)"),
            }
        }
        self.out.push(if is_array { ']' } else { '}' });
        Ok(())
    }
}
