use super::{BackrefTable, Serializer, ValueTag, enter_nested};
use crate::error::{SerializeError, SerializeResult};
use crate::script::{ObjectRef, SCRIPT_INT_MAX, SCRIPT_INT_MIN, ScriptContext, ScriptValue};

/// Destination for the encoded bytes. `name` labels the field for sinks
/// that care (none of the binary ones do).
pub trait ByteSink {
    fn put(&mut self, name: &str, bytes: &[u8]) -> SerializeResult<()>;
}

/// Width in bytes of a bounded integer whose range spans `span` values.
pub(crate) fn packed_width(span: u64) -> usize {
    match span {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 4,
    }
}

pub(crate) fn span_of(min: i64, max: i64) -> u64 {
    (max - min).max(0) as u64
}

/// Encodes values into a [`ByteSink`] using the portable binary format.
///
/// Owns the backref table for the whole operation, so shared objects are
/// tagged across every value written through one serializer.
pub struct BinarySerializer<'a, S: ByteSink> {
    sink: S,
    script: &'a ScriptContext,
    backrefs: BackrefTable<'a>,
    depth: usize,
}

impl<'a, S: ByteSink> BinarySerializer<'a, S> {
    pub fn with_sink(script: &'a ScriptContext, sink: S) -> Self {
        Self { sink, script, backrefs: BackrefTable::new(script), depth: 0 }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn backrefs(&self) -> &BackrefTable<'a> {
        &self.backrefs
    }

    /// Releases the backref table and returns the sink.
    pub fn into_sink(mut self) -> S {
        self.backrefs.clear();
        self.sink
    }

    fn put_offset(&mut self, name: &str, offset: u64, span: u64) -> SerializeResult<()> {
        let bytes = (offset as u32).to_le_bytes();
        self.sink.put(name, &bytes[..packed_width(span)])
    }

    fn put_tag(&mut self, tag: ValueTag) -> SerializeResult<()> {
        self.put_u8("type", tag as u8, None)
    }

    fn handle_script_val(&mut self, value: &ScriptValue) -> SerializeResult<()> {
        match value {
            ScriptValue::Void => self.put_tag(ValueTag::Void),
            ScriptValue::Null => self.put_tag(ValueTag::Null),
            ScriptValue::Bool(value) => {
                self.put_tag(ValueTag::Boolean)?;
                self.put_u8("value", u8::from(*value), None)
            }
            ScriptValue::Int(value) if (SCRIPT_INT_MIN..=SCRIPT_INT_MAX).contains(value) => {
                self.put_tag(ValueTag::Int)?;
                self.number_i32("value", *value, SCRIPT_INT_MIN, SCRIPT_INT_MAX)
            }
            ScriptValue::Int(value) => {
                self.put_tag(ValueTag::Double)?;
                self.put_f64("value", f64::from(*value))
            }
            ScriptValue::Double(value) => {
                self.put_tag(ValueTag::Double)?;
                self.put_f64("value", *value)
            }
            ScriptValue::String(value) => {
                self.put_tag(ValueTag::String)?;
                self.script_string("string", value)
            }
            ScriptValue::Object(object) => {
                if let Some(tag) = self.backrefs.tag_of(object) {
                    self.put_tag(ValueTag::BackRef)?;
                    return self.put_u32("tag", tag, None);
                }
                enter_nested(&mut self.depth)?;
                let result = self.write_object(object);
                self.depth -= 1;
                result
            }
            ScriptValue::Function(_) | ScriptValue::Xml(_) => {
                Err(SerializeError::InvalidScriptValue(value.type_name()))
            }
        }
    }

    fn write_object(&mut self, object: &ObjectRef) -> SerializeResult<()> {
        self.backrefs.register(object)?;
        // TODO: arrays could skip positional names and write values only.
        self.put_tag(if object.is_array() { ValueTag::Array } else { ValueTag::Object })?;

        let script = self.script;
        let _pin = script.root(object)?;
        let names = script.enumerate(object)?;
        let count = u32::try_from(names.len())
            .map_err(|_| SerializeError::ScriptEngine("too many properties".to_string()))?;
        self.put_u32("num props", count, None)?;
        for name in &names {
            let property = script.get_property(object, name)?;
            self.put_string("prop name", name)?;
            self.handle_script_val(&property)?;
        }
        Ok(())
    }
}

impl<S: ByteSink> Serializer for BinarySerializer<'_, S> {
    fn put_u8(&mut self, name: &str, value: u8, bounds: Option<(u8, u8)>) -> SerializeResult<()> {
        match bounds {
            Some((min, _)) => self.sink.put(name, &[value.wrapping_sub(min)]),
            None => self.sink.put(name, &[value]),
        }
    }

    fn put_i32(
        &mut self,
        name: &str,
        value: i32,
        bounds: Option<(i32, i32)>,
    ) -> SerializeResult<()> {
        match bounds {
            Some((min, max)) => {
                let offset = (i64::from(value) - i64::from(min)) as u64;
                self.put_offset(name, offset, span_of(i64::from(min), i64::from(max)))
            }
            None => self.sink.put(name, &value.to_le_bytes()),
        }
    }

    fn put_u32(
        &mut self,
        name: &str,
        value: u32,
        bounds: Option<(u32, u32)>,
    ) -> SerializeResult<()> {
        match bounds {
            Some((min, max)) => {
                let offset = u64::from(value.wrapping_sub(min));
                self.put_offset(name, offset, span_of(i64::from(min), i64::from(max)))
            }
            None => self.sink.put(name, &value.to_le_bytes()),
        }
    }

    fn put_f32(&mut self, name: &str, value: f32) -> SerializeResult<()> {
        self.sink.put(name, &value.to_bits().to_le_bytes())
    }

    fn put_f64(&mut self, name: &str, value: f64) -> SerializeResult<()> {
        self.sink.put(name, &value.to_bits().to_le_bytes())
    }

    fn put_bool(&mut self, name: &str, value: bool) -> SerializeResult<()> {
        self.number_u8(name, u8::from(value), 0, 1)
    }

    fn put_string(&mut self, name: &str, value: &str) -> SerializeResult<()> {
        let len = u32::try_from(value.len()).map_err(|_| SerializeError::StringTooLong {
            name: name.to_string(),
            len: value.len(),
            min: 0,
            max: u32::MAX as usize,
        })?;
        self.put_u32("string length", len, None)?;
        self.sink.put(name, value.as_bytes())
    }

    fn put_script_val(&mut self, _name: &str, value: &ScriptValue) -> SerializeResult<()> {
        self.handle_script_val(value)
    }
}
