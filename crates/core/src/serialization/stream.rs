use std::io::{self, BufRead, Read, Write};

use super::binary::{packed_width, span_of};
use super::{BinarySerializer, ByteSink, Deserializer, ValueTag, enter_nested};
use crate::error::{SerializeError, SerializeResult};
use crate::script::{ObjectRef, SCRIPT_INT_MAX, SCRIPT_INT_MIN, ScriptContext, ScriptValue};

/// Writes encoded bytes straight to an [`io::Write`].
pub struct StreamSink<W: Write> {
    writer: W,
    written: u64,
}

impl<W: Write> ByteSink for StreamSink<W> {
    fn put(&mut self, _name: &str, bytes: &[u8]) -> SerializeResult<()> {
        self.writer.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

/// Binary serializer for save files and network resync.
pub type StreamSerializer<'a, W> = BinarySerializer<'a, StreamSink<W>>;

impl<'a, W: Write> BinarySerializer<'a, StreamSink<W>> {
    pub fn new(script: &'a ScriptContext, writer: W) -> Self {
        Self::with_sink(script, StreamSink { writer, written: 0 })
    }

    pub fn bytes_written(&self) -> u64 {
        self.sink().written
    }

    /// Flushes and hands back the writer.
    pub fn finish(self) -> SerializeResult<W> {
        let mut writer = self.into_sink().writer;
        writer.flush()?;
        Ok(writer)
    }
}

/// Decodes the binary format from a buffered reader.
///
/// Objects are registered in first-sighting order as they are decoded, so a
/// `BackRef` resolves to the very object built earlier, not a copy.
pub struct StreamDeserializer<R: BufRead> {
    reader: R,
    offset: u64,
    backrefs: Vec<ObjectRef>,
    depth: usize,
}

impl<R: BufRead> StreamDeserializer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0, backrefs: Vec::new(), depth: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_into(&mut self, buf: &mut [u8]) -> SerializeResult<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(SerializeError::TruncatedData { offset: self.offset, needed: buf.len() })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn read_array<const N: usize>(&mut self) -> SerializeResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn read_offset(&mut self, span: u64) -> SerializeResult<u64> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf[..packed_width(span)])?;
        Ok(u64::from(u32::from_le_bytes(buf)))
    }

    fn read_object(&mut self, object: ObjectRef) -> SerializeResult<ScriptValue> {
        enter_nested(&mut self.depth)?;
        let result = self.read_properties(&object);
        self.depth -= 1;
        result.map(|()| ScriptValue::Object(object))
    }

    fn read_properties(&mut self, object: &ObjectRef) -> SerializeResult<()> {
        // Registered before its properties so nested backrefs can reach it.
        self.backrefs.push(object.clone());
        let count = self.get_u32(None)?;
        for _ in 0..count {
            let name = self.get_string()?;
            let value = self.get_script_val()?;
            object.set(name, value);
        }
        Ok(())
    }
}

impl<R: BufRead> Deserializer for StreamDeserializer<R> {
    fn get_u8(&mut self, bounds: Option<(u8, u8)>) -> SerializeResult<u8> {
        let [byte] = self.read_array::<1>()?;
        Ok(match bounds {
            Some((min, _)) => byte.wrapping_add(min),
            None => byte,
        })
    }

    fn get_i32(&mut self, bounds: Option<(i32, i32)>) -> SerializeResult<i32> {
        match bounds {
            Some((min, max)) => {
                let offset = self.read_offset(span_of(i64::from(min), i64::from(max)))?;
                let value = i64::from(min) + offset as i64;
                i32::try_from(value).map_err(|_| SerializeError::NumberOutOfRange {
                    name: "i32".to_string(),
                    value,
                    min: i64::from(min),
                    max: i64::from(max),
                })
            }
            None => Ok(i32::from_le_bytes(self.read_array()?)),
        }
    }

    fn get_u32(&mut self, bounds: Option<(u32, u32)>) -> SerializeResult<u32> {
        match bounds {
            Some((min, max)) => {
                let offset = self.read_offset(span_of(i64::from(min), i64::from(max)))?;
                let value = i64::from(min) + offset as i64;
                u32::try_from(value).map_err(|_| SerializeError::NumberOutOfRange {
                    name: "u32".to_string(),
                    value,
                    min: i64::from(min),
                    max: i64::from(max),
                })
            }
            None => Ok(u32::from_le_bytes(self.read_array()?)),
        }
    }

    fn get_f32(&mut self) -> SerializeResult<f32> {
        Ok(f32::from_bits(u32::from_le_bytes(self.read_array()?)))
    }

    fn get_f64(&mut self) -> SerializeResult<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.read_array()?)))
    }

    fn get_bool(&mut self) -> SerializeResult<bool> {
        Ok(self.number_u8(0, 1)? == 1)
    }

    fn get_string(&mut self) -> SerializeResult<String> {
        let len = self.get_u32(None)? as usize;
        // Read through `take` so a corrupt length cannot force a huge allocation.
        let mut bytes = Vec::new();
        (&mut self.reader).take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() < len {
            return Err(SerializeError::TruncatedData { offset: self.offset, needed: len });
        }
        self.offset += len as u64;
        String::from_utf8(bytes).map_err(|_| SerializeError::InvalidCharInString)
    }

    fn get_script_val(&mut self) -> SerializeResult<ScriptValue> {
        let tag = ValueTag::try_from(self.get_u8(None)?)?;
        match tag {
            ValueTag::Void => Ok(ScriptValue::Void),
            ValueTag::Null => Ok(ScriptValue::Null),
            ValueTag::Boolean => Ok(ScriptValue::Bool(self.number_u8(0, 1)? == 1)),
            ValueTag::Int => Ok(ScriptValue::Int(self.number_i32(SCRIPT_INT_MIN, SCRIPT_INT_MAX)?)),
            ValueTag::Double => Ok(ScriptValue::Double(self.get_f64()?)),
            ValueTag::String => Ok(ScriptValue::String(self.script_string()?)),
            ValueTag::Object => self.read_object(ObjectRef::new_object()),
            ValueTag::Array => self.read_object(ObjectRef::new_array()),
            ValueTag::BackRef => {
                let tag = self.get_u32(None)?;
                let index = (tag as usize).checked_sub(1);
                match index.and_then(|index| self.backrefs.get(index)) {
                    Some(object) => Ok(ScriptValue::Object(object.clone())),
                    None => Err(SerializeError::UndefinedBackref(tag)),
                }
            }
        }
    }

    fn is_exhausted(&mut self) -> SerializeResult<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }
}
