//! Value sinks and sources used by components to (de)serialize their state.
//!
//! Components only ever see the [`Serializer`] and [`Deserializer`]
//! capabilities. Three implementations sit behind them:
//! - [`DebugSerializer`]: indented human-readable text, not round-trippable.
//! - [`HashSerializer`]: the binary encoding fed into SHA-256.
//! - [`StreamSerializer`] / [`StreamDeserializer`]: the byte-exact save format.
//!
//! Binary encoding rules (shared by the hash and stream variants):
//! - All numbers are little-endian and unaligned.
//! - Bounded integers store `value - min` in 1, 2 or 4 bytes, the smallest
//!   width that covers `max - min`. Unbounded integers use their full width.
//! - Strings are a `u32` byte length followed by UTF-8.
//! - Script values are a one-byte [`ValueTag`] followed by a payload. Objects
//!   and arrays are tagged on first sighting and later occurrences are
//!   written as a `BackRef` to that tag.

mod backref;
mod binary;
mod debug;
mod hash;
mod stream;

pub use backref::BackrefTable;
pub use binary::{BinarySerializer, ByteSink};
pub use debug::DebugSerializer;
pub use hash::{HashSerializer, HashSink, StateHash};
pub use stream::{StreamDeserializer, StreamSerializer, StreamSink};

use crate::error::{SerializeError, SerializeResult};
use crate::script::{ScriptString, ScriptValue};

/// Deepest chain of nested objects and arrays a single script value may hold.
/// Encoding, decoding and debug rendering all fail past it.
pub const MAX_NESTING_DEPTH: usize = 256;

fn enter_nested(depth: &mut usize) -> SerializeResult<()> {
    if *depth >= MAX_NESTING_DEPTH {
        return Err(SerializeError::NestingTooDeep { limit: MAX_NESTING_DEPTH });
    }
    *depth += 1;
    Ok(())
}

/// Type tag written before every script value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    Void = 0,
    Null = 1,
    Object = 2,
    Array = 3,
    String = 4,
    Int = 5,
    Double = 6,
    Boolean = 7,
    BackRef = 8,
}

impl TryFrom<u8> for ValueTag {
    type Error = SerializeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Void,
            1 => Self::Null,
            2 => Self::Object,
            3 => Self::Array,
            4 => Self::String,
            5 => Self::Int,
            6 => Self::Double,
            7 => Self::Boolean,
            8 => Self::BackRef,
            other => return Err(SerializeError::UnknownValueTag(other)),
        })
    }
}

fn check_range<T: Into<i64> + Copy>(name: &str, value: T, min: T, max: T) -> SerializeResult<()> {
    let (value, min, max) = (value.into(), min.into(), max.into());
    if value < min || value > max {
        return Err(SerializeError::NumberOutOfRange { name: name.to_string(), value, min, max });
    }
    Ok(())
}

fn check_ascii(name: &str, value: &str, min_len: usize, max_len: usize) -> SerializeResult<()> {
    if !value.is_ascii() {
        return Err(SerializeError::InvalidCharInString);
    }
    if value.len() < min_len || value.len() > max_len {
        return Err(SerializeError::StringTooLong {
            name: name.to_string(),
            len: value.len(),
            min: min_len,
            max: max_len,
        });
    }
    Ok(())
}

/// Write side of the codec.
///
/// Implementors provide the `put_*` primitives. Components call the provided
/// methods, which validate caller contracts (ranges, ASCII) first.
pub trait Serializer {
    fn put_u8(&mut self, name: &str, value: u8, bounds: Option<(u8, u8)>) -> SerializeResult<()>;
    fn put_i32(
        &mut self,
        name: &str,
        value: i32,
        bounds: Option<(i32, i32)>,
    ) -> SerializeResult<()>;
    fn put_u32(
        &mut self,
        name: &str,
        value: u32,
        bounds: Option<(u32, u32)>,
    ) -> SerializeResult<()>;
    fn put_f32(&mut self, name: &str, value: f32) -> SerializeResult<()>;
    fn put_f64(&mut self, name: &str, value: f64) -> SerializeResult<()>;
    fn put_bool(&mut self, name: &str, value: bool) -> SerializeResult<()>;
    fn put_string(&mut self, name: &str, value: &str) -> SerializeResult<()>;
    fn put_script_val(&mut self, name: &str, value: &ScriptValue) -> SerializeResult<()>;

    fn number_u8(&mut self, name: &str, value: u8, min: u8, max: u8) -> SerializeResult<()> {
        check_range(name, value, min, max)?;
        self.put_u8(name, value, Some((min, max)))
    }

    fn number_u8_unbounded(&mut self, name: &str, value: u8) -> SerializeResult<()> {
        self.put_u8(name, value, None)
    }

    fn number_i32(&mut self, name: &str, value: i32, min: i32, max: i32) -> SerializeResult<()> {
        check_range(name, value, min, max)?;
        self.put_i32(name, value, Some((min, max)))
    }

    fn number_i32_unbounded(&mut self, name: &str, value: i32) -> SerializeResult<()> {
        self.put_i32(name, value, None)
    }

    fn number_u32(&mut self, name: &str, value: u32, min: u32, max: u32) -> SerializeResult<()> {
        check_range(name, value, min, max)?;
        self.put_u32(name, value, Some((min, max)))
    }

    fn number_u32_unbounded(&mut self, name: &str, value: u32) -> SerializeResult<()> {
        self.put_u32(name, value, None)
    }

    fn number_f32_unbounded(&mut self, name: &str, value: f32) -> SerializeResult<()> {
        self.put_f32(name, value)
    }

    fn number_f64_unbounded(&mut self, name: &str, value: f64) -> SerializeResult<()> {
        self.put_f64(name, value)
    }

    fn bool(&mut self, name: &str, value: bool) -> SerializeResult<()> {
        self.put_bool(name, value)
    }

    fn string_ascii(
        &mut self,
        name: &str,
        value: &str,
        min_len: usize,
        max_len: usize,
    ) -> SerializeResult<()> {
        check_ascii(name, value, min_len, max_len)?;
        self.put_string(name, value)
    }

    fn string(&mut self, name: &str, value: &str) -> SerializeResult<()> {
        self.put_string(name, value)
    }

    fn script_string(&mut self, name: &str, value: &ScriptString) -> SerializeResult<()> {
        let utf8 = value.to_utf8()?;
        self.put_string(name, &utf8)
    }

    fn script_val(&mut self, name: &str, value: &ScriptValue) -> SerializeResult<()> {
        self.put_script_val(name, value)
    }
}

/// Read side of the codec. Mirrors [`Serializer`]; values must be read in
/// the order they were written, with the same bounds.
pub trait Deserializer {
    fn get_u8(&mut self, bounds: Option<(u8, u8)>) -> SerializeResult<u8>;
    fn get_i32(&mut self, bounds: Option<(i32, i32)>) -> SerializeResult<i32>;
    fn get_u32(&mut self, bounds: Option<(u32, u32)>) -> SerializeResult<u32>;
    fn get_f32(&mut self) -> SerializeResult<f32>;
    fn get_f64(&mut self) -> SerializeResult<f64>;
    fn get_bool(&mut self) -> SerializeResult<bool>;
    fn get_string(&mut self) -> SerializeResult<String>;
    fn get_script_val(&mut self) -> SerializeResult<ScriptValue>;

    /// True once every byte of the input has been consumed.
    fn is_exhausted(&mut self) -> SerializeResult<bool>;

    fn number_u8(&mut self, min: u8, max: u8) -> SerializeResult<u8> {
        let value = self.get_u8(Some((min, max)))?;
        check_range("u8", value, min, max)?;
        Ok(value)
    }

    fn number_u8_unbounded(&mut self) -> SerializeResult<u8> {
        self.get_u8(None)
    }

    fn number_i32(&mut self, min: i32, max: i32) -> SerializeResult<i32> {
        let value = self.get_i32(Some((min, max)))?;
        check_range("i32", value, min, max)?;
        Ok(value)
    }

    fn number_i32_unbounded(&mut self) -> SerializeResult<i32> {
        self.get_i32(None)
    }

    fn number_u32(&mut self, min: u32, max: u32) -> SerializeResult<u32> {
        let value = self.get_u32(Some((min, max)))?;
        check_range("u32", value, min, max)?;
        Ok(value)
    }

    fn number_u32_unbounded(&mut self) -> SerializeResult<u32> {
        self.get_u32(None)
    }

    fn number_f32_unbounded(&mut self) -> SerializeResult<f32> {
        self.get_f32()
    }

    fn number_f64_unbounded(&mut self) -> SerializeResult<f64> {
        self.get_f64()
    }

    fn bool(&mut self) -> SerializeResult<bool> {
        self.get_bool()
    }

    fn string_ascii(&mut self, min_len: usize, max_len: usize) -> SerializeResult<String> {
        let value = self.get_string()?;
        check_ascii("string", &value, min_len, max_len)?;
        Ok(value)
    }

    fn string(&mut self) -> SerializeResult<String> {
        self.get_string()
    }

    fn script_string(&mut self) -> SerializeResult<ScriptString> {
        Ok(ScriptString::from(self.get_string()?.as_str()))
    }

    fn script_val(&mut self) -> SerializeResult<ScriptValue> {
        self.get_script_val()
    }
}
