use std::fmt;

use sha2::{Digest, Sha256};

use super::{BinarySerializer, ByteSink};
use crate::error::SerializeResult;
use crate::script::ScriptContext;

/// SHA-256 digest of a serialized state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateHash(pub [u8; 32]);

impl StateHash {
    pub const LEN: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Feeds every encoded byte into a SHA-256 accumulator instead of storing it.
#[derive(Default)]
pub struct HashSink {
    hasher: Sha256,
}

impl ByteSink for HashSink {
    fn put(&mut self, _name: &str, bytes: &[u8]) -> SerializeResult<()> {
        self.hasher.update(bytes);
        Ok(())
    }
}

/// Binary serializer whose output is a digest. There is no decode side.
pub type HashSerializer<'a> = BinarySerializer<'a, HashSink>;

impl<'a> BinarySerializer<'a, HashSink> {
    pub fn new(script: &'a ScriptContext) -> Self {
        Self::with_sink(script, HashSink::default())
    }

    pub fn compute_hash(self) -> StateHash {
        StateHash(self.into_sink().hasher.finalize().into())
    }
}
