//! File-backed save container for serialized simulation state.
//!
//! The file format is:
//! - Line 1: JSON header with `format_version`, `build_id`, `payload_len` and
//!   `payload_sha256_hex`, terminated by `\n`.
//! - Remaining bytes: the raw state stream from
//!   [`ComponentManager::serialize_state`].
//!
//! Writes go to a sibling temp file that is renamed into place, so a crash
//! never leaves a half-written save behind. Loading rejects unknown versions
//! and any payload whose length or SHA-256 disagrees with the header.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SerializeError, SerializeResult};
use crate::manager::ComponentManager;

pub const SAVE_FORMAT_VERSION: u16 = 1;

/// First line of a save file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub format_version: u16,
    pub build_id: String,
    pub payload_len: u64,
    pub payload_sha256_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFile {
    pub header: SaveHeader,
    pub payload: Vec<u8>,
}

/// Describes why a save file could not be written or loaded.
#[derive(Debug, thiserror::Error)]
pub enum SaveFileError {
    #[error("save file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("save file is empty")]
    EmptyFile,
    #[error("invalid save header: {message}")]
    InvalidHeader { message: String },
    #[error("unsupported save format version {0}")]
    UnsupportedVersion(u16),
    #[error("payload length mismatch: header says {expected}, found {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("payload SHA-256 does not match the header")]
    ChecksumMismatch,
    #[error("state error: {0}")]
    State(#[from] SerializeError),
}

fn payload_sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    format!("{digest:064x}")
}

impl SaveFile {
    pub fn from_payload(build_id: &str, payload: Vec<u8>) -> Self {
        let header = SaveHeader {
            format_version: SAVE_FORMAT_VERSION,
            build_id: build_id.to_string(),
            payload_len: payload.len() as u64,
            payload_sha256_hex: payload_sha256_hex(&payload),
        };
        Self { header, payload }
    }

    /// Serializes the full state of `manager`.
    pub fn capture(manager: &ComponentManager, build_id: &str) -> SerializeResult<Self> {
        let mut payload = Vec::new();
        manager.serialize_state(&mut payload)?;
        Ok(Self::from_payload(build_id, payload))
    }

    /// Replaces the state of `manager` with this save's payload.
    pub fn restore_into(&self, manager: &mut ComponentManager) -> SerializeResult<()> {
        manager.deserialize_state(self.payload.as_slice())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SaveFileError> {
        let header_json = serde_json::to_string(&self.header).map_err(io::Error::other)?;
        let mut bytes = Vec::with_capacity(header_json.len() + 1 + self.payload.len());
        bytes.extend_from_slice(header_json.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SaveFileError> {
        if bytes.is_empty() {
            return Err(SaveFileError::EmptyFile);
        }
        let Some(newline) = bytes.iter().position(|&b| b == b'\n') else {
            return Err(SaveFileError::InvalidHeader { message: "missing header line".to_string() });
        };
        let header: SaveHeader = serde_json::from_slice(&bytes[..newline])
            .map_err(|e| SaveFileError::InvalidHeader { message: e.to_string() })?;
        if header.format_version != SAVE_FORMAT_VERSION {
            return Err(SaveFileError::UnsupportedVersion(header.format_version));
        }

        let payload = bytes[newline + 1..].to_vec();
        let actual = payload.len() as u64;
        if actual != header.payload_len {
            return Err(SaveFileError::LengthMismatch { expected: header.payload_len, actual });
        }
        if payload_sha256_hex(&payload) != header.payload_sha256_hex {
            return Err(SaveFileError::ChecksumMismatch);
        }
        Ok(Self { header, payload })
    }

    /// Writes via a temp file in the same directory, then renames over `path`.
    pub fn write_atomic(&self, path: &Path) -> Result<(), SaveFileError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let bytes = self.to_bytes()?;
        let tmp_path = temp_path(path);
        fs::write(&tmp_path, &bytes)?;
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        log::debug!("wrote save {} ({} payload bytes)", path.display(), self.payload.len());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SaveFileError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
            .inspect_err(|err| log::error!("failed to load save {}: {err}", path.display()))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
