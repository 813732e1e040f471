use std::collections::BTreeMap;
use std::fs;
use std::iter::FromIterator;
use std::path::Path;

use mverse_core::errors::{ErrorInfo, MverseError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic key ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, MverseError> {
    let value =
        serde_json::to_value(value).map_err(|err| MverseError::serde("json_serialize", err))?;
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonicalize(value))
        .map_err(|err| MverseError::serde("json_write", err))?;
    Ok(bytes)
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, MverseError> {
    serde_json::from_slice(data).map_err(|err| MverseError::serde("json_deserialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, MverseError> {
    serde_yaml::from_slice(data).map_err(|err| MverseError::serde("yaml_deserialize", err))
}

/// Computes a stable SHA256 hash over the canonical JSON form of `value`.
pub fn stable_hash_string<T: Serialize + ?Sized>(value: &T) -> Result<String, MverseError> {
    let bytes = to_canonical_json_bytes(&value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Reads a JSON or YAML document, picking the parser from the file extension.
pub fn load_structured<T: DeserializeOwned>(path: &Path) -> Result<T, MverseError> {
    let bytes = fs::read(path).map_err(|err| {
        MverseError::Serde(
            ErrorInfo::new("file_read", err.to_string())
                .with_context("path", path.display()),
        )
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => from_yaml_slice(&bytes),
        _ => from_json_slice(&bytes),
    }
}

/// Writes `value` as canonical JSON, creating parent directories as needed.
pub fn write_canonical_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MverseError> {
    ensure_parent(path)?;
    let bytes = to_canonical_json_bytes(value)?;
    fs::write(path, bytes).map_err(|err| {
        MverseError::Serde(
            ErrorInfo::new("file_write", err.to_string())
                .with_context("path", path.display()),
        )
    })
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), MverseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| MverseError::serde("create_dir", err))?;
        }
    }
    Ok(())
}
