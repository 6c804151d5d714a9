//! Snapshots of versioned content.
//!
//! A snapshot is a mapping from logical path (cell index, layer name, field
//! name, ...) to a JSON value. The core never interprets the values; it only
//! stores, hashes and compares them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Longest accepted snapshot path
pub const MAX_PATH_LEN: usize = 1024;

// =============================================================================
// Content Type
// =============================================================================

/// Kind of content a version history belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Notebook,
    Visualization,
    Dataset,
    Script,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Notebook => write!(f, "notebook"),
            ContentType::Visualization => write!(f, "visualization"),
            ContentType::Dataset => write!(f, "dataset"),
            ContentType::Script => write!(f, "script"),
        }
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "notebook" | "nb" => Ok(ContentType::Notebook),
            "visualization" | "viz" | "vis" => Ok(ContentType::Visualization),
            "dataset" | "data" => Ok(ContentType::Dataset),
            "script" => Ok(ContentType::Script),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid content type '{}'. Expected: notebook, visualization, dataset, script",
                s
            ))),
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Full state of a content item at one version.
///
/// Paths are kept sorted, so the serialized form is canonical: two snapshots
/// with equal contents always produce identical bytes and checksums.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(path, value)` pairs, validating every path.
    pub fn from_entries<I, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut snapshot = Snapshot::new();
        for (path, value) in entries {
            snapshot.insert(path, value)?;
        }
        Ok(snapshot)
    }

    /// Build a snapshot from a JSON object.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_entries(map),
            other => Err(Error::Validation(format!(
                "snapshot must be a JSON object of path to value, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a snapshot from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| Error::Validation(format!("snapshot is not valid JSON: {err}")))?;
        Self::from_json(value)
    }

    /// Convert any serializable mapping into a snapshot.
    ///
    /// Fails with [`Error::Validation`] when a value cannot be represented
    /// as JSON (non-string map keys, failing `Serialize` impls).
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|err| Error::Validation(format!("snapshot value is not serializable: {err}")))?;
        Self::from_json(value)
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) -> Result<Option<Value>> {
        let path = path.into();
        validate_path(&path)?;
        Ok(self.entries.insert(path, value))
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(path, value)| (path.as_str(), value))
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.clone().into_iter().collect())
    }

    /// Canonical serialized form (sorted paths, sorted nested object keys).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.entries)?)
    }

    /// Hex SHA-256 of the canonical bytes.
    pub fn checksum(&self) -> Result<String> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }

    /// Decode canonical bytes read back from storage.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let entries: BTreeMap<String, Value> = serde_json::from_slice(bytes)
            .map_err(|err| Error::Storage(format!("corrupt snapshot: {err}")))?;
        Ok(Self { entries })
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Reject paths that cannot serve as stable keys.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Validation("snapshot path cannot be empty".to_string()));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(Error::Validation(format!(
            "snapshot path longer than {MAX_PATH_LEN} bytes"
        )));
    }
    if path.chars().any(char::is_control) {
        return Err(Error::Validation(format!(
            "snapshot path contains control characters: {path:?}"
        )));
    }
    Ok(())
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write as _;
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
