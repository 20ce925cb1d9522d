//! Small helpers for building and reading `rmpv::Value::Map`s.
//!
//! The message catalog is hand-encoded against dynamic MessagePack maps
//! (see `message.rs` for why) rather than derived via serde. These
//! helpers keep that code from drowning in `match` boilerplate.

use rmpv::Value;

use crate::error::ProtocolError;

/// Accumulates `(key, value)` pairs for a MessagePack map, skipping a
/// field entirely when it's "empty" in the sense spec.md means it —
/// fields with zero/empty values are omitted on the wire.
#[derive(Default)]
pub struct MapBuilder {
    fields: Vec<(Value, Value)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always-present string field (e.g. the `Type` tag itself).
    pub fn str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((Value::from(key), Value::from(value.into())));
        self
    }

    /// String field omitted when empty.
    pub fn str_if_nonempty(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.fields
                .push((Value::from(key), Value::from(value.to_owned())));
        }
        self
    }

    /// `Option<String>` field omitted when `None` or empty.
    pub fn opt_str(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => self.str_if_nonempty(key, v),
            _ => self,
        }
    }

    /// Integer field omitted when zero.
    pub fn u64_if_nonzero(mut self, key: &str, value: u64) -> Self {
        if value != 0 {
            self.fields.push((Value::from(key), Value::from(value)));
        }
        self
    }

    pub fn u16_if_nonzero(self, key: &str, value: u16) -> Self {
        self.u64_if_nonzero(key, value as u64)
    }

    /// Byte-string field omitted when empty.
    pub fn bytes_if_nonempty(mut self, key: &str, value: &[u8]) -> Self {
        if !value.is_empty() {
            self.fields
                .push((Value::from(key), Value::from(value.to_vec())));
        }
        self
    }

    /// Nested string-to-string map, omitted when empty.
    pub fn str_map_if_nonempty(
        mut self,
        key: &str,
        value: &std::collections::HashMap<String, String>,
    ) -> Self {
        if !value.is_empty() {
            let entries = value
                .iter()
                .map(|(k, v)| (Value::from(k.clone()), Value::from(v.clone())))
                .collect();
            self.fields
                .push((Value::from(key), Value::Map(entries)));
        }
        self
    }

    pub fn build(self) -> Value {
        Value::Map(self.fields)
    }
}

/// Looks up `key` in a MessagePack map value (case-sensitive, as the
/// catalog is PascalCase throughout).
pub fn map_lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_map()?.iter().find_map(|(k, v)| {
        if k.as_str() == Some(key) {
            Some(v)
        } else {
            None
        }
    })
}

pub fn get_str(value: &Value, key: &str) -> String {
    map_lookup(value, key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned()
}

pub fn get_opt_str(value: &Value, key: &str) -> Option<String> {
    let s = get_str(value, key);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub fn get_u16(value: &Value, key: &str) -> u16 {
    map_lookup(value, key)
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u16
}

pub fn get_u64(value: &Value, key: &str) -> u64 {
    map_lookup(value, key).and_then(|v| v.as_u64()).unwrap_or(0)
}

pub fn get_bytes(value: &Value, key: &str) -> Vec<u8> {
    map_lookup(value, key)
        .and_then(|v| v.as_slice())
        .map(|s| s.to_vec())
        .unwrap_or_default()
}

pub fn get_str_map(value: &Value, key: &str) -> std::collections::HashMap<String, String> {
    let Some(inner) = map_lookup(value, key).and_then(|v| v.as_map()) else {
        return std::collections::HashMap::new();
    };
    inner
        .iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_owned(), v.as_str().unwrap_or_default().to_owned())))
        .collect()
}

/// Reads the `Type` tag out of a top-level message map.
pub fn get_type(value: &Value) -> Result<String, ProtocolError> {
    map_lookup(value, "Type")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or(ProtocolError::MissingField("Type"))
}
