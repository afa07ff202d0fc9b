use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A config value decoded from its stored string form.
///
/// Decoding happens once, at the admin boundary, so callers match on the variant
/// instead of re-parsing strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Map(BTreeMap<String, String>),
    String(String),
}

impl ConfigValue {
    /// Decodes a raw field value.
    ///
    /// `true`/`false` (any case) become [`ConfigValue::Bool`], base-10 integers become
    /// [`ConfigValue::Int`], a JSON object of strings becomes [`ConfigValue::Map`];
    /// anything else stays a string.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return ConfigValue::Bool(true),
            "false" => return ConfigValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return ConfigValue::Int(i);
        }
        if trimmed.starts_with('{') {
            if let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(trimmed) {
                return ConfigValue::Map(map);
            }
        }
        ConfigValue::String(raw.to_string())
    }

    /// Encodes the value back into the string stored in a simple field.
    pub fn to_raw(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Map(m) => serde_json::to_string(m).unwrap_or_default(),
            ConfigValue::String(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Int(i)
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}
