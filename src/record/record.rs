//! JSON document model stored in every node payload.
//!
//! A record is an id plus three families of string valued fields. Top-level keys
//! this crate does not understand are kept in `unknown` and written back untouched,
//! so records produced by newer writers survive a read-modify-write cycle here.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::RecordError;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub simple_fields: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub list_fields: BTreeMap<String, Vec<String>>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub map_fields: BTreeMap<String, BTreeMap<String, String>>,

    /// Top-level keys preserved verbatim across unmarshal and marshal
    #[serde(flatten)]
    pub unknown: serde_json::Map<String, serde_json::Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn marshal(&self) -> Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from).map_err(|e| {
            RecordError::Encode {
                id: self.id.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        Self::unmarshal_at("<payload>", data)
    }

    /// Like [`Record::unmarshal`], naming `path` in the error.
    pub fn unmarshal_at(
        path: &str,
        data: &[u8],
    ) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| {
            RecordError::MalformedPayload {
                path: path.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn get_simple_field(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.simple_fields.get(key).map(String::as_str)
    }

    pub fn set_simple_field(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.simple_fields.insert(key.into(), value.into());
    }

    pub fn remove_simple_field(
        &mut self,
        key: &str,
    ) -> Option<String> {
        self.simple_fields.remove(key)
    }

    /// Parses a simple field as an integer; `Ok(None)` when absent.
    pub fn get_int_field(
        &self,
        key: &str,
    ) -> Result<Option<i64>> {
        match self.get_simple_field(key) {
            None => Ok(None),
            Some(v) => v.trim().parse::<i64>().map(Some).map_err(|_| {
                RecordError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                }
                .into()
            }),
        }
    }

    /// Parses a simple field as a boolean, case-insensitively; `Ok(None)` when absent.
    pub fn get_bool_field(
        &self,
        key: &str,
    ) -> Result<Option<bool>> {
        match self.get_simple_field(key) {
            None => Ok(None),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(RecordError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                }
                .into()),
            },
        }
    }

    pub fn set_int_field(
        &mut self,
        key: impl Into<String>,
        value: i64,
    ) {
        self.set_simple_field(key, value.to_string());
    }

    pub fn set_bool_field(
        &mut self,
        key: impl Into<String>,
        value: bool,
    ) {
        self.set_simple_field(key, value.to_string());
    }

    pub fn get_map_field(
        &self,
        key: &str,
        subkey: &str,
    ) -> Option<&str> {
        self.map_fields
            .get(key)
            .and_then(|m| m.get(subkey))
            .map(String::as_str)
    }

    pub fn get_map(
        &self,
        key: &str,
    ) -> Option<&BTreeMap<String, String>> {
        self.map_fields.get(key)
    }

    pub fn set_map_field(
        &mut self,
        key: impl Into<String>,
        subkey: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.map_fields
            .entry(key.into())
            .or_default()
            .insert(subkey.into(), value.into());
    }

    /// Drops the whole map stored under `key`.
    pub fn remove_map_field(
        &mut self,
        key: &str,
    ) -> Option<BTreeMap<String, String>> {
        self.map_fields.remove(key)
    }

    pub fn get_list_field(
        &self,
        key: &str,
    ) -> Option<&[String]> {
        self.list_fields.get(key).map(Vec::as_slice)
    }

    pub fn set_list_field(
        &mut self,
        key: impl Into<String>,
        values: Vec<String>,
    ) {
        self.list_fields.insert(key.into(), values);
    }

    pub fn remove_list_field(
        &mut self,
        key: &str,
    ) -> Option<Vec<String>> {
        self.list_fields.remove(key)
    }
}

impl fmt::Display for Record {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "Record({})", self.id),
        }
    }
}
