//! Metadata yt-dlp prints for each extracted video or playlist.
//!
//! Only the fields the orchestrator itself relies on are typed. Everything
//! else is kept in [`ExtractedInfo::extra`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One extracted-info object, as printed by `--dump-json` / `--print %(j)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_count: Option<i64>,
    /// Remaining fields, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExtractedInfo {
    /// Parses a JSON value, treating yt-dlp's `"none"` placeholder as null.
    pub fn from_json(value: &Value) -> serde_json::Result<Self> {
        let mut cleaned = value.clone();
        clean_none(&mut cleaned);
        serde_json::from_value(cleaned)
    }

    /// True when the object is a real extraction result rather than an
    /// arbitrary JSON line.
    pub fn is_extraction(&self) -> bool {
        self.kind.as_deref().is_some_and(|k| !k.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Replaces every `"none"` string with null, recursively.
pub(crate) fn clean_none(value: &mut Value) {
    if matches!(value, Value::String(s) if s == "none") {
        *value = Value::Null;
        return;
    }
    match value {
        Value::Array(items) => items.iter_mut().for_each(clean_none),
        Value::Object(map) => map.values_mut().for_each(clean_none),
        _ => {}
    }
}
