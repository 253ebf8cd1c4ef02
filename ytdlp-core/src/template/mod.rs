//! Line-template codec for yt-dlp's output formatting engine.
//!
//! A [`TemplateSchema`] is an explicit, ordered description of a struct's
//! fields. Encoding turns it into a `--print` template such as
//!
//! ```text
//! Title=%(title|"")j|Views=%(view_count|0)j|Source="web"
//! ```
//!
//! which yt-dlp expands per video. Decoding parses the expanded
//! `key=value|key=value` line back into the struct.
//!
//! Fields with a tag are substituted by yt-dlp (with a type-appropriate
//! fallback and the `j` conversion for JSON-safe quoting). Fields without a
//! tag are written as literals, and skipped entirely when they hold their
//! zero value.
//!
//! Decoding is lenient: unknown keys are ignored and values that fail to
//! parse leave the target field untouched.

mod formatter;

pub use formatter::{apply_formatter, clean_percent, register_formatter, FormatterFn, PERCENT_TO_NUMBER};

use std::fmt;
use thiserror::Error;

/// Separator between `key=value` pairs.
pub const TEMPLATE_DELIMITER: char = '|';

// ============================================================================
// Errors
// ============================================================================

/// Structural problems in a template line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("malformed template data: empty input")]
    Empty,
    #[error("malformed template data: unexpected '=' character")]
    UnexpectedEquals,
    #[error("malformed template data: incomplete key-value pair")]
    IncompletePair,
    #[error("malformed template data: unbalanced quotes")]
    UnbalancedQuotes,
}

// ============================================================================
// Values and Accessors
// ============================================================================

/// Wire type of a template field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    String,
    Bool,
    Int,
    Float,
}

impl WireType {
    /// Fallback literal yt-dlp substitutes when the referenced field is absent.
    fn fallback(self) -> &'static str {
        match self {
            Self::String => "\"\"",
            Self::Bool => "false",
            Self::Int | Self::Float => "0",
        }
    }
}

enum Accessor<T> {
    Str(fn(&T) -> String, fn(&mut T, String)),
    Bool(fn(&T) -> bool, fn(&mut T, bool)),
    Int(fn(&T) -> i64, fn(&mut T, i64)),
    Float(fn(&T) -> f64, fn(&mut T, f64)),
}

/// One field of a [`TemplateSchema`].
pub struct TemplateField<T> {
    name: &'static str,
    tag: Option<&'static str>,
    formatters: Vec<&'static str>,
    accessor: Accessor<T>,
}

impl<T> TemplateField<T> {
    fn with(name: &'static str, accessor: Accessor<T>) -> Self {
        Self {
            name,
            tag: None,
            formatters: Vec::new(),
            accessor,
        }
    }

    pub fn string(name: &'static str, get: fn(&T) -> String, set: fn(&mut T, String)) -> Self {
        Self::with(name, Accessor::Str(get, set))
    }

    pub fn boolean(name: &'static str, get: fn(&T) -> bool, set: fn(&mut T, bool)) -> Self {
        Self::with(name, Accessor::Bool(get, set))
    }

    pub fn int(name: &'static str, get: fn(&T) -> i64, set: fn(&mut T, i64)) -> Self {
        Self::with(name, Accessor::Int(get, set))
    }

    pub fn float(name: &'static str, get: fn(&T) -> f64, set: fn(&mut T, f64)) -> Self {
        Self::with(name, Accessor::Float(get, set))
    }

    /// Makes the field a substituted reference, e.g. `"progress._percent_str"`.
    pub fn tag(mut self, expression: &'static str) -> Self {
        self.tag = Some(expression);
        self
    }

    /// Adds a named formatter, applied in order during decoding.
    pub fn formatter(mut self, name: &'static str) -> Self {
        if !self.formatters.contains(&name) {
            self.formatters.push(name);
        }
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn wire_type(&self) -> WireType {
        match self.accessor {
            Accessor::Str(..) => WireType::String,
            Accessor::Bool(..) => WireType::Bool,
            Accessor::Int(..) => WireType::Int,
            Accessor::Float(..) => WireType::Float,
        }
    }

    /// Renders `Name=...`, or `None` for an untagged zero value.
    fn encode(&self, value: &T) -> Option<String> {
        if let Some(tag) = self.tag {
            return Some(format!(
                "{}=%({}|{})j",
                self.name,
                tag,
                self.wire_type().fallback()
            ));
        }

        let literal = match &self.accessor {
            Accessor::Str(get, _) => {
                let v = get(value);
                if v.is_empty() {
                    return None;
                }
                // JSON quoting, the same escaping yt-dlp applies to `j` values.
                serde_json::Value::String(v).to_string()
            }
            Accessor::Bool(get, _) => {
                let v = get(value);
                if !v {
                    return None;
                }
                v.to_string()
            }
            Accessor::Int(get, _) => {
                let v = get(value);
                if v == 0 {
                    return None;
                }
                v.to_string()
            }
            Accessor::Float(get, _) => {
                let v = get(value);
                if v == 0.0 {
                    return None;
                }
                v.to_string()
            }
        };

        Some(format!("{}={}", self.name, literal))
    }

    fn assign(&self, target: &mut T, raw: &str) {
        let mut value = raw.to_string();
        for name in &self.formatters {
            value = apply_formatter(name, &value);
        }

        match &self.accessor {
            Accessor::Str(_, set) => set(target, value),
            Accessor::Bool(_, set) => {
                if let Some(v) = parse_bool(&value) {
                    set(target, v);
                }
            }
            Accessor::Int(_, set) => {
                if let Ok(v) = value.parse::<i64>() {
                    set(target, v);
                }
            }
            Accessor::Float(_, set) => {
                if let Ok(v) = value.parse::<f64>() {
                    set(target, v);
                }
            }
        }
    }
}

impl<T> fmt::Debug for TemplateField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateField")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("wire_type", &self.wire_type())
            .field("formatters", &self.formatters)
            .finish()
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Ordered field list describing how a `T` maps to a template line.
pub struct TemplateSchema<T> {
    fields: Vec<TemplateField<T>>,
}

impl<T> Default for TemplateSchema<T> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<T> fmt::Debug for TemplateSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.fields).finish()
    }
}

impl<T> TemplateSchema<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: TemplateField<T>) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[TemplateField<T>] {
        &self.fields
    }

    /// Encodes `value` into a template line.
    pub fn encode(&self, value: &T) -> String {
        let delimiter = TEMPLATE_DELIMITER.to_string();
        self.fields
            .iter()
            .filter_map(|field| field.encode(value))
            .collect::<Vec<_>>()
            .join(&delimiter)
    }

    /// Decodes a template line into an existing value, returning how many
    /// keys matched a schema field.
    ///
    /// Only structural problems are errors. Missing keys, unknown keys and
    /// unparseable values are ignored.
    pub fn decode_into(&self, line: &str, target: &mut T) -> Result<usize, TemplateError> {
        if line.is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut matched = 0;
        for (key, raw) in split_pairs(line)? {
            if let Some(field) = self.fields.iter().find(|f| f.name == key) {
                field.assign(target, &unquote(&raw));
                matched += 1;
            }
        }

        Ok(matched)
    }

    /// Decodes a template line into a fresh value.
    pub fn decode(&self, line: &str) -> Result<T, TemplateError>
    where
        T: Default,
    {
        let mut value = T::default();
        self.decode_into(line, &mut value)?;
        Ok(value)
    }
}

// ============================================================================
// Line Parsing
// ============================================================================

/// Splits `k=v|k=v` respecting double quotes and `\"` escapes.
fn split_pairs(line: &str) -> Result<Vec<(String, String)>, TemplateError> {
    let mut pairs = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_quotes = false;
    let mut previous: Option<char> = None;

    for ch in line.chars() {
        match ch {
            '"' => {
                if previous != Some('\\') {
                    in_quotes = !in_quotes;
                }
                value.push(ch);
            }
            '=' if !in_quotes => {
                if !key.is_empty() {
                    return Err(TemplateError::UnexpectedEquals);
                }
                key = value.trim().to_string();
                value.clear();
            }
            TEMPLATE_DELIMITER if !in_quotes => {
                if key.is_empty() || value.is_empty() {
                    return Err(TemplateError::IncompletePair);
                }
                pairs.push((std::mem::take(&mut key), value.trim().to_string()));
                value.clear();
            }
            _ => value.push(ch),
        }
        previous = Some(ch);
    }

    if in_quotes {
        return Err(TemplateError::UnbalancedQuotes);
    }

    if !key.is_empty() && !value.is_empty() {
        pairs.push((key, value.trim().to_string()));
    }

    Ok(pairs)
}

/// Decodes a JSON string literal. Anything else has one pair of
/// surrounding quotes removed and `\"` unescaped.
fn unquote(raw: &str) -> String {
    if raw.starts_with('"') {
        if let Ok(decoded) = serde_json::from_str::<String>(raw) {
            return decoded;
        }
    }
    let inner = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    inner.replace("\\\"", "\"")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
