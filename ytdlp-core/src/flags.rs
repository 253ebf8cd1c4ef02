//! Command-line flag values and the ordered flag set a [`Command`] carries.
//!
//! A [`Flag`] is a single argument unit: the literal switch plus zero or more
//! typed values. Its `id` groups mutually exclusive variants (e.g.
//! `--progress` and `--no-progress` share one id) so that setting one clears
//! the other.
//!
//! [`Command`]: crate::Command

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Flag Arguments
// ============================================================================

/// A single typed value following a flag token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagArg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for FlagArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for FlagArg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FlagArg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FlagArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FlagArg {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FlagArg {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FlagArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// ============================================================================
// Flag
// ============================================================================

/// One command-line argument unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    /// De-duplication key. Not unique across variants of the same option.
    pub id: String,
    /// Literal token, e.g. `--print`.
    pub flag: String,
    /// Whether the flag may appear more than once.
    #[serde(default)]
    pub allows_multiple: bool,
    /// Values following the token. Empty for boolean switches.
    #[serde(default)]
    pub args: Vec<FlagArg>,
}

impl Flag {
    /// Creates a boolean switch.
    pub fn new(id: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flag: flag.into(),
            allows_multiple: false,
            args: Vec::new(),
        }
    }

    /// Appends an argument value.
    pub fn arg(mut self, value: impl Into<FlagArg>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Marks the flag as repeatable.
    pub fn repeatable(mut self) -> Self {
        self.allows_multiple = true;
        self
    }

    /// Flattens the flag into argv tokens.
    pub fn raw(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.args.len());
        out.push(self.flag.clone());
        out.extend(self.args.iter().map(ToString::to_string));
        out
    }
}

// ============================================================================
// Flag Set
// ============================================================================

/// Ordered collection of active flags, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(Vec<Flag>);

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a flag.
    ///
    /// A non-repeatable flag replaces the first existing entry sharing its id
    /// (keeping that entry's position) and drops any further entries with the
    /// same id.
    pub fn add(&mut self, flag: Flag) {
        if flag.allows_multiple {
            self.0.push(flag);
            return;
        }

        match self.0.iter().position(|f| f.id == flag.id) {
            Some(index) => {
                let id = flag.id.clone();
                self.0[index] = flag;
                let mut seen = 0usize;
                self.0.retain(|f| {
                    if f.id != id {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.0.push(flag),
        }
    }

    /// Removes every flag with the given id. Returns how many were removed.
    pub fn remove_by_id(&mut self, id: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|f| f.id != id);
        before - self.0.len()
    }

    /// Returns all flags with the given id, in order.
    pub fn find_by_id(&self, id: &str) -> Vec<&Flag> {
        self.0.iter().filter(|f| f.id == id).collect()
    }

    /// Returns non-repeatable flags whose id occurs more than once.
    pub fn duplicates(&self) -> Vec<&Flag> {
        self.0
            .iter()
            .filter(|f| !f.allows_multiple)
            .filter(|f| {
                self.0
                    .iter()
                    .filter(|other| !other.allows_multiple && other.id == f.id)
                    .count()
                    > 1
            })
            .collect()
    }

    /// Flattens every flag into argv tokens, in insertion order.
    pub fn raw(&self) -> Vec<String> {
        self.0.iter().flat_map(Flag::raw).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Flags {
    type Item = &'a Flag;
    type IntoIter = std::slice::Iter<'a, Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
