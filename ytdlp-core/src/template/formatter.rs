//! Named value formatters applied to decoded template values before parsing.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// A formatter rewrites a raw decoded value before it is parsed.
pub type FormatterFn = fn(&str) -> String;

/// Name of the built-in formatter that turns `" 42.5%"` into `"42.5"`.
pub const PERCENT_TO_NUMBER: &str = "percent_to_number";

fn registry() -> &'static RwLock<HashMap<String, FormatterFn>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, FormatterFn>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, FormatterFn> = HashMap::new();
        map.insert(PERCENT_TO_NUMBER.to_string(), clean_percent);
        RwLock::new(map)
    })
}

/// Registers (or replaces) a named formatter for every schema in the process.
pub fn register_formatter(name: impl Into<String>, formatter: FormatterFn) {
    let mut map = registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    map.insert(name.into(), formatter);
}

/// Applies a named formatter. Unknown names leave the value untouched.
pub fn apply_formatter(name: &str, value: &str) -> String {
    let map = registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match map.get(name) {
        Some(formatter) => formatter(value),
        None => value.to_string(),
    }
}

/// Strips percent signs and surrounding whitespace.
pub fn clean_percent(value: &str) -> String {
    value.replace('%', "").trim().to_string()
}
