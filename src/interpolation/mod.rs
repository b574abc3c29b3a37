//! `${token}` interpolation against local options and driver constants, plus
//! `:name` bind rewriting.
//!
//! A configuration string that is *exactly* `${identifier}` is replaced by the
//! same-named property of the local scope when present, otherwise by the
//! same-named driver constant. Anything else (including unresolved tokens) is left
//! as written.

mod parsers;
mod placeholders;
mod scanner;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

pub use placeholders::{PlaceholderStyle, RewrittenSql, rewrite_named_binds};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("token pattern is valid")
});

/// The identifier inside a `${identifier}` token, if `raw` is exactly one token.
#[must_use]
pub fn token_name(raw: &str) -> Option<&str> {
    TOKEN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Constants exposed by a driver for `${token}` resolution.
#[derive(Debug, Clone, Default)]
pub struct DriverConstants {
    values: BTreeMap<String, Value>,
    isolation_levels: BTreeMap<String, Value>,
}

impl DriverConstants {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_isolation_level(mut self, name: impl Into<String>, value: Value) -> Self {
        self.isolation_levels.insert(name.into(), value);
        self
    }

    /// Module-level constants (type tags and the like).
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// The `ISOLATION_LEVEL` namespace.
    #[must_use]
    pub fn isolation_levels(&self) -> &BTreeMap<String, Value> {
        &self.isolation_levels
    }
}

/// Two-tier `${token}` resolver injected into a dialect.
pub trait Interpolator: Send + Sync {
    /// Resolve `token` against `local` first, then `constants`.
    fn resolve(
        &self,
        token: &str,
        local: &Map<String, Value>,
        constants: &BTreeMap<String, Value>,
    ) -> Option<Value>;

    /// Interpolate a single value; non-token values are cloned unchanged.
    fn interpolate_value(
        &self,
        value: &Value,
        local: &Map<String, Value>,
        constants: &BTreeMap<String, Value>,
    ) -> Value {
        match value {
            Value::String(raw) => token_name(raw)
                .and_then(|token| self.resolve(token, local, constants))
                .unwrap_or_else(|| value.clone()),
            Value::Object(map) => Value::Object(self.interpolate_map(map, local, constants)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.interpolate_value(item, local, constants))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Interpolate every value of `source`, descending into nested objects.
    fn interpolate_map(
        &self,
        source: &Map<String, Value>,
        local: &Map<String, Value>,
        constants: &BTreeMap<String, Value>,
    ) -> Map<String, Value> {
        source
            .iter()
            .map(|(key, value)| (key.clone(), self.interpolate_value(value, local, constants)))
            .collect()
    }
}

/// Default resolver: exact-name lookup, local scope wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenInterpolator;

impl Interpolator for TokenInterpolator {
    fn resolve(
        &self,
        token: &str,
        local: &Map<String, Value>,
        constants: &BTreeMap<String, Value>,
    ) -> Option<Value> {
        local
            .get(token)
            .filter(|v| !v.is_null())
            .or_else(|| constants.get(token))
            .cloned()
    }
}
