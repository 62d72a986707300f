//! Read-only view over configuration values with dot-notation lookup.

use serde::Serialize;
use serde_json::Value;

use crate::error::ConfigError;

/// Immutable configuration repository.
///
/// Values are addressed either by a top-level key or by a dotted path
/// (`"session.lifetime"`). Any attempt to write through the repository fails
/// with [`ConfigError::Immutable`].
#[derive(Debug, Clone)]
pub struct Repository {
    values: Value,
}

impl Repository {
    pub fn new(values: Value) -> Self {
        Self { values }
    }

    /// Build a repository from any serializable config struct.
    pub fn from_config<T: Serialize>(config: &T) -> Result<Self, ConfigError> {
        Ok(Self::new(serde_json::to_value(config)?))
    }

    /// Look up a value; `None` when the path is missing or resolves to null.
    pub fn get(&self, index: &str) -> Option<&Value> {
        if let Some(v) = self.values.get(index) {
            return Some(v).filter(|v| !v.is_null());
        }

        let mut current = &self.values;
        for segment in index.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current).filter(|v| !v.is_null())
    }

    pub fn get_or<'a>(&'a self, index: &str, default: &'a Value) -> &'a Value {
        self.get(index).unwrap_or(default)
    }

    pub fn has(&self, index: &str) -> bool {
        self.get(index).is_some()
    }

    pub fn set(&mut self, index: &str, _value: Value) -> Result<(), ConfigError> {
        Err(ConfigError::Immutable(index.to_string()))
    }

    pub fn remove(&mut self, index: &str) -> Result<(), ConfigError> {
        Err(ConfigError::Immutable(index.to_string()))
    }

    pub fn all(&self) -> &Value {
        &self.values
    }
}
