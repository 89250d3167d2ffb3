//! Breaker identity

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key naming the downstream dependency a breaker guards
///
/// Every caller that protects the same dependency must use the same id, since
/// the id is the key of the shared record in the state store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BreakerId(String);

impl BreakerId {
    /// Create an id, rejecting empty or whitespace-only names
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyBreakerId);
        }
        Ok(Self(id))
    }

    /// Derive the id from a deployment variable (e.g. a function or service name)
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        let value = std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))?;
        Self::new(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BreakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BreakerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BreakerId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for BreakerId {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BreakerId> for String {
    fn from(id: BreakerId) -> Self {
        id.0
    }
}
