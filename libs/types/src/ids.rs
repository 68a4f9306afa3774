//! Identifier types for vault entities
//!
//! Condition ids are caller-chosen integers so that a condition graph can be
//! written down before any of it exists. Principals and assets are opaque
//! strings owned by the outside world. Vault ids use UUID v7.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller-assigned identifier of a release condition.
///
/// Ordering is numeric, which keeps every map keyed by condition
/// deterministic when serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(u64);

impl ConditionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConditionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cond-{}", self.0)
    }
}

/// An externally managed identity (operator, supervisor, approver, beneficiary).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Principal {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Asset symbol held in custody (e.g. "BTC", "USDT").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier of a vault instance
///
/// Uses UUID v7 so vault ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(Uuid);

impl VaultId {
    /// Create a new VaultId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for VaultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
