//! Vault configuration
//!
//! Plain struct with defaults, loadable from JSON. Unknown fields are
//! rejected so a typo cannot silently fall back to a default.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default emergency vote session lifetime: 24h.
pub const DEFAULT_VOTE_SESSION_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Fraction of the supervisor set whose votes declare an emergency.
    pub quorum: Decimal,
    /// Seconds after its first vote at which an open emergency session
    /// expires. `None` keeps votes indefinitely.
    pub vote_session_ttl_secs: Option<i64>,
    /// Resolve an approval condition right after each accepted approval.
    pub auto_resolve_on_approval: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            quorum: Decimal::new(51, 2),
            vote_session_ttl_secs: Some(DEFAULT_VOTE_SESSION_TTL_SECS),
            auto_resolve_on_approval: false,
        }
    }
}

impl VaultConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quorum <= Decimal::ZERO || self.quorum > Decimal::ONE {
            return Err(ConfigError::InvalidQuorum(self.quorum));
        }
        if let Some(ttl) = self.vote_session_ttl_secs {
            if ttl <= 0 {
                return Err(ConfigError::InvalidSessionTtl(ttl));
            }
        }
        Ok(())
    }
}
