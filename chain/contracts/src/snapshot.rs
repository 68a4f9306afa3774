//! Vault snapshots — full persisted state with a SHA-256 integrity checksum
//!
//! Every map in [`VaultState`] is ordered, so serializing the same state
//! always yields the same bytes and the same checksum.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use types::ids::{AssetId, VaultId};

use crate::condition::Condition;
use crate::config::VaultConfig;
use crate::custody::{CustodyState, EmergencyVoteSession};
use crate::ledger::{ClaimableEntry, EmergencyClaimRecord, ReleaseConfig};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),
}

// ── Vault State ─────────────────────────────────────────────────────

/// Everything a vault persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultState {
    pub vault_id: VaultId,
    pub config: VaultConfig,
    pub phase: CustodyState,
    pub conditions: Vec<Condition>,
    pub release_configs: Vec<ReleaseConfig>,
    pub claimable: Vec<ClaimableEntry>,
    pub deposited: BTreeMap<AssetId, Decimal>,
    pub paid_out: BTreeMap<AssetId, Decimal>,
    pub emergency_claims: Vec<EmergencyClaimRecord>,
    pub vote_session: Option<EmergencyVoteSession>,
    pub concluded_sessions: Vec<EmergencyVoteSession>,
    pub next_session_version: u64,
    /// Hex graph digest recorded at activation.
    pub graph_digest: Option<String>,
}

impl VaultState {
    /// Hex SHA-256 of the serialized state.
    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    /// Snapshot format version for forward compatibility.
    pub version: u32,
    /// Unix seconds when the snapshot was taken.
    pub taken_at: i64,
    /// SHA-256 hash of the serialized state.
    pub checksum: String,
    pub state: VaultState,
}

impl VaultSnapshot {
    /// Wrap a state with its computed checksum.
    pub fn seal(state: VaultState, taken_at: i64) -> Result<Self, SnapshotError> {
        let checksum = state.compute_hash()?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            taken_at,
            checksum,
            state,
        })
    }

    /// Check format version and checksum.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        let actual = self.state.compute_hash()?;
        if actual != self.checksum {
            return Err(SnapshotError::IntegrityFailure {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }

    /// Parse and verify a snapshot.
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self =
            serde_json::from_str(raw).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        snapshot.verify()?;
        Ok(snapshot)
    }
}
