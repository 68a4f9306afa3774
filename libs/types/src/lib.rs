//! Shared types for the conditional custody vault
//!
//! Identifier and amount types used by the custody engine and by anything that
//! talks to it (adapters, directories, snapshot tooling).
//!
//! # Modules
//! - `ids`: Identifiers (ConditionId, Principal, AssetId, VaultId)
//! - `numeric`: Decimal amount helpers

pub mod ids;
pub mod numeric;
