//! Conditional custody vault
//!
//! Holds deposited assets and releases them to beneficiaries once configured
//! release conditions are met. Conditions are time locks, threshold
//! approvals, or the AND of other conditions. A custody state machine gates
//! every operation and lets supervisors freeze the vault or vote it into an
//! emergency, in which only pre-flagged releases are payable.
//!
//! # Modules
//! - `condition`, `registry`: condition definitions and the condition graph
//! - `evaluator`: idempotent, bottom-up resolution of conditions
//! - `ledger`: release configs, claimable balances, custody totals
//! - `claim`: payouts through the transfer adapter with rollback
//! - `custody`: phases and emergency vote sessions
//! - `security`, `adapter`, `clock`: external collaborator seams
//! - `vault`: the [`vault::ConditionalVault`] facade; `shared`: thread-safe handle
//! - `snapshot`, `digest`: persistence and SHA-256 integrity
//! - `config`, `errors`, `events`: ambient types

pub mod adapter;
pub mod claim;
pub mod clock;
pub mod condition;
pub mod config;
pub mod custody;
pub mod digest;
pub mod errors;
pub mod evaluator;
pub mod events;
pub mod ledger;
pub mod registry;
pub mod security;
pub mod shared;
pub mod snapshot;
pub mod vault;

pub use config::VaultConfig;
pub use custody::{CustodyState, VoteOutcome};
pub use errors::{ErrorKind, VaultError};
pub use shared::SharedVault;
pub use vault::ConditionalVault;

/// Snapshot and event schema version — bump on incompatible changes
pub const CONTRACT_ABI_VERSION: &str = "1.0.0";
