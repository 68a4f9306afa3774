//! Vault error types
//!
//! Error taxonomy for condition definition and resolution, ledger accounting,
//! custody-state transitions and configuration. Every error maps onto an
//! [`ErrorKind`] so callers can tell "not yet eligible" apart from
//! "permanently invalid".

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::ids::{AssetId, ConditionId, Principal};

use crate::custody::CustodyState;
use crate::snapshot::SnapshotError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidPhase,
    Unauthorized,
    InvalidInput,
    AlreadyApproved,
    AlreadyVoted,
    AlreadyClaimed,
    InsufficientBalance,
    ArithmeticOverflow,
    StructuralError,
    TransferFailed,
}

/// Condition registry and evaluator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Condition id already defined: {id}")]
    DuplicateId { id: ConditionId },

    #[error("Invalid approval threshold: {required} of {approvers} approvers")]
    InvalidThreshold { required: usize, approvers: usize },

    #[error("Compound condition {id} has no children")]
    EmptyChildList { id: ConditionId },

    #[error("Compound condition {parent} references unknown child {child}")]
    UnknownChild {
        parent: ConditionId,
        child: ConditionId,
    },

    #[error("Condition not found: {id}")]
    UnknownCondition { id: ConditionId },

    #[error("Cycle detected in condition graph at {id}")]
    CycleDetected { id: ConditionId },

    #[error("Condition {id} is marked processed but not met")]
    ProcessedUnmet { id: ConditionId },

    #[error("Condition {id} is not approval-based")]
    NotApprovalCondition { id: ConditionId },

    #[error("{principal} is not an approver of {id}")]
    NotAnApprover { id: ConditionId, principal: Principal },

    #[error("{principal} already approved {id}")]
    AlreadyApproved { id: ConditionId, principal: Principal },
}

/// Release ledger and claim errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Nothing to claim for {beneficiary} in {asset}")]
    NothingToClaim {
        beneficiary: Principal,
        asset: AssetId,
    },

    #[error("Emergency allocation for {beneficiary} in {asset} already claimed")]
    AlreadyClaimed {
        beneficiary: Principal,
        asset: AssetId,
    },

    #[error("Insufficient balance for {asset}: required {required}, available {available}")]
    InsufficientBalance {
        asset: AssetId,
        required: String,
        available: String,
    },

    #[error("Release config index out of range: {index}")]
    UnknownConfig { index: usize },

    #[error("Arithmetic overflow in balance calculation")]
    Overflow,

    #[error("Transfer of {asset} failed: {reason}")]
    TransferFailed { asset: AssetId, reason: String },
}

impl LedgerError {
    pub(crate) fn insufficient(asset: &AssetId, required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            asset: asset.clone(),
            required: required.to_string(),
            available: available.to_string(),
        }
    }
}

/// Custody state machine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CustodyError {
    #[error("Operation {operation} not permitted in {phase:?} phase")]
    InvalidPhase {
        operation: &'static str,
        phase: CustodyState,
    },

    #[error("Unauthorized: {principal} may not {operation}")]
    Unauthorized {
        principal: Principal,
        operation: &'static str,
    },

    #[error("{principal} already voted in emergency session {session}")]
    AlreadyVoted { principal: Principal, session: u64 },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse vault config: {0}")]
    Parse(String),

    #[error("Quorum must be in (0, 1], got {0}")]
    InvalidQuorum(Decimal),

    #[error("Vote session TTL must be positive, got {0}")]
    InvalidSessionTtl(i64),
}

/// Top-level vault error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VaultError {
    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl VaultError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Condition(e) => match e {
                ConditionError::DuplicateId { .. }
                | ConditionError::InvalidThreshold { .. }
                | ConditionError::NotApprovalCondition { .. } => ErrorKind::InvalidInput,
                ConditionError::EmptyChildList { .. }
                | ConditionError::UnknownChild { .. }
                | ConditionError::CycleDetected { .. }
                | ConditionError::ProcessedUnmet { .. } => ErrorKind::StructuralError,
                ConditionError::UnknownCondition { .. } => ErrorKind::NotFound,
                ConditionError::NotAnApprover { .. } => ErrorKind::Unauthorized,
                ConditionError::AlreadyApproved { .. } => ErrorKind::AlreadyApproved,
            },
            VaultError::Ledger(e) => match e {
                LedgerError::InvalidAmount => ErrorKind::InvalidInput,
                LedgerError::NothingToClaim { .. } | LedgerError::InsufficientBalance { .. } => {
                    ErrorKind::InsufficientBalance
                }
                LedgerError::AlreadyClaimed { .. } => ErrorKind::AlreadyClaimed,
                LedgerError::UnknownConfig { .. } => ErrorKind::NotFound,
                LedgerError::Overflow => ErrorKind::ArithmeticOverflow,
                LedgerError::TransferFailed { .. } => ErrorKind::TransferFailed,
            },
            VaultError::Custody(e) => match e {
                CustodyError::InvalidPhase { .. } => ErrorKind::InvalidPhase,
                CustodyError::Unauthorized { .. } => ErrorKind::Unauthorized,
                CustodyError::AlreadyVoted { .. } => ErrorKind::AlreadyVoted,
            },
            VaultError::Config(_) => ErrorKind::InvalidInput,
            VaultError::Snapshot(_) => ErrorKind::StructuralError,
        }
    }

    /// True when the same call may succeed later without any change to its
    /// arguments (phase change, more deposits, adapter recovery).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidPhase | ErrorKind::InsufficientBalance | ErrorKind::TransferFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_error_display() {
        let err = ConditionError::UnknownChild {
            parent: ConditionId::new(3),
            child: ConditionId::new(9),
        };
        assert_eq!(
            err.to_string(),
            "Compound condition cond-3 references unknown child cond-9"
        );
    }

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::insufficient(&AssetId::new("BTC"), Decimal::from(5), Decimal::ONE);
        assert!(err.to_string().contains("required 5"));
    }

    #[test]
    fn test_vault_error_from_custody() {
        let custody_err = CustodyError::InvalidPhase {
            operation: "deposit",
            phase: CustodyState::Setup,
        };
        let err: VaultError = custody_err.into();
        assert!(matches!(err, VaultError::Custody(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidPhase);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_structural_errors_are_permanent() {
        let err: VaultError = ConditionError::CycleDetected {
            id: ConditionId::new(1),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::StructuralError);
        assert!(!err.is_retryable());

        let err: VaultError = ConditionError::UnknownCondition {
            id: ConditionId::new(1),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transfer_failure_is_retryable() {
        let err: VaultError = LedgerError::TransferFailed {
            asset: AssetId::new("ETH"),
            reason: "rpc down".to_string(),
        }
        .into();
        assert!(err.is_retryable());
    }
}
