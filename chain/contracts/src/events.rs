//! Vault events
//!
//! Events are immutable records appended by every successful vault mutation.
//! They carry enough data to rebuild the ledger history off-line.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{AssetId, ConditionId, Principal};
use uuid::Uuid;

use crate::custody::CustodyState;

/// A condition was added to the registry during Setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDefined {
    pub condition_id: ConditionId,
    pub kind: String,
}

/// A release config was bound to a condition during Setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfigured {
    pub config_index: usize,
    pub condition_id: ConditionId,
    pub beneficiary: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
    pub emergency_claimable: bool,
}

/// Custody phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChanged {
    pub from: CustodyState,
    pub to: CustodyState,
    pub by: Principal,
    pub at: i64,
}

/// Assets entered custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposited {
    pub depositor: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
}

/// An approver signed off on an approval-based condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSubmitted {
    pub condition_id: ConditionId,
    pub approver: Principal,
    pub approvals: usize,
    pub required: usize,
}

/// A condition was resolved as met for the first time and its releases credited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionMet {
    pub condition_id: ConditionId,
    pub credited: Vec<BalanceCredited>,
    pub at: i64,
}

/// One release config credited into a claimable balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCredited {
    pub config_index: usize,
    pub beneficiary: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
}

/// Value left custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidOut {
    pub payout_id: Uuid,
    pub recipient: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
    pub kind: PayoutKind,
}

/// Which path released the funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutKind {
    Claim,
    EmergencyClaim,
    Sweep,
}

/// A vote was recorded in an emergency session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyVoteCast {
    pub session: u64,
    pub voter: Principal,
    pub votes: usize,
    pub required: usize,
}

/// Enum wrapper for all vault events, enabling uniform handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    ConditionDefined(ConditionDefined),
    ReleaseConfigured(ReleaseConfigured),
    PhaseChanged(PhaseChanged),
    Deposited(Deposited),
    ApprovalSubmitted(ApprovalSubmitted),
    ConditionMet(ConditionMet),
    PaidOut(PaidOut),
    EmergencyVoteCast(EmergencyVoteCast),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposited_serialization() {
        let event = Deposited {
            depositor: Principal::new("alice"),
            asset: AssetId::new("BTC"),
            amount: Decimal::new(100_000_000, 8),
        };
        let json = serde_json::to_string(&event).unwrap();
        let deser: Deposited = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deser);
    }

    #[test]
    fn test_phase_changed_variant() {
        let event = VaultEvent::PhaseChanged(PhaseChanged {
            from: CustodyState::Active,
            to: CustodyState::Frozen,
            by: Principal::new("sup-1"),
            at: 1_700_000_000,
        });
        assert!(matches!(event, VaultEvent::PhaseChanged(_)));
    }

    #[test]
    fn test_condition_met_serialization() {
        let event = VaultEvent::ConditionMet(ConditionMet {
            condition_id: ConditionId::new(7),
            credited: vec![BalanceCredited {
                config_index: 0,
                beneficiary: Principal::new("bob"),
                asset: AssetId::new("USDT"),
                amount: Decimal::new(500_000, 2),
            }],
            at: 42,
        });
        let json = serde_json::to_string(&event).unwrap();
        let deser: VaultEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deser);
    }
}
