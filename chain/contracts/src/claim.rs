//! Claim service — pays ledger balances out through the transfer adapter
//!
//! Every payout is booked on the ledger first and only then handed to the
//! adapter. A failed transfer rolls the booking back, so the ledger never
//! shows value as paid that did not leave custody.

use tracing::{info, warn};
use types::ids::{AssetId, ConditionId, Principal};
use uuid::Uuid;

use crate::adapter::AssetTransferAdapter;
use crate::errors::LedgerError;
use crate::events::{PaidOut, PayoutKind};
use crate::ledger::{PendingPayout, ReleaseLedger};

pub struct ClaimService<'a> {
    ledger: &'a mut ReleaseLedger,
    transfer: &'a mut dyn AssetTransferAdapter,
}

impl<'a> ClaimService<'a> {
    pub fn new(ledger: &'a mut ReleaseLedger, transfer: &'a mut dyn AssetTransferAdapter) -> Self {
        Self { ledger, transfer }
    }

    /// Pay the full claimable balance of `(beneficiary, asset)`.
    pub fn claim(
        &mut self,
        beneficiary: &Principal,
        asset: &AssetId,
    ) -> Result<PaidOut, LedgerError> {
        let pending = self.ledger.book_claim(beneficiary, asset)?;
        self.settle(pending, PayoutKind::Claim)
    }

    /// Pay every unclaimed emergency-flagged config of `(beneficiary, asset)`.
    /// `credited` reports whether a condition has already been resolved as
    /// met, in which case its amount comes out of the claimable balance.
    pub fn emergency_claim<F>(
        &mut self,
        beneficiary: &Principal,
        asset: &AssetId,
        credited: F,
    ) -> Result<PaidOut, LedgerError>
    where
        F: Fn(&ConditionId) -> bool,
    {
        let pending = self.ledger.book_emergency_claim(beneficiary, asset, credited)?;
        self.settle(pending, PayoutKind::EmergencyClaim)
    }

    /// Pay the uncommitted remainder of `asset` to `recipient`.
    pub fn sweep(
        &mut self,
        recipient: &Principal,
        asset: &AssetId,
    ) -> Result<PaidOut, LedgerError> {
        let pending = self.ledger.book_remainder(recipient, asset)?;
        self.settle(pending, PayoutKind::Sweep)
    }

    fn settle(&mut self, pending: PendingPayout, kind: PayoutKind) -> Result<PaidOut, LedgerError> {
        if let Err(e) = self.transfer.debit(&pending.recipient, &pending.asset, pending.amount) {
            warn!(
                recipient = %pending.recipient,
                asset = %pending.asset,
                amount = %pending.amount,
                error = %e,
                "Transfer failed, rolling back payout"
            );
            self.ledger.rollback(&pending);
            return Err(LedgerError::TransferFailed {
                asset: pending.asset,
                reason: e.to_string(),
            });
        }

        let paid = PaidOut {
            payout_id: Uuid::now_v7(),
            recipient: pending.recipient,
            asset: pending.asset,
            amount: pending.amount,
            kind,
        };
        info!(
            payout_id = %paid.payout_id,
            recipient = %paid.recipient,
            asset = %paid.asset,
            amount = %paid.amount,
            kind = ?kind,
            "Payout settled"
        );
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryTransfer;
    use crate::ledger::ReleaseConfig;
    use rust_decimal::Decimal;
    use types::ids::VaultId;

    fn setup(emergency: bool) -> (ReleaseLedger, InMemoryTransfer) {
        let mut ledger = ReleaseLedger::new();
        let mut transfer = InMemoryTransfer::new();
        ledger
            .configure(ReleaseConfig {
                condition_id: ConditionId::new(1),
                beneficiary: "bob".into(),
                asset: "BTC".into(),
                amount: Decimal::from(3),
                emergency_claimable: emergency,
            })
            .unwrap();
        let total = ledger.check_deposit(&"BTC".into(), Decimal::from(10)).unwrap();
        ledger.set_deposited("BTC".into(), total);
        transfer
            .credit(VaultId::new(), &"alice".into(), &"BTC".into(), Decimal::from(10))
            .unwrap();
        (ledger, transfer)
    }

    #[test]
    fn test_claim_pays_and_zeroes() {
        let (mut ledger, mut transfer) = setup(false);
        let plan = ledger.plan_credits(&[ConditionId::new(1)]).unwrap();
        ledger.apply_credits(plan);

        let paid = ClaimService::new(&mut ledger, &mut transfer)
            .claim(&"bob".into(), &"BTC".into())
            .unwrap();
        assert_eq!(paid.amount, Decimal::from(3));
        assert_eq!(paid.kind, PayoutKind::Claim);
        assert_eq!(ledger.claimable(&"bob".into(), &"BTC".into()), Decimal::ZERO);
        assert_eq!(transfer.balance_of(&"bob".into(), &"BTC".into()), Decimal::from(3));
    }

    #[test]
    fn test_failed_transfer_restores_balance() {
        let (mut ledger, mut transfer) = setup(false);
        let plan = ledger.plan_credits(&[ConditionId::new(1)]).unwrap();
        ledger.apply_credits(plan);
        transfer.block("bob");

        let err = ClaimService::new(&mut ledger, &mut transfer)
            .claim(&"bob".into(), &"BTC".into())
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { .. }));
        assert_eq!(ledger.claimable(&"bob".into(), &"BTC".into()), Decimal::from(3));
        assert_eq!(ledger.paid_out(&"BTC".into()), Decimal::ZERO);
    }

    #[test]
    fn test_emergency_claim_failure_allows_retry() {
        let (mut ledger, mut transfer) = setup(true);
        transfer.block("bob");
        assert!(ClaimService::new(&mut ledger, &mut transfer)
            .emergency_claim(&"bob".into(), &"BTC".into(), |_| false)
            .is_err());
        assert!(!ledger.is_emergency_claimed(&"bob".into(), 0));

        transfer.unblock(&"bob".into());
        let paid = ClaimService::new(&mut ledger, &mut transfer)
            .emergency_claim(&"bob".into(), &"BTC".into(), |_| false)
            .unwrap();
        assert_eq!(paid.kind, PayoutKind::EmergencyClaim);
        assert!(ledger.is_emergency_claimed(&"bob".into(), 0));
    }

    #[test]
    fn test_sweep_pays_remainder() {
        let (mut ledger, mut transfer) = setup(false);
        let paid = ClaimService::new(&mut ledger, &mut transfer)
            .sweep(&"op".into(), &"BTC".into())
            .unwrap();
        assert_eq!(paid.amount, Decimal::from(10));
        assert_eq!(transfer.custody_balance(&"BTC".into()), Decimal::ZERO);
    }
}
