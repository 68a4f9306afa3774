//! Shared vault handle
//!
//! Wraps a vault in `Arc<Mutex<_>>` so callers on different threads serialize
//! through one critical section. The lock is held for the whole operation,
//! including the transfer adapter call.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use types::ids::{AssetId, ConditionId, Principal};

use crate::custody::{CustodyState, VoteOutcome};
use crate::errors::VaultError;
use crate::events::PaidOut;
use crate::vault::{ApprovalReceipt, ConditionalVault};

#[derive(Debug, Clone)]
pub struct SharedVault {
    inner: Arc<Mutex<ConditionalVault>>,
}

impl SharedVault {
    pub fn new(vault: ConditionalVault) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vault)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConditionalVault> {
        // Every operation either commits or leaves the vault untouched, so a
        // poisoned lock still guards consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside the critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut ConditionalVault) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn phase(&self) -> CustodyState {
        self.lock().phase()
    }

    pub fn deposit(
        &self,
        depositor: &Principal,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), VaultError> {
        self.lock().deposit(depositor, asset, amount)
    }

    pub fn submit_approval(
        &self,
        approver: &Principal,
        id: ConditionId,
    ) -> Result<ApprovalReceipt, VaultError> {
        self.lock().submit_approval(approver, id)
    }

    pub fn resolve(&self, id: ConditionId) -> Result<bool, VaultError> {
        self.lock().resolve(id)
    }

    pub fn claim(&self, beneficiary: &Principal, asset: &AssetId) -> Result<PaidOut, VaultError> {
        self.lock().claim(beneficiary, asset)
    }

    pub fn vote_emergency(&self, caller: &Principal) -> Result<VoteOutcome, VaultError> {
        self.lock().vote_emergency(caller)
    }

    pub fn emergency_claim(
        &self,
        beneficiary: &Principal,
        asset: &AssetId,
    ) -> Result<PaidOut, VaultError> {
        self.lock().emergency_claim(beneficiary, asset)
    }

    pub fn get_claimable(&self, beneficiary: &Principal, asset: &AssetId) -> Decimal {
        self.lock().get_claimable(beneficiary, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryTransfer;
    use crate::clock::ManualClock;
    use crate::config::VaultConfig;
    use crate::security::AccessControl;

    #[test]
    fn test_clones_share_one_vault() {
        let vault = ConditionalVault::new(
            VaultConfig::default(),
            AccessControl::new("op"),
            InMemoryTransfer::new(),
            ManualClock::new(0),
        )
        .unwrap();
        let a = SharedVault::new(vault);
        let b = a.clone();
        a.with(|v| v.activate(&"op".into())).unwrap();
        assert_eq!(b.phase(), CustodyState::Active);
        b.deposit(&"alice".into(), &"BTC".into(), Decimal::ONE).unwrap();
        assert_eq!(a.with(|v| v.total_deposited(&"BTC".into())), Decimal::ONE);
    }
}
