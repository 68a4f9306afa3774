//! Asset transfer adapter
//!
//! The vault never moves value itself. Deposits are reported to the adapter
//! with `credit`; claims, emergency claims and sweeps call `debit` after the
//! ledger has already been updated, and the vault rolls the ledger back if
//! `debit` fails.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use types::ids::{AssetId, Principal, VaultId};

/// Transfer failures reported by an adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("custody holds {available} {asset}, cannot release {requested}")]
    InsufficientCustody {
        asset: AssetId,
        requested: Decimal,
        available: Decimal,
    },
}

/// Moves value into and out of custody.
pub trait AssetTransferAdapter: Send {
    /// Pull `amount` of `asset` from `from` into the vault's custody.
    fn credit(
        &mut self,
        vault: VaultId,
        from: &Principal,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), TransferError>;

    /// Release `amount` of `asset` from custody to `recipient`.
    fn debit(
        &mut self,
        recipient: &Principal,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), TransferError>;
}

#[derive(Debug, Default)]
struct Books {
    custody: BTreeMap<AssetId, Decimal>,
    accounts: BTreeMap<(Principal, AssetId), Decimal>,
    blocked: BTreeSet<Principal>,
    transfers: u64,
}

/// In-memory adapter. Clones share the same books, so a handle kept outside
/// the vault observes every transfer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransfer {
    books: Arc<Mutex<Books>>,
}

impl InMemoryTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    fn books(&self) -> MutexGuard<'_, Books> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Amount of `asset` delivered to `principal`.
    pub fn balance_of(&self, principal: &Principal, asset: &AssetId) -> Decimal {
        self.books()
            .accounts
            .get(&(principal.clone(), asset.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Amount of `asset` currently held in custody.
    pub fn custody_balance(&self, asset: &AssetId) -> Decimal {
        self.books().custody.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Make every debit to `recipient` fail until unblocked.
    pub fn block(&self, recipient: impl Into<Principal>) {
        self.books().blocked.insert(recipient.into());
    }

    pub fn unblock(&self, recipient: &Principal) {
        self.books().blocked.remove(recipient);
    }

    /// Number of successful credits and debits.
    pub fn transfer_count(&self) -> u64 {
        self.books().transfers
    }
}

impl AssetTransferAdapter for InMemoryTransfer {
    fn credit(
        &mut self,
        _vault: VaultId,
        _from: &Principal,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        let mut books = self.books();
        let held = books.custody.entry(asset.clone()).or_insert(Decimal::ZERO);
        *held = held
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected("custody overflow".to_string()))?;
        books.transfers += 1;
        Ok(())
    }

    fn debit(
        &mut self,
        recipient: &Principal,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        let mut books = self.books();
        if books.blocked.contains(recipient) {
            return Err(TransferError::Rejected(format!("recipient {recipient} blocked")));
        }
        let available = books.custody.get(asset).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(TransferError::InsufficientCustody {
                asset: asset.clone(),
                requested: amount,
                available,
            });
        }
        books.custody.insert(asset.clone(), available - amount);
        let account = books
            .accounts
            .entry((recipient.clone(), asset.clone()))
            .or_insert(Decimal::ZERO);
        *account += amount;
        books.transfers += 1;
        Ok(())
    }
}
