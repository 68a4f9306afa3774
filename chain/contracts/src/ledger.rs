//! Release ledger — release configs, claimable balances, custody totals
//!
//! Tracks, per asset, what entered custody (`deposited`), what left it
//! (`paid_out`) and what is owed to beneficiaries (`claimable`). Every
//! mutation preserves ledger conservation:
//!
//! `sum(claimable[*][asset]) + paid_out[asset] <= deposited[asset]`
//!
//! Crediting is staged: the evaluator asks for a [`CreditPlan`], which fails
//! without side effects if it would overflow or over-commit an asset, and
//! only then applies it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use types::ids::{AssetId, ConditionId, Principal};
use types::numeric::{checked_sum, is_valid_amount};

use crate::errors::LedgerError;

/// Binding of a condition to a payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub condition_id: ConditionId,
    pub beneficiary: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
    pub emergency_claimable: bool,
}

/// A non-zero claimable balance, as exported to snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableEntry {
    pub beneficiary: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
}

/// Marks a flagged release config as paid through the emergency path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmergencyClaimRecord {
    pub beneficiary: Principal,
    pub config_index: usize,
}

/// Credits computed for a set of newly met conditions, not yet applied.
#[derive(Debug, Clone, Default)]
pub struct CreditPlan {
    /// Post-credit absolute balances.
    balances: BTreeMap<(Principal, AssetId), Decimal>,
    /// Config indices credited, in application order.
    pub credited: Vec<usize>,
}

/// Amount booked out of custody, pending the external transfer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingPayout {
    pub recipient: Principal,
    pub asset: AssetId,
    pub amount: Decimal,
    pub source: PayoutSource,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PayoutSource {
    Claimable,
    /// Config indices recorded, and the part taken from the claimable balance.
    Emergency { indices: Vec<usize>, drawn: Decimal },
    Remainder,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseLedger {
    configs: Vec<ReleaseConfig>,
    by_condition: HashMap<ConditionId, Vec<usize>>,
    claimable: BTreeMap<(Principal, AssetId), Decimal>,
    deposited: BTreeMap<AssetId, Decimal>,
    paid_out: BTreeMap<AssetId, Decimal>,
    emergency_claims: BTreeSet<EmergencyClaimRecord>,
}

impl ReleaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ───────────────────────── Configuration ─────────────────────────

    /// Append a release config. The caller has already checked that the
    /// condition exists. Returns the config's arena index.
    pub fn configure(&mut self, config: ReleaseConfig) -> Result<usize, LedgerError> {
        if !is_valid_amount(config.amount) {
            return Err(LedgerError::InvalidAmount);
        }
        let index = self.configs.len();
        self.by_condition.entry(config.condition_id).or_default().push(index);
        self.configs.push(config);
        Ok(index)
    }

    pub fn configs(&self) -> &[ReleaseConfig] {
        &self.configs
    }

    pub fn config(&self, index: usize) -> Option<&ReleaseConfig> {
        self.configs.get(index)
    }

    /// Indices of configs bound to a condition, in definition order.
    pub fn configs_for(&self, condition_id: &ConditionId) -> &[usize] {
        self.by_condition
            .get(condition_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ───────────────────────── Balance queries ─────────────────────────

    pub fn claimable(&self, beneficiary: &Principal, asset: &AssetId) -> Decimal {
        self.claimable
            .get(&(beneficiary.clone(), asset.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total_deposited(&self, asset: &AssetId) -> Decimal {
        self.deposited.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn paid_out(&self, asset: &AssetId) -> Decimal {
        self.paid_out.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum of all claimable balances for an asset. Saturates at
    /// `Decimal::MAX`, which conservation rules out for a valid ledger.
    pub fn total_claimable(&self, asset: &AssetId) -> Decimal {
        self.checked_total_claimable(asset).unwrap_or(Decimal::MAX)
    }

    fn checked_total_claimable(&self, asset: &AssetId) -> Option<Decimal> {
        checked_sum(
            self.claimable
                .iter()
                .filter(|((_, a), _)| a == asset)
                .map(|(_, v)| *v),
        )
    }

    /// Deposits not yet owed to anyone nor paid out.
    pub fn uncommitted(&self, asset: &AssetId) -> Decimal {
        self.total_deposited(asset) - self.total_claimable(asset) - self.paid_out(asset)
    }

    /// Every asset the ledger has seen.
    pub fn assets(&self) -> BTreeSet<AssetId> {
        self.deposited
            .keys()
            .chain(self.paid_out.keys())
            .chain(self.claimable.keys().map(|(_, a)| a))
            .cloned()
            .collect()
    }

    pub fn claimable_entries(&self) -> Vec<ClaimableEntry> {
        self.claimable
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|((beneficiary, asset), amount)| ClaimableEntry {
                beneficiary: beneficiary.clone(),
                asset: asset.clone(),
                amount: *amount,
            })
            .collect()
    }

    pub fn deposited_totals(&self) -> &BTreeMap<AssetId, Decimal> {
        &self.deposited
    }

    pub fn paid_out_totals(&self) -> &BTreeMap<AssetId, Decimal> {
        &self.paid_out
    }

    pub fn emergency_claims(&self) -> &BTreeSet<EmergencyClaimRecord> {
        &self.emergency_claims
    }

    pub fn is_emergency_claimed(&self, beneficiary: &Principal, config_index: usize) -> bool {
        self.emergency_claims.contains(&EmergencyClaimRecord {
            beneficiary: beneficiary.clone(),
            config_index,
        })
    }

    /// Verify ledger conservation for every asset.
    pub fn check_conservation(&self) -> Result<(), LedgerError> {
        for asset in self.assets() {
            let committed = self
                .checked_total_claimable(&asset)
                .and_then(|c| c.checked_add(self.paid_out(&asset)))
                .ok_or(LedgerError::Overflow)?;
            let deposited = self.total_deposited(&asset);
            if committed > deposited {
                return Err(LedgerError::insufficient(&asset, committed, deposited));
            }
        }
        Ok(())
    }

    // ───────────────────────── Deposits ─────────────────────────

    /// New deposit total for `asset` after adding `amount`, without applying it.
    pub(crate) fn check_deposit(
        &self,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<Decimal, LedgerError> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount);
        }
        self.total_deposited(asset)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)
    }

    pub(crate) fn set_deposited(&mut self, asset: AssetId, total: Decimal) {
        self.deposited.insert(asset, total);
    }

    // ───────────────────────── Crediting ─────────────────────────

    /// Compute the credits owed for `conditions` becoming met. Fails without
    /// side effects on overflow or when an asset lacks uncommitted deposits.
    pub(crate) fn plan_credits(
        &self,
        conditions: &[ConditionId],
    ) -> Result<CreditPlan, LedgerError> {
        let mut plan = CreditPlan::default();
        let mut added: BTreeMap<AssetId, Decimal> = BTreeMap::new();

        for condition_id in conditions {
            for &index in self.configs_for(condition_id) {
                let config = &self.configs[index];
                let key = (config.beneficiary.clone(), config.asset.clone());
                let current = match plan.balances.get(&key) {
                    Some(v) => *v,
                    None => self.claimable(&config.beneficiary, &config.asset),
                };
                let next = current.checked_add(config.amount).ok_or(LedgerError::Overflow)?;
                plan.balances.insert(key, next);

                let asset_total = added.entry(config.asset.clone()).or_insert(Decimal::ZERO);
                *asset_total = asset_total
                    .checked_add(config.amount)
                    .ok_or(LedgerError::Overflow)?;
                plan.credited.push(index);
            }
        }

        for (asset, amount) in &added {
            let available = self.uncommitted(asset);
            if *amount > available {
                return Err(LedgerError::insufficient(asset, *amount, available));
            }
        }
        Ok(plan)
    }

    pub(crate) fn apply_credits(&mut self, plan: CreditPlan) {
        self.claimable.extend(plan.balances);
    }

    // ───────────────────────── Payouts ─────────────────────────

    /// Zero a claimable balance and book it as paid.
    pub(crate) fn book_claim(
        &mut self,
        beneficiary: &Principal,
        asset: &AssetId,
    ) -> Result<PendingPayout, LedgerError> {
        let amount = self.claimable(beneficiary, asset);
        if amount.is_zero() {
            return Err(LedgerError::NothingToClaim {
                beneficiary: beneficiary.clone(),
                asset: asset.clone(),
            });
        }
        let paid = self.paid_out(asset).checked_add(amount).ok_or(LedgerError::Overflow)?;

        self.claimable
            .insert((beneficiary.clone(), asset.clone()), Decimal::ZERO);
        self.paid_out.insert(asset.clone(), paid);
        Ok(PendingPayout {
            recipient: beneficiary.clone(),
            asset: asset.clone(),
            amount,
            source: PayoutSource::Claimable,
        })
    }

    /// Collect the flagged configs of `(beneficiary, asset)` not yet
    /// emergency-claimed, record them as claimed and book their total as
    /// paid, whether or not their condition was met.
    ///
    /// A config whose condition was already credited is paid out of the
    /// beneficiary's claimable balance, capped at what is still there. The
    /// others draw on uncommitted deposits.
    pub(crate) fn book_emergency_claim<F>(
        &mut self,
        beneficiary: &Principal,
        asset: &AssetId,
        credited: F,
    ) -> Result<PendingPayout, LedgerError>
    where
        F: Fn(&ConditionId) -> bool,
    {
        let flagged: Vec<usize> = self
            .configs
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.emergency_claimable && &c.beneficiary == beneficiary && &c.asset == asset
            })
            .map(|(i, _)| i)
            .collect();

        let eligible: Vec<usize> = flagged
            .iter()
            .copied()
            .filter(|&i| !self.is_emergency_claimed(beneficiary, i))
            .collect();

        if eligible.is_empty() {
            return Err(if flagged.is_empty() {
                LedgerError::NothingToClaim {
                    beneficiary: beneficiary.clone(),
                    asset: asset.clone(),
                }
            } else {
                LedgerError::AlreadyClaimed {
                    beneficiary: beneficiary.clone(),
                    asset: asset.clone(),
                }
            });
        }

        let (from_credit, from_deposits): (Vec<usize>, Vec<usize>) = eligible
            .iter()
            .partition(|&&i| credited(&self.configs[i].condition_id));
        let owed = checked_sum(from_credit.iter().map(|&i| self.configs[i].amount))
            .ok_or(LedgerError::Overflow)?;
        let balance = self.claimable(beneficiary, asset);
        let drawn = owed.min(balance);
        let fresh = checked_sum(from_deposits.iter().map(|&i| self.configs[i].amount))
            .ok_or(LedgerError::Overflow)?;

        let available = self.uncommitted(asset);
        if fresh > available {
            return Err(LedgerError::insufficient(asset, fresh, available));
        }
        let amount = fresh.checked_add(drawn).ok_or(LedgerError::Overflow)?;
        if amount.is_zero() {
            // Every credited config was already paid through a normal claim.
            return Err(LedgerError::NothingToClaim {
                beneficiary: beneficiary.clone(),
                asset: asset.clone(),
            });
        }
        let paid = self.paid_out(asset).checked_add(amount).ok_or(LedgerError::Overflow)?;

        for &i in &eligible {
            self.emergency_claims.insert(EmergencyClaimRecord {
                beneficiary: beneficiary.clone(),
                config_index: i,
            });
        }
        if !drawn.is_zero() {
            self.claimable
                .insert((beneficiary.clone(), asset.clone()), balance - drawn);
        }
        self.paid_out.insert(asset.clone(), paid);
        Ok(PendingPayout {
            recipient: beneficiary.clone(),
            asset: asset.clone(),
            amount,
            source: PayoutSource::Emergency {
                indices: eligible,
                drawn,
            },
        })
    }

    /// Book the uncommitted remainder of an asset as paid to `recipient`.
    pub(crate) fn book_remainder(
        &mut self,
        recipient: &Principal,
        asset: &AssetId,
    ) -> Result<PendingPayout, LedgerError> {
        let amount = self.uncommitted(asset);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NothingToClaim {
                beneficiary: recipient.clone(),
                asset: asset.clone(),
            });
        }
        let paid = self.paid_out(asset).checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.paid_out.insert(asset.clone(), paid);
        Ok(PendingPayout {
            recipient: recipient.clone(),
            asset: asset.clone(),
            amount,
            source: PayoutSource::Remainder,
        })
    }

    /// Undo a booked payout after its transfer failed.
    pub(crate) fn rollback(&mut self, payout: &PendingPayout) {
        let paid = self.paid_out(&payout.asset) - payout.amount;
        self.paid_out.insert(payout.asset.clone(), paid);
        match &payout.source {
            PayoutSource::Claimable => {
                self.claimable
                    .insert((payout.recipient.clone(), payout.asset.clone()), payout.amount);
            }
            PayoutSource::Emergency { indices, drawn } => {
                for &i in indices {
                    self.emergency_claims.remove(&EmergencyClaimRecord {
                        beneficiary: payout.recipient.clone(),
                        config_index: i,
                    });
                }
                if !drawn.is_zero() {
                    let key = (payout.recipient.clone(), payout.asset.clone());
                    let current = self.claimable.get(&key).copied().unwrap_or(Decimal::ZERO);
                    self.claimable.insert(key, current + *drawn);
                }
            }
            PayoutSource::Remainder => {}
        }
    }

    // ───────────────────────── Restore ─────────────────────────

    /// Rebuild a ledger from persisted parts. Condition existence is checked
    /// by the caller; this checks amounts, indices and conservation.
    pub fn from_parts(
        configs: Vec<ReleaseConfig>,
        claimable: Vec<ClaimableEntry>,
        deposited: BTreeMap<AssetId, Decimal>,
        paid_out: BTreeMap<AssetId, Decimal>,
        emergency_claims: Vec<EmergencyClaimRecord>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        for config in configs {
            ledger.configure(config)?;
        }
        for entry in claimable {
            if entry.amount < Decimal::ZERO {
                return Err(LedgerError::InvalidAmount);
            }
            ledger
                .claimable
                .insert((entry.beneficiary, entry.asset), entry.amount);
        }
        if deposited.values().chain(paid_out.values()).any(|v| *v < Decimal::ZERO) {
            return Err(LedgerError::InvalidAmount);
        }
        ledger.deposited = deposited;
        ledger.paid_out = paid_out;
        for record in emergency_claims {
            if record.config_index >= ledger.configs.len() {
                return Err(LedgerError::UnknownConfig {
                    index: record.config_index,
                });
            }
            ledger.emergency_claims.insert(record);
        }
        ledger.check_conservation()?;
        Ok(ledger)
    }
}
