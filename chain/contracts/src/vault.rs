//! Conditional vault — the single entry point for every vault operation
//!
//! Owns the condition registry, release ledger and custody state machine,
//! and wires them to the external collaborators (principal directory, asset
//! transfer adapter, clock). Every mutating operation:
//! 1. Checks the custody phase
//! 2. Checks the caller's role
//! 3. Validates input and stages its changes
//! 4. Commits, then records a [`VaultEvent`]
//!
//! A failing operation leaves the vault untouched.

use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info, warn};
use types::ids::{AssetId, ConditionId, Principal, VaultId};

use crate::adapter::AssetTransferAdapter;
use crate::claim::ClaimService;
use crate::clock::Clock;
use crate::condition::Condition;
use crate::config::VaultConfig;
use crate::custody::{
    require_operator, CustodyState, CustodyStateMachine, EmergencyVoteSession, VoteOutcome,
};
use crate::digest::graph_digest;
use crate::errors::{ConditionError, LedgerError, VaultError};
use crate::evaluator::{ConditionEvaluator, Resolution};
use crate::events::{
    ApprovalSubmitted, ConditionDefined, Deposited, EmergencyVoteCast, PaidOut, PhaseChanged,
    ReleaseConfigured, VaultEvent,
};
use crate::ledger::{ReleaseConfig, ReleaseLedger};
use crate::registry::ConditionRegistry;
use crate::security::PrincipalDirectory;
use crate::snapshot::{SnapshotError, VaultSnapshot, VaultState};

const SETUP: &[CustodyState] = &[CustodyState::Setup];
const ACTIVE: &[CustodyState] = &[CustodyState::Active];
const EMERGENCY: &[CustodyState] = &[CustodyState::Emergency];
const COLLAPSED: &[CustodyState] = &[CustodyState::Collapsed];

/// Result of an accepted approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalReceipt {
    pub condition_id: ConditionId,
    pub approvals: usize,
    pub required: usize,
    /// Present when the vault resolved the condition right after the
    /// approval and that resolution succeeded.
    pub resolution: Option<Resolution>,
}

/// Result of a collapse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollapseReport {
    pub swept: Vec<PaidOut>,
    /// Assets whose remainder could not be transferred; retry with
    /// [`ConditionalVault::sweep`].
    pub failed: Vec<(AssetId, VaultError)>,
}

pub struct ConditionalVault {
    id: VaultId,
    config: VaultConfig,
    registry: ConditionRegistry,
    ledger: ReleaseLedger,
    custody: CustodyStateMachine,
    directory: Box<dyn PrincipalDirectory>,
    transfer: Box<dyn AssetTransferAdapter>,
    clock: Box<dyn Clock>,
    /// Digest of the condition graph and release table, recorded on activation.
    graph_digest: Option<[u8; 32]>,
    /// Emitted events log (append-only)
    events: Vec<VaultEvent>,
}

impl fmt::Debug for ConditionalVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalVault")
            .field("id", &self.id)
            .field("phase", &self.custody.state())
            .field("conditions", &self.registry.len())
            .field("release_configs", &self.ledger.configs().len())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl ConditionalVault {
    /// Create a vault in Setup.
    pub fn new<D, T, C>(
        config: VaultConfig,
        directory: D,
        transfer: T,
        clock: C,
    ) -> Result<Self, VaultError>
    where
        D: PrincipalDirectory + 'static,
        T: AssetTransferAdapter + 'static,
        C: Clock + 'static,
    {
        config.validate()?;
        let custody = CustodyStateMachine::new(config.quorum, config.vote_session_ttl_secs);
        let vault = Self {
            id: VaultId::new(),
            config,
            registry: ConditionRegistry::new(),
            ledger: ReleaseLedger::new(),
            custody,
            directory: Box::new(directory),
            transfer: Box::new(transfer),
            clock: Box::new(clock),
            graph_digest: None,
            events: Vec::new(),
        };
        info!(vault_id = %vault.id, operator = %vault.directory.operator(), "Vault created");
        Ok(vault)
    }

    // ───────────────────────── Setup ─────────────────────────

    pub fn define_time_condition(
        &mut self,
        caller: &Principal,
        id: ConditionId,
        release_at: i64,
    ) -> Result<(), VaultError> {
        self.check_setup(caller, "define_time_condition")?;
        self.registry.define_time(id, release_at)?;
        self.record_definition(id);
        Ok(())
    }

    pub fn define_approval_condition<I>(
        &mut self,
        caller: &Principal,
        id: ConditionId,
        approvers: I,
        required_count: usize,
    ) -> Result<(), VaultError>
    where
        I: IntoIterator<Item = Principal>,
    {
        self.check_setup(caller, "define_approval_condition")?;
        self.registry.define_approval(id, approvers, required_count)?;
        self.record_definition(id);
        Ok(())
    }

    pub fn define_compound_condition(
        &mut self,
        caller: &Principal,
        id: ConditionId,
        children: Vec<ConditionId>,
    ) -> Result<(), VaultError> {
        self.check_setup(caller, "define_compound_condition")?;
        self.registry.define_compound(id, children)?;
        self.record_definition(id);
        Ok(())
    }

    /// Bind a payout to an existing condition. Returns the config index.
    pub fn configure_release(
        &mut self,
        caller: &Principal,
        config: ReleaseConfig,
    ) -> Result<usize, VaultError> {
        self.check_setup(caller, "configure_release")?;
        if !self.registry.contains(&config.condition_id) {
            return Err(ConditionError::UnknownCondition {
                id: config.condition_id,
            }
            .into());
        }
        let event = ReleaseConfigured {
            config_index: self.ledger.configs().len(),
            condition_id: config.condition_id,
            beneficiary: config.beneficiary.clone(),
            asset: config.asset.clone(),
            amount: config.amount,
            emergency_claimable: config.emergency_claimable,
        };
        let index = self.ledger.configure(config)?;
        debug!(
            config_index = index,
            condition = %event.condition_id,
            beneficiary = %event.beneficiary,
            asset = %event.asset,
            amount = %event.amount,
            "Release configured"
        );
        self.events.push(VaultEvent::ReleaseConfigured(event));
        Ok(index)
    }

    fn check_setup(&self, caller: &Principal, operation: &'static str) -> Result<(), VaultError> {
        self.custody.require(operation, SETUP)?;
        require_operator(caller, self.directory.as_ref(), operation)?;
        Ok(())
    }

    fn record_definition(&mut self, id: ConditionId) {
        let kind = self
            .registry
            .get(&id)
            .map(|c| c.kind().name().to_string())
            .unwrap_or_default();
        debug!(condition = %id, kind = %kind, "Condition defined");
        self.events.push(VaultEvent::ConditionDefined(ConditionDefined {
            condition_id: id,
            kind,
        }));
    }

    // ───────────────────────── Phase transitions ─────────────────────────

    /// Setup → Active. Records the graph digest.
    pub fn activate(&mut self, caller: &Principal) -> Result<(), VaultError> {
        let from = self.custody.activate(caller, self.directory.as_ref())?;
        let digest = graph_digest(&self.registry, &self.ledger);
        info!(vault_id = %self.id, digest = %hex::encode(digest), "Vault activated");
        self.graph_digest = Some(digest);
        self.record_phase_change(from, caller);
        Ok(())
    }

    pub fn freeze(&mut self, caller: &Principal) -> Result<(), VaultError> {
        let from = self.custody.freeze(caller, self.directory.as_ref())?;
        self.record_phase_change(from, caller);
        Ok(())
    }

    pub fn unfreeze(&mut self, caller: &Principal) -> Result<(), VaultError> {
        let from = self.custody.unfreeze(caller, self.directory.as_ref())?;
        self.record_phase_change(from, caller);
        Ok(())
    }

    pub fn vote_emergency(&mut self, caller: &Principal) -> Result<VoteOutcome, VaultError> {
        let now = self.clock.now();
        let from = self.custody.state();
        let outcome = self.custody.vote_emergency(caller, self.directory.as_ref(), now)?;

        let required = self.custody.required_votes(self.directory.supervisor_count());
        let (session, votes) = match outcome {
            VoteOutcome::Pending { session, votes, .. } => (session, votes),
            VoteOutcome::EmergencyDeclared { session } => {
                let votes = self
                    .custody
                    .concluded_sessions()
                    .last()
                    .map_or(0, EmergencyVoteSession::vote_count);
                (session, votes)
            }
        };
        self.events.push(VaultEvent::EmergencyVoteCast(EmergencyVoteCast {
            session,
            voter: caller.clone(),
            votes,
            required,
        }));
        if matches!(outcome, VoteOutcome::EmergencyDeclared { .. }) {
            warn!(vault_id = %self.id, session, by = %caller, "Emergency declared");
            self.record_phase_change(from, caller);
        }
        Ok(outcome)
    }

    /// Active|Frozen → Collapsed, then sweep every asset's uncommitted
    /// remainder to the operator. Sweep failures do not undo the collapse;
    /// they are reported and can be retried with [`Self::sweep`].
    pub fn collapse(&mut self, caller: &Principal) -> Result<CollapseReport, VaultError> {
        let from = self.custody.collapse(caller, self.directory.as_ref())?;
        self.record_phase_change(from, caller);

        let operator = self.directory.operator().clone();
        let mut report = CollapseReport::default();
        for asset in self.ledger.assets() {
            if self.ledger.uncommitted(&asset) <= Decimal::ZERO {
                continue;
            }
            match self.sweep_remainder(&operator, &asset) {
                Ok(paid) => report.swept.push(paid),
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Collapse sweep failed");
                    report.failed.push((asset, e));
                }
            }
        }
        Ok(report)
    }

    /// Retry the remainder sweep of one asset after a collapse.
    pub fn sweep(&mut self, caller: &Principal, asset: &AssetId) -> Result<PaidOut, VaultError> {
        self.custody.require("sweep", COLLAPSED)?;
        require_operator(caller, self.directory.as_ref(), "sweep")?;
        let operator = self.directory.operator().clone();
        self.sweep_remainder(&operator, asset)
    }

    fn sweep_remainder(
        &mut self,
        operator: &Principal,
        asset: &AssetId,
    ) -> Result<PaidOut, VaultError> {
        let paid =
            ClaimService::new(&mut self.ledger, self.transfer.as_mut()).sweep(operator, asset)?;
        self.events.push(VaultEvent::PaidOut(paid.clone()));
        Ok(paid)
    }

    fn record_phase_change(&mut self, from: CustodyState, by: &Principal) {
        self.events.push(VaultEvent::PhaseChanged(PhaseChanged {
            from,
            to: self.custody.state(),
            by: by.clone(),
            at: self.clock.now(),
        }));
    }

    // ───────────────────────── Deposits ─────────────────────────

    /// Move `amount` of `asset` from `depositor` into custody. Active only.
    pub fn deposit(
        &mut self,
        depositor: &Principal,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), VaultError> {
        self.custody.require("deposit", ACTIVE)?;
        let total = self.ledger.check_deposit(asset, amount)?;
        self.transfer
            .credit(self.id, depositor, asset, amount)
            .map_err(|e| LedgerError::TransferFailed {
                asset: asset.clone(),
                reason: e.to_string(),
            })?;
        self.ledger.set_deposited(asset.clone(), total);
        info!(
            depositor = %depositor,
            asset = %asset,
            amount = %amount,
            total = %total,
            "Deposit received"
        );
        self.events.push(VaultEvent::Deposited(Deposited {
            depositor: depositor.clone(),
            asset: asset.clone(),
            amount,
        }));
        Ok(())
    }

    // ───────────────────────── Conditions ─────────────────────────

    /// Record an approval. Active only. With `auto_resolve_on_approval` the
    /// condition is resolved straight after; a failed resolution is logged
    /// and does not undo the approval.
    pub fn submit_approval(
        &mut self,
        approver: &Principal,
        id: ConditionId,
    ) -> Result<ApprovalReceipt, VaultError> {
        self.custody.require("submit_approval", ACTIVE)?;
        let condition = self
            .registry
            .get_mut(&id)
            .ok_or(ConditionError::UnknownCondition { id })?;
        let (approvals, required) = condition.record_approval(approver)?;
        debug!(condition = %id, approver = %approver, approvals, required, "Approval recorded");
        self.events.push(VaultEvent::ApprovalSubmitted(ApprovalSubmitted {
            condition_id: id,
            approver: approver.clone(),
            approvals,
            required,
        }));

        let resolution = if self.config.auto_resolve_on_approval {
            match self.resolve_report(id) {
                Ok(resolution) => Some(resolution),
                Err(e) => {
                    warn!(condition = %id, error = %e, "Automatic resolution failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(ApprovalReceipt {
            condition_id: id,
            approvals,
            required,
            resolution,
        })
    }

    /// Resolve a condition and report whether it is met.
    pub fn resolve(&mut self, id: ConditionId) -> Result<bool, VaultError> {
        self.resolve_report(id).map(|r| r.met)
    }

    /// Resolve a condition and report every condition it newly met.
    pub fn resolve_report(&mut self, id: ConditionId) -> Result<Resolution, VaultError> {
        self.custody.require("resolve", CustodyState::OPERATIONAL)?;
        let now = self.clock.now();
        let resolution =
            ConditionEvaluator::new(&mut self.registry, &mut self.ledger).resolve(id, now)?;
        self.events
            .extend(resolution.newly_met.iter().cloned().map(VaultEvent::ConditionMet));
        Ok(resolution)
    }

    // ───────────────────────── Claims ─────────────────────────

    /// Pay out the claimable balance of `(beneficiary, asset)`. Active or Frozen.
    pub fn claim(
        &mut self,
        beneficiary: &Principal,
        asset: &AssetId,
    ) -> Result<PaidOut, VaultError> {
        self.custody.require("claim", CustodyState::OPERATIONAL)?;
        let paid = ClaimService::new(&mut self.ledger, self.transfer.as_mut())
            .claim(beneficiary, asset)?;
        self.events.push(VaultEvent::PaidOut(paid.clone()));
        Ok(paid)
    }

    /// Pay the emergency-flagged configs of `(beneficiary, asset)`, met or
    /// not. Emergency only.
    pub fn emergency_claim(
        &mut self,
        beneficiary: &Principal,
        asset: &AssetId,
    ) -> Result<PaidOut, VaultError> {
        self.custody.require("emergency_claim", EMERGENCY)?;
        let registry = &self.registry;
        let paid = ClaimService::new(&mut self.ledger, self.transfer.as_mut())
            .emergency_claim(beneficiary, asset, |id| registry.is_met(id))?;
        self.events.push(VaultEvent::PaidOut(paid.clone()));
        Ok(paid)
    }

    // ───────────────────────── Queries ─────────────────────────

    pub fn id(&self) -> VaultId {
        self.id
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn phase(&self) -> CustodyState {
        self.custody.state()
    }

    pub fn condition(&self, id: &ConditionId) -> Option<&Condition> {
        self.registry.get(id)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.registry.iter()
    }

    pub fn release_configs(&self) -> &[ReleaseConfig] {
        self.ledger.configs()
    }

    pub fn get_claimable(&self, beneficiary: &Principal, asset: &AssetId) -> Decimal {
        self.ledger.claimable(beneficiary, asset)
    }

    pub fn total_deposited(&self, asset: &AssetId) -> Decimal {
        self.ledger.total_deposited(asset)
    }

    pub fn paid_out(&self, asset: &AssetId) -> Decimal {
        self.ledger.paid_out(asset)
    }

    /// Deposits neither credited nor paid out.
    pub fn uncommitted(&self, asset: &AssetId) -> Decimal {
        self.ledger.uncommitted(asset)
    }

    pub fn ledger(&self) -> &ReleaseLedger {
        &self.ledger
    }

    pub fn vote_session(&self) -> Option<&EmergencyVoteSession> {
        self.custody.session()
    }

    pub fn concluded_sessions(&self) -> &[EmergencyVoteSession] {
        self.custody.concluded_sessions()
    }

    pub fn graph_digest(&self) -> Option<[u8; 32]> {
        self.graph_digest
    }

    pub fn is_emergency_claimed(&self, beneficiary: &Principal, config_index: usize) -> bool {
        self.ledger.is_emergency_claimed(beneficiary, config_index)
    }

    /// Get all emitted events.
    pub fn events(&self) -> &[VaultEvent] {
        &self.events
    }

    /// Drain events (for external consumers).
    pub fn drain_events(&mut self) -> Vec<VaultEvent> {
        std::mem::take(&mut self.events)
    }

    // ───────────────────────── Snapshots ─────────────────────────

    pub fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        let state = VaultState {
            vault_id: self.id,
            config: self.config.clone(),
            phase: self.custody.state(),
            conditions: self.registry.iter().cloned().collect(),
            release_configs: self.ledger.configs().to_vec(),
            claimable: self.ledger.claimable_entries(),
            deposited: self.ledger.deposited_totals().clone(),
            paid_out: self.ledger.paid_out_totals().clone(),
            emergency_claims: self.ledger.emergency_claims().iter().cloned().collect(),
            vote_session: self.custody.session().cloned(),
            concluded_sessions: self.custody.concluded_sessions().to_vec(),
            next_session_version: self.custody.next_version(),
            graph_digest: self.graph_digest.as_ref().map(hex::encode),
        };
        Ok(VaultSnapshot::seal(state, self.clock.now())?)
    }

    /// Rebuild a vault from a snapshot. Verifies the checksum, the condition
    /// graph structure, ledger conservation and the activation digest.
    pub fn restore<D, T, C>(
        snapshot: VaultSnapshot,
        directory: D,
        transfer: T,
        clock: C,
    ) -> Result<Self, VaultError>
    where
        D: PrincipalDirectory + 'static,
        T: AssetTransferAdapter + 'static,
        C: Clock + 'static,
    {
        snapshot.verify()?;
        let state = snapshot.state;
        state.config.validate()?;

        let registry = ConditionRegistry::from_conditions(state.conditions)?;
        if let Some(config) = state
            .release_configs
            .iter()
            .find(|c| !registry.contains(&c.condition_id))
        {
            return Err(ConditionError::UnknownCondition {
                id: config.condition_id,
            }
            .into());
        }
        let ledger = ReleaseLedger::from_parts(
            state.release_configs,
            state.claimable,
            state.deposited,
            state.paid_out,
            state.emergency_claims,
        )?;

        let digest = graph_digest(&registry, &ledger);
        let graph_digest = match state.graph_digest {
            Some(expected) => {
                let actual = hex::encode(digest);
                if expected != actual {
                    return Err(SnapshotError::IntegrityFailure { expected, actual }.into());
                }
                Some(digest)
            }
            None => None,
        };

        let custody = CustodyStateMachine::from_parts(
            state.phase,
            state.config.quorum,
            state.config.vote_session_ttl_secs,
            state.vote_session,
            state.concluded_sessions,
            state.next_session_version,
        );

        info!(vault_id = %state.vault_id, phase = %state.phase, "Vault restored from snapshot");
        Ok(Self {
            id: state.vault_id,
            config: state.config,
            registry,
            ledger,
            custody,
            directory: Box::new(directory),
            transfer: Box::new(transfer),
            clock: Box::new(clock),
            graph_digest,
            events: Vec::new(),
        })
    }
}
