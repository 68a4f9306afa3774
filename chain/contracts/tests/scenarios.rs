//! End-to-end vault scenarios
//!
//! - A: time-locked release
//! - B: 2-of-3 approval, late third approval
//! - C: compound over time + approval
//! - D: emergency quorum with three supervisors
//! - E: emergency claim of a never-resolved flagged release
//! - Collapse and sweep

use conditional_vault::adapter::InMemoryTransfer;
use conditional_vault::clock::ManualClock;
use conditional_vault::events::{PayoutKind, VaultEvent};
use conditional_vault::ledger::ReleaseConfig;
use conditional_vault::security::AccessControl;
use conditional_vault::{ConditionalVault, CustodyState, ErrorKind, VaultConfig, VoteOutcome};
use rust_decimal::Decimal;
use types::ids::{AssetId, ConditionId, Principal};

const T0: i64 = 1_700_000_000;

// ═══════════════════════════════════════════════════════════════════
// Scenario A — time-locked release
// ═══════════════════════════════════════════════════════════════════

#[test]
fn scenario_a_time_condition() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0 + 3_600).unwrap();
    h.vault.configure_release(&op(), release(1, "bob", "BTC", 2, false)).unwrap();
    h.activate_and_fund("BTC", 5);

    assert!(!h.vault.resolve(cid(1)).unwrap());
    assert!(!h.vault.condition(&cid(1)).unwrap().is_processed());
    assert_eq!(h.claim_kind("bob", "BTC"), ErrorKind::InsufficientBalance);

    h.clock.advance(3_600);
    assert!(h.vault.resolve(cid(1)).unwrap());
    assert_eq!(h.vault.get_claimable(&pr("bob"), &btc()), Decimal::from(2));

    let paid = h.vault.claim(&pr("bob"), &btc()).unwrap();
    assert_eq!(paid.amount, Decimal::from(2));
    assert_eq!(paid.kind, PayoutKind::Claim);
    assert_eq!(h.transfer.balance_of(&pr("bob"), &btc()), Decimal::from(2));
    assert_eq!(h.vault.get_claimable(&pr("bob"), &btc()), Decimal::ZERO);
    assert_eq!(h.vault.paid_out(&btc()), Decimal::from(2));
}

#[test]
fn resolving_twice_credits_once() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0).unwrap();
    h.vault.configure_release(&op(), release(1, "bob", "BTC", 2, false)).unwrap();
    h.activate_and_fund("BTC", 10);

    let first = h.vault.resolve_report(cid(1)).unwrap();
    let second = h.vault.resolve_report(cid(1)).unwrap();
    assert!(first.met && second.met);
    assert_eq!(first.credits().count(), 1);
    assert_eq!(second.credits().count(), 0);
    assert_eq!(h.vault.get_claimable(&pr("bob"), &btc()), Decimal::from(2));

    let met_events = h
        .vault
        .events()
        .iter()
        .filter(|e| matches!(e, VaultEvent::ConditionMet(_)))
        .count();
    assert_eq!(met_events, 1);
}

// ═══════════════════════════════════════════════════════════════════
// Scenario B — 2-of-3 approval
// ═══════════════════════════════════════════════════════════════════

#[test]
fn scenario_b_two_of_three_approval() {
    let mut h = Harness::new();
    h.vault
        .define_approval_condition(&op(), cid(1), vec![pr("x"), pr("y"), pr("z")], 2)
        .unwrap();
    h.vault.configure_release(&op(), release(1, "carol", "ETH", 4, false)).unwrap();
    h.activate_and_fund("ETH", 4);

    let receipt = h.vault.submit_approval(&pr("x"), cid(1)).unwrap();
    assert_eq!((receipt.approvals, receipt.required), (1, 2));
    assert!(!h.vault.resolve(cid(1)).unwrap());

    h.vault.submit_approval(&pr("y"), cid(1)).unwrap();
    assert!(h.vault.resolve(cid(1)).unwrap());
    assert_eq!(h.vault.get_claimable(&pr("carol"), &eth()), Decimal::from(4));

    // Late approval is accepted but changes nothing on the ledger
    let late = h.vault.submit_approval(&pr("z"), cid(1)).unwrap();
    assert_eq!(late.approvals, 3);
    assert!(h.vault.resolve(cid(1)).unwrap());
    assert_eq!(h.vault.get_claimable(&pr("carol"), &eth()), Decimal::from(4));
}

#[test]
fn approval_errors() {
    let mut h = Harness::new();
    h.vault.define_approval_condition(&op(), cid(1), vec![pr("x")], 1).unwrap();
    h.vault.define_time_condition(&op(), cid(2), T0).unwrap();
    h.vault.activate(&op()).unwrap();

    let err = h.vault.submit_approval(&pr("mallory"), cid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    h.vault.submit_approval(&pr("x"), cid(1)).unwrap();
    let err = h.vault.submit_approval(&pr("x"), cid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyApproved);
    let err = h.vault.submit_approval(&pr("x"), cid(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = h.vault.submit_approval(&pr("x"), cid(9)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn approvals_rejected_while_frozen() {
    let mut h = Harness::new();
    h.vault.define_approval_condition(&op(), cid(1), vec![pr("x")], 1).unwrap();
    h.vault.activate(&op()).unwrap();
    h.vault.freeze(&pr("s1")).unwrap();
    let err = h.vault.submit_approval(&pr("x"), cid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPhase);
}

// ═══════════════════════════════════════════════════════════════════
// Scenario C — compound over time + approval
// ═══════════════════════════════════════════════════════════════════

#[test]
fn scenario_c_compound_condition() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0 + 100).unwrap();
    h.vault.define_approval_condition(&op(), cid(2), vec![pr("x")], 1).unwrap();
    h.vault.define_compound_condition(&op(), cid(3), vec![cid(1), cid(2)]).unwrap();
    h.vault.configure_release(&op(), release(3, "dave", "BTC", 7, false)).unwrap();
    h.activate_and_fund("BTC", 7);

    h.vault.submit_approval(&pr("x"), cid(2)).unwrap();
    assert!(!h.vault.resolve(cid(3)).unwrap(), "time leg still pending");
    assert!(h.vault.condition(&cid(2)).unwrap().is_met());
    assert!(!h.vault.condition(&cid(3)).unwrap().is_processed());

    h.clock.advance(100);
    assert!(h.vault.resolve(cid(3)).unwrap());
    assert_eq!(h.vault.get_claimable(&pr("dave"), &btc()), Decimal::from(7));
}

#[test]
fn compound_result_independent_of_child_resolution_order() {
    let build = || {
        let mut h = Harness::new();
        h.vault.define_time_condition(&op(), cid(1), T0).unwrap();
        h.vault.define_approval_condition(&op(), cid(2), vec![pr("x")], 1).unwrap();
        h.vault.define_compound_condition(&op(), cid(3), vec![cid(1), cid(2)]).unwrap();
        for cond in 1..=3 {
            h.vault
                .configure_release(&op(), release(cond, "bob", "BTC", cond as i64, false))
                .unwrap();
        }
        h.activate_and_fund("BTC", 6);
        h.vault.submit_approval(&pr("x"), cid(2)).unwrap();
        h
    };

    let mut forward = build();
    forward.vault.resolve(cid(1)).unwrap();
    forward.vault.resolve(cid(2)).unwrap();
    assert!(forward.vault.resolve(cid(3)).unwrap());

    let mut reverse = build();
    reverse.vault.resolve(cid(2)).unwrap();
    reverse.vault.resolve(cid(1)).unwrap();
    assert!(reverse.vault.resolve(cid(3)).unwrap());

    let mut parent_first = build();
    assert!(parent_first.vault.resolve(cid(3)).unwrap());

    for h in [&forward, &reverse, &parent_first] {
        assert_eq!(h.vault.get_claimable(&pr("bob"), &btc()), Decimal::from(6));
        assert_eq!(h.vault.uncommitted(&btc()), Decimal::ZERO);
    }
}

#[test]
fn underfunded_resolve_is_retryable() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0).unwrap();
    h.vault.configure_release(&op(), release(1, "bob", "BTC", 5, false)).unwrap();
    h.activate_and_fund("BTC", 3);

    let err = h.vault.resolve(cid(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    assert!(err.is_retryable());
    assert!(!h.vault.condition(&cid(1)).unwrap().is_processed());

    h.vault.deposit(&pr("alice"), &btc(), Decimal::from(2)).unwrap();
    assert!(h.vault.resolve(cid(1)).unwrap());
}

// ═══════════════════════════════════════════════════════════════════
// Scenario D — emergency quorum
// ═══════════════════════════════════════════════════════════════════

#[test]
fn scenario_d_one_supervisor_is_not_enough() {
    let mut h = Harness::new();
    h.vault.activate(&op()).unwrap();
    let outcome = h.vault.vote_emergency(&pr("s1")).unwrap();
    assert_eq!(outcome, VoteOutcome::Pending { session: 1, votes: 1, required: 2 });
    assert_eq!(h.vault.phase(), CustodyState::Active);
    assert_eq!(h.vault.vote_session().unwrap().vote_count(), 1);
}

#[test]
fn scenario_d_two_supervisors_trigger_emergency() {
    let mut h = Harness::new();
    h.vault.activate(&op()).unwrap();
    h.vault.vote_emergency(&pr("s1")).unwrap();
    let outcome = h.vault.vote_emergency(&pr("s3")).unwrap();
    assert_eq!(outcome, VoteOutcome::EmergencyDeclared { session: 1 });
    assert_eq!(h.vault.phase(), CustodyState::Emergency);
}

#[test]
fn scenario_d_operator_triggers_emergency_alone() {
    let mut h = Harness::new();
    h.vault.activate(&op()).unwrap();
    h.vault.vote_emergency(&op()).unwrap();
    assert_eq!(h.vault.phase(), CustodyState::Emergency);
}

#[test]
fn expired_vote_session_starts_over() {
    let mut h = Harness::with_config(VaultConfig {
        vote_session_ttl_secs: Some(600),
        ..VaultConfig::default()
    });
    h.vault.activate(&op()).unwrap();
    h.vault.vote_emergency(&pr("s1")).unwrap();
    h.clock.advance(600);
    let outcome = h.vault.vote_emergency(&pr("s2")).unwrap();
    assert_eq!(outcome, VoteOutcome::Pending { session: 2, votes: 1, required: 2 });
    assert_eq!(h.vault.concluded_sessions().len(), 1);
    assert_eq!(h.vault.phase(), CustodyState::Active);
}

// ═══════════════════════════════════════════════════════════════════
// Scenario E — emergency claim
// ═══════════════════════════════════════════════════════════════════

#[test]
fn scenario_e_emergency_claim_of_unresolved_condition() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0 + 86_400 * 365).unwrap();
    h.vault.configure_release(&op(), release(1, "erin", "BTC", 3, true)).unwrap();
    h.vault.configure_release(&op(), release(1, "frank", "BTC", 4, false)).unwrap();
    h.activate_and_fund("BTC", 10);

    let err = h.vault.emergency_claim(&pr("erin"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPhase);

    h.vault.vote_emergency(&op()).unwrap();
    let paid = h.vault.emergency_claim(&pr("erin"), &btc()).unwrap();
    assert_eq!(paid.amount, Decimal::from(3));
    assert_eq!(paid.kind, PayoutKind::EmergencyClaim);
    assert!(h.vault.is_emergency_claimed(&pr("erin"), 0));
    assert!(!h.vault.condition(&cid(1)).unwrap().is_met());

    let err = h.vault.emergency_claim(&pr("erin"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyClaimed);
    let err = h.vault.emergency_claim(&pr("frank"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

    // Normal claims are closed in Emergency
    let err = h.vault.claim(&pr("frank"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPhase);
}

#[test]
fn emergency_claim_pays_already_credited_release() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0).unwrap();
    h.vault.configure_release(&op(), release(1, "erin", "BTC", 3, true)).unwrap();
    h.activate_and_fund("BTC", 3);
    assert!(h.vault.resolve(cid(1)).unwrap());

    h.vault.vote_emergency(&op()).unwrap();
    assert_eq!(h.claim_kind("erin", "BTC"), ErrorKind::InvalidPhase);

    let paid = h.vault.emergency_claim(&pr("erin"), &btc()).unwrap();
    assert_eq!(paid.amount, Decimal::from(3));
    assert_eq!(h.transfer.balance_of(&pr("erin"), &btc()), Decimal::from(3));
    assert_eq!(h.vault.get_claimable(&pr("erin"), &btc()), Decimal::ZERO);
    assert_eq!(h.vault.paid_out(&btc()), Decimal::from(3));
    h.vault.ledger().check_conservation().unwrap();

    let err = h.vault.emergency_claim(&pr("erin"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyClaimed);
}

#[test]
fn failed_emergency_claim_restores_credited_balance() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0).unwrap();
    h.vault.configure_release(&op(), release(1, "erin", "BTC", 3, true)).unwrap();
    h.activate_and_fund("BTC", 3);
    assert!(h.vault.resolve(cid(1)).unwrap());
    h.vault.vote_emergency(&op()).unwrap();

    h.transfer.block("erin");
    let err = h.vault.emergency_claim(&pr("erin"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransferFailed);
    assert_eq!(h.vault.get_claimable(&pr("erin"), &btc()), Decimal::from(3));
    assert!(!h.vault.is_emergency_claimed(&pr("erin"), 0));

    h.transfer.unblock(&pr("erin"));
    assert_eq!(h.vault.emergency_claim(&pr("erin"), &btc()).unwrap().amount, Decimal::from(3));
}

// ═══════════════════════════════════════════════════════════════════
// Collapse
// ═══════════════════════════════════════════════════════════════════

#[test]
fn collapse_sweeps_uncommitted_remainder() {
    let mut h = Harness::new();
    h.vault.define_time_condition(&op(), cid(1), T0).unwrap();
    h.vault.configure_release(&op(), release(1, "bob", "BTC", 4, false)).unwrap();
    h.activate_and_fund("BTC", 10);
    h.vault.deposit(&pr("alice"), &eth(), Decimal::from(2)).unwrap();
    h.vault.resolve(cid(1)).unwrap();

    let report = h.vault.collapse(&op()).unwrap();
    assert_eq!(h.vault.phase(), CustodyState::Collapsed);
    assert_eq!(report.swept.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(h.transfer.balance_of(&op(), &btc()), Decimal::from(6));
    assert_eq!(h.transfer.balance_of(&op(), &eth()), Decimal::from(2));

    // Credited balance stays recorded
    assert_eq!(h.vault.get_claimable(&pr("bob"), &btc()), Decimal::from(4));
    assert_eq!(h.claim_kind("bob", "BTC"), ErrorKind::InvalidPhase);
}

#[test]
fn failed_collapse_sweep_can_be_retried() {
    let mut h = Harness::new();
    h.activate_and_fund("BTC", 5);
    h.transfer.block(op());

    let report = h.vault.collapse(&op()).unwrap();
    assert_eq!(h.vault.phase(), CustodyState::Collapsed);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::TransferFailed);
    assert_eq!(h.vault.uncommitted(&btc()), Decimal::from(5));

    let err = h.vault.sweep(&pr("s1"), &btc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    h.transfer.unblock(&op());
    let paid = h.vault.sweep(&op(), &btc()).unwrap();
    assert_eq!(paid.kind, PayoutKind::Sweep);
    assert_eq!(paid.amount, Decimal::from(5));
}

// ═══════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════

struct Harness {
    vault: ConditionalVault,
    transfer: InMemoryTransfer,
    clock: ManualClock,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(VaultConfig::default())
    }

    fn with_config(config: VaultConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let transfer = InMemoryTransfer::new();
        let clock = ManualClock::new(T0);
        let directory = AccessControl::new("op").with_supervisors(["s1", "s2", "s3"]);
        let vault =
            ConditionalVault::new(config, directory, transfer.clone(), clock.clone()).unwrap();
        Self { vault, transfer, clock }
    }

    fn activate_and_fund(&mut self, asset: &str, amount: i64) {
        self.vault.activate(&op()).unwrap();
        self.vault
            .deposit(&pr("alice"), &AssetId::from(asset), Decimal::from(amount))
            .unwrap();
    }

    fn claim_kind(&mut self, who: &str, asset: &str) -> ErrorKind {
        self.vault
            .claim(&pr(who), &AssetId::from(asset))
            .unwrap_err()
            .kind()
    }
}

fn op() -> Principal {
    Principal::from("op")
}

fn pr(name: &str) -> Principal {
    Principal::from(name)
}

fn cid(n: u64) -> ConditionId {
    ConditionId::new(n)
}

fn btc() -> AssetId {
    AssetId::from("BTC")
}

fn eth() -> AssetId {
    AssetId::from("ETH")
}

fn release(cond: u64, who: &str, asset: &str, amount: i64, emergency: bool) -> ReleaseConfig {
    ReleaseConfig {
        condition_id: cid(cond),
        beneficiary: pr(who),
        asset: AssetId::from(asset),
        amount: Decimal::from(amount),
        emergency_claimable: emergency,
    }
}
