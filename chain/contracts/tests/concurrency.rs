//! Concurrency test
//!
//! Many threads hammer one `SharedVault`. Every operation runs inside the
//! vault's critical section, so each condition is credited once and each
//! balance is paid once no matter how the threads interleave.

use conditional_vault::adapter::InMemoryTransfer;
use conditional_vault::clock::ManualClock;
use conditional_vault::ledger::ReleaseConfig;
use conditional_vault::security::AccessControl;
use conditional_vault::{ConditionalVault, CustodyState, ErrorKind, SharedVault, VaultConfig};
use rust_decimal::Decimal;
use std::thread;
use types::ids::{AssetId, ConditionId, Principal};

const THREADS: usize = 8;

fn setup() -> (SharedVault, InMemoryTransfer) {
    let transfer = InMemoryTransfer::new();
    let directory = AccessControl::new("op").with_supervisors(["s1", "s2", "s3", "s4"]);
    let mut vault = ConditionalVault::new(
        VaultConfig::default(),
        directory,
        transfer.clone(),
        ManualClock::new(10),
    )
    .unwrap();

    let op = Principal::from("op");
    for n in 1..=4 {
        vault.define_time_condition(&op, ConditionId::new(n), 0).unwrap();
        vault
            .configure_release(
                &op,
                ReleaseConfig {
                    condition_id: ConditionId::new(n),
                    beneficiary: Principal::from("bob"),
                    asset: AssetId::from("BTC"),
                    amount: Decimal::from(n),
                    emergency_claimable: false,
                },
            )
            .unwrap();
    }
    vault.activate(&op).unwrap();
    (SharedVault::new(vault), transfer)
}

#[test]
fn test_concurrent_resolve_and_claim() {
    let (vault, transfer) = setup();
    let btc = AssetId::from("BTC");

    let depositors: Vec<_> = (0..THREADS)
        .map(|i| {
            let vault = vault.clone();
            thread::spawn(move || {
                let who = Principal::from(format!("depositor-{i}"));
                vault.deposit(&who, &AssetId::from("BTC"), Decimal::from(5)).unwrap();
            })
        })
        .collect();
    for handle in depositors {
        handle.join().unwrap();
    }

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let vault = vault.clone();
            thread::spawn(move || {
                for n in 1..=4 {
                    assert!(vault.resolve(ConditionId::new(n)).unwrap());
                }
                let _ = vault.claim(&Principal::from("bob"), &AssetId::from("BTC"));
            })
        })
        .collect();
    for handle in workers {
        handle.join().unwrap();
    }

    // 1 + 2 + 3 + 4 credited exactly once, paid exactly once
    assert_eq!(transfer.balance_of(&Principal::from("bob"), &btc), Decimal::from(10));
    assert_eq!(vault.get_claimable(&Principal::from("bob"), &btc), Decimal::ZERO);
    vault.with(|v| {
        assert_eq!(v.total_deposited(&btc), Decimal::from(5 * THREADS as i64));
        assert_eq!(v.paid_out(&btc), Decimal::from(10));
        v.ledger().check_conservation().unwrap();
    });
}

#[test]
fn test_concurrent_votes_reach_quorum_once() {
    let (vault, _) = setup();

    let voters: Vec<_> = ["s1", "s2", "s3", "s4"]
        .into_iter()
        .map(|name| {
            let vault = vault.clone();
            thread::spawn(move || vault.vote_emergency(&Principal::from(name)))
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in voters {
        match handle.join().unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::InvalidPhase);
                rejected += 1;
            }
        }
    }

    // ceil(0.51 * 4) = 3 votes declare the emergency; later votes find the
    // vault already in Emergency.
    assert_eq!(accepted, 3);
    assert_eq!(rejected, 1);
    assert_eq!(vault.phase(), CustodyState::Emergency);
    vault.with(|v| assert_eq!(v.concluded_sessions().len(), 1));
}
