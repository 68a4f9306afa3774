//! SHA-256 digests
//!
//! The graph digest covers only the parts of the condition graph and release
//! table that are immutable after Setup: approvals and resolution flags are
//! left out, so the digest recorded at activation can be recomputed at any
//! later point and compared.

use sha2::{Digest, Sha256};

use crate::condition::ConditionKind;
use crate::ledger::ReleaseLedger;
use crate::registry::ConditionRegistry;

/// Digest of condition definitions and release configs.
pub fn graph_digest(registry: &ConditionRegistry, ledger: &ReleaseLedger) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update((registry.len() as u64).to_be_bytes());
    for condition in registry.iter() {
        hasher.update(condition.id().value().to_be_bytes());
        hasher.update(condition.kind().name().as_bytes());
        match condition.kind() {
            ConditionKind::TimeBased { release_at } => {
                hasher.update(release_at.to_be_bytes());
            }
            ConditionKind::ApprovalBased {
                required_approvers,
                required_count,
                ..
            } => {
                hasher.update((*required_count as u64).to_be_bytes());
                hasher.update((required_approvers.len() as u64).to_be_bytes());
                for approver in required_approvers {
                    write_str(&mut hasher, approver.as_str());
                }
            }
            ConditionKind::Compound { children } => {
                hasher.update((children.len() as u64).to_be_bytes());
                for child in children {
                    hasher.update(child.value().to_be_bytes());
                }
            }
        }
    }

    hasher.update((ledger.configs().len() as u64).to_be_bytes());
    for config in ledger.configs() {
        hasher.update(config.condition_id.value().to_be_bytes());
        write_str(&mut hasher, config.beneficiary.as_str());
        write_str(&mut hasher, config.asset.as_str());
        write_str(&mut hasher, &config.amount.normalize().to_string());
        hasher.update([u8::from(config.emergency_claimable)]);
    }

    hasher.finalize().into()
}

// Length-prefixed so adjacent strings cannot run together.
fn write_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ReleaseConfig;
    use rust_decimal::Decimal;
    use types::ids::{ConditionId, Principal};

    fn sample() -> (ConditionRegistry, ReleaseLedger) {
        let mut reg = ConditionRegistry::new();
        reg.define_time(ConditionId::new(1), 100).unwrap();
        reg.define_approval(
            ConditionId::new(2),
            vec![Principal::from("x"), Principal::from("y")],
            1,
        )
        .unwrap();
        let mut ledger = ReleaseLedger::new();
        ledger
            .configure(ReleaseConfig {
                condition_id: ConditionId::new(1),
                beneficiary: "bob".into(),
                asset: "BTC".into(),
                amount: Decimal::new(150, 2),
                emergency_claimable: false,
            })
            .unwrap();
        (reg, ledger)
    }

    #[test]
    fn test_graph_digest_ignores_approvals() {
        let (mut reg, ledger) = sample();
        let before = graph_digest(&reg, &ledger);
        reg.get_mut(&ConditionId::new(2))
            .unwrap()
            .record_approval(&"x".into())
            .unwrap();
        assert_eq!(graph_digest(&reg, &ledger), before);
    }

    #[test]
    fn test_graph_digest_covers_release_table() {
        let (reg, mut ledger) = sample();
        let before = graph_digest(&reg, &ledger);
        ledger
            .configure(ReleaseConfig {
                condition_id: ConditionId::new(2),
                beneficiary: "carol".into(),
                asset: "BTC".into(),
                amount: Decimal::ONE,
                emergency_claimable: true,
            })
            .unwrap();
        assert_ne!(graph_digest(&reg, &ledger), before);
    }

    #[test]
    fn test_graph_digest_amount_scale_insensitive() {
        let (reg, ledger) = sample();
        let mut rescaled = ReleaseLedger::new();
        rescaled
            .configure(ReleaseConfig {
                condition_id: ConditionId::new(1),
                beneficiary: "bob".into(),
                asset: "BTC".into(),
                amount: Decimal::new(1500, 3),
                emergency_claimable: false,
            })
            .unwrap();
        assert_eq!(graph_digest(&reg, &ledger), graph_digest(&reg, &rescaled));
    }
}
