//! Condition evaluator
//!
//! Resolution walks the condition graph bottom-up from the requested root,
//! decides every unprocessed node, then commits all newly met conditions and
//! their credits in one step. If crediting fails nothing is written and the
//! conditions stay re-checkable.

use std::collections::HashMap;
use tracing::{debug, info};
use types::ids::ConditionId;

use crate::errors::{ConditionError, VaultError};
use crate::events::{BalanceCredited, ConditionMet};
use crate::ledger::ReleaseLedger;
use crate::registry::ConditionRegistry;

/// Outcome of one `resolve` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub condition_id: ConditionId,
    pub met: bool,
    /// Conditions that became met during this call, children first.
    pub newly_met: Vec<ConditionMet>,
}

impl Resolution {
    /// All credits applied by this call.
    pub fn credits(&self) -> impl Iterator<Item = &BalanceCredited> {
        self.newly_met.iter().flat_map(|m| m.credited.iter())
    }
}

pub struct ConditionEvaluator<'a> {
    registry: &'a mut ConditionRegistry,
    ledger: &'a mut ReleaseLedger,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(registry: &'a mut ConditionRegistry, ledger: &'a mut ReleaseLedger) -> Self {
        Self { registry, ledger }
    }

    pub fn resolve(&mut self, id: ConditionId, now: i64) -> Result<Resolution, VaultError> {
        let root = self
            .registry
            .index_of(&id)
            .ok_or(ConditionError::UnknownCondition { id })?;

        if self.registry.at(root).is_processed() {
            return Ok(Resolution {
                condition_id: id,
                met: self.registry.at(root).is_met(),
                newly_met: Vec::new(),
            });
        }

        let order = self.registry.post_order(root, |c| c.is_processed())?;

        // Decide bottom-up. Processed nodes are met by construction.
        let mut decided: HashMap<ConditionId, bool> = HashMap::with_capacity(order.len());
        let mut newly_met: Vec<usize> = Vec::new();
        for &node in &order {
            let condition = self.registry.at(node);
            let met = if condition.is_processed() {
                condition.is_met()
            } else {
                let met = match condition.leaf_satisfied(now) {
                    Some(met) => met,
                    None => condition
                        .children()
                        .iter()
                        .all(|child| decided.get(child).copied().unwrap_or(false)),
                };
                if met {
                    newly_met.push(node);
                }
                met
            };
            decided.insert(condition.id(), met);
        }

        let met = decided.get(&id).copied().unwrap_or(false);
        if newly_met.is_empty() {
            debug!(condition = %id, met, "Condition not yet met");
            return Ok(Resolution {
                condition_id: id,
                met,
                newly_met: Vec::new(),
            });
        }

        let ids: Vec<ConditionId> = newly_met.iter().map(|&n| self.registry.at(n).id()).collect();
        let plan = self.ledger.plan_credits(&ids)?;

        let mut credited: HashMap<ConditionId, Vec<BalanceCredited>> = HashMap::new();
        for &index in &plan.credited {
            if let Some(config) = self.ledger.config(index) {
                credited
                    .entry(config.condition_id)
                    .or_default()
                    .push(BalanceCredited {
                        config_index: index,
                        beneficiary: config.beneficiary.clone(),
                        asset: config.asset.clone(),
                        amount: config.amount,
                    });
            }
        }

        for &node in &newly_met {
            self.registry.at_mut(node).mark_met();
        }
        self.ledger.apply_credits(plan);

        let newly_met: Vec<ConditionMet> = ids
            .into_iter()
            .map(|condition_id| {
                let credited = credited.remove(&condition_id).unwrap_or_default();
                info!(condition = %condition_id, credits = credited.len(), "Condition met");
                ConditionMet {
                    condition_id,
                    credited,
                    at: now,
                }
            })
            .collect();

        Ok(Resolution {
            condition_id: id,
            met,
            newly_met,
        })
    }
}
