//! Condition registry — append-only arena of condition definitions
//!
//! Conditions live in a `Vec` and are addressed internally by their arena
//! index; the id map is only used to translate caller ids. Structural checks
//! happen at definition time: a compound condition may only reference
//! conditions that already exist, which keeps a registry built through
//! `define_*` acyclic. Registries rebuilt from snapshots go through
//! [`ConditionRegistry::validate_structure`] instead.

use std::collections::{BTreeSet, HashMap, HashSet};
use types::ids::{ConditionId, Principal};

use crate::condition::{Condition, ConditionKind};
use crate::errors::ConditionError;

#[derive(Debug, Clone, Default)]
pub struct ConditionRegistry {
    conditions: Vec<Condition>,
    index: HashMap<ConditionId, usize>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted conditions, re-checking ids, each
    /// condition's own invariants and graph structure.
    pub fn from_conditions(conditions: Vec<Condition>) -> Result<Self, ConditionError> {
        let mut registry = Self::new();
        for condition in conditions {
            let id = condition.id();
            if registry.index.contains_key(&id) {
                return Err(ConditionError::DuplicateId { id });
            }
            validate_condition(&condition)?;
            registry.index.insert(id, registry.conditions.len());
            registry.conditions.push(condition);
        }
        registry.validate_structure()?;
        Ok(registry)
    }

    // ───────────────────────── Definition ─────────────────────────

    /// Define a condition met once the clock reaches `release_at`.
    pub fn define_time(&mut self, id: ConditionId, release_at: i64) -> Result<(), ConditionError> {
        self.check_unused(id)?;
        self.insert(Condition::new(id, ConditionKind::TimeBased { release_at }));
        Ok(())
    }

    /// Define a `required_count`-of-n approval condition. Duplicate approvers
    /// are collapsed before the threshold is checked.
    pub fn define_approval<I>(
        &mut self,
        id: ConditionId,
        approvers: I,
        required_count: usize,
    ) -> Result<(), ConditionError>
    where
        I: IntoIterator<Item = Principal>,
    {
        self.check_unused(id)?;
        let required_approvers: BTreeSet<Principal> = approvers.into_iter().collect();
        check_threshold(required_count, &required_approvers)?;
        self.insert(Condition::new(
            id,
            ConditionKind::ApprovalBased {
                required_approvers,
                required_count,
                approvals: BTreeSet::new(),
            },
        ));
        Ok(())
    }

    /// Define the AND of already-defined conditions.
    pub fn define_compound(
        &mut self,
        id: ConditionId,
        children: Vec<ConditionId>,
    ) -> Result<(), ConditionError> {
        self.check_unused(id)?;
        if children.is_empty() {
            return Err(ConditionError::EmptyChildList { id });
        }
        if let Some(child) = children.iter().find(|c| !self.index.contains_key(c)) {
            return Err(ConditionError::UnknownChild {
                parent: id,
                child: *child,
            });
        }
        self.insert(Condition::new(id, ConditionKind::Compound { children }));
        Ok(())
    }

    fn check_unused(&self, id: ConditionId) -> Result<(), ConditionError> {
        if self.index.contains_key(&id) {
            return Err(ConditionError::DuplicateId { id });
        }
        Ok(())
    }

    fn insert(&mut self, condition: Condition) {
        self.index.insert(condition.id(), self.conditions.len());
        self.conditions.push(condition);
    }

    // ───────────────────────── Lookup ─────────────────────────

    pub fn get(&self, id: &ConditionId) -> Option<&Condition> {
        self.index.get(id).map(|&i| &self.conditions[i])
    }

    pub fn contains(&self, id: &ConditionId) -> bool {
        self.index.contains_key(id)
    }

    /// True when the condition exists and has been resolved as met.
    pub fn is_met(&self, id: &ConditionId) -> bool {
        self.get(id).map_or(false, Condition::is_met)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub(crate) fn index_of(&self, id: &ConditionId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn at(&self, index: usize) -> &Condition {
        &self.conditions[index]
    }

    pub(crate) fn at_mut(&mut self, index: usize) -> &mut Condition {
        &mut self.conditions[index]
    }

    pub(crate) fn get_mut(&mut self, id: &ConditionId) -> Option<&mut Condition> {
        let i = self.index_of(id)?;
        Some(&mut self.conditions[i])
    }

    // ───────────────────────── Graph walk ─────────────────────────

    /// Post-order of every condition reachable from `root`, children before
    /// parents. Nodes for which `prune` holds are emitted without descending
    /// into them. Uses an explicit stack; a node met again while still on the
    /// current path is a cycle.
    pub(crate) fn post_order<F>(&self, root: usize, prune: F) -> Result<Vec<usize>, ConditionError>
    where
        F: Fn(&Condition) -> bool,
    {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        self.walk(root, &prune, &mut done, &mut order)?;
        Ok(order)
    }

    fn walk<F>(
        &self,
        root: usize,
        prune: &F,
        done: &mut HashSet<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), ConditionError>
    where
        F: Fn(&Condition) -> bool,
    {
        let mut on_path = HashSet::new();
        // (arena index, next child cursor)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        on_path.insert(root);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let condition = &self.conditions[node];
            let children = if prune(condition) { &[][..] } else { condition.children() };

            if frame.1 < children.len() {
                let child_id = children[frame.1];
                frame.1 += 1;
                let child = self.index_of(&child_id).ok_or(ConditionError::UnknownChild {
                    parent: condition.id(),
                    child: child_id,
                })?;
                if done.contains(&child) {
                    continue;
                }
                if !on_path.insert(child) {
                    return Err(ConditionError::CycleDetected { id: child_id });
                }
                stack.push((child, 0));
            } else {
                stack.pop();
                on_path.remove(&node);
                done.insert(node);
                order.push(node);
            }
        }
        Ok(())
    }

    /// Check that every compound child exists and the graph is acyclic.
    pub fn validate_structure(&self) -> Result<(), ConditionError> {
        let mut done = HashSet::new();
        let mut order = Vec::with_capacity(self.conditions.len());
        for root in 0..self.conditions.len() {
            if done.contains(&root) {
                continue;
            }
            if let ConditionKind::Compound { children } = self.conditions[root].kind() {
                if children.is_empty() {
                    return Err(ConditionError::EmptyChildList {
                        id: self.conditions[root].id(),
                    });
                }
            }
            self.walk(root, &|_: &Condition| false, &mut done, &mut order)?;
        }
        Ok(())
    }
}

fn check_threshold(
    required_count: usize,
    required_approvers: &BTreeSet<Principal>,
) -> Result<(), ConditionError> {
    if required_count == 0 || required_count > required_approvers.len() {
        return Err(ConditionError::InvalidThreshold {
            required: required_count,
            approvers: required_approvers.len(),
        });
    }
    Ok(())
}

/// Invariants a persisted condition must hold on its own: a valid approval
/// threshold, approvals drawn from the approver set, and no processed
/// condition left unmet.
fn validate_condition(condition: &Condition) -> Result<(), ConditionError> {
    let id = condition.id();
    if condition.is_processed() && !condition.is_met() {
        return Err(ConditionError::ProcessedUnmet { id });
    }
    if let ConditionKind::ApprovalBased {
        required_approvers,
        required_count,
        approvals,
    } = condition.kind()
    {
        check_threshold(*required_count, required_approvers)?;
        if let Some(principal) = approvals.difference(required_approvers).next() {
            return Err(ConditionError::NotAnApprover {
                id,
                principal: principal.clone(),
            });
        }
    }
    Ok(())
}
