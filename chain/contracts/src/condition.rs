//! Release conditions
//!
//! A closed set of condition variants. Leaf conditions (time, approval) are
//! decided from their own payload; compound conditions are the AND of their
//! children and are decided by the evaluator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use types::ids::{ConditionId, Principal};

use crate::errors::ConditionError;

/// Condition payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionKind {
    /// Met once the clock reaches `release_at` (unix seconds).
    TimeBased { release_at: i64 },
    /// Met once `required_count` distinct approvers have approved.
    ApprovalBased {
        required_approvers: BTreeSet<Principal>,
        required_count: usize,
        approvals: BTreeSet<Principal>,
    },
    /// Met once every child is met.
    Compound { children: Vec<ConditionId> },
}

impl ConditionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConditionKind::TimeBased { .. } => "time_based",
            ConditionKind::ApprovalBased { .. } => "approval_based",
            ConditionKind::Compound { .. } => "compound",
        }
    }
}

/// A release condition with its persisted resolution state.
///
/// `processed` and `met` flip together, once, when the condition is first
/// resolved as met. Neither ever reverts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    id: ConditionId,
    kind: ConditionKind,
    met: bool,
    processed: bool,
}

impl Condition {
    pub(crate) fn new(id: ConditionId, kind: ConditionKind) -> Self {
        Self {
            id,
            kind,
            met: false,
            processed: false,
        }
    }

    pub fn id(&self) -> ConditionId {
        self.id
    }

    pub fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    pub fn is_met(&self) -> bool {
        self.met
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Child ids of a compound condition; empty for leaves.
    pub fn children(&self) -> &[ConditionId] {
        match &self.kind {
            ConditionKind::Compound { children } => children,
            _ => &[],
        }
    }

    /// Decide a leaf condition against `now`. Returns `None` for compound
    /// conditions, whose outcome depends on their children.
    pub fn leaf_satisfied(&self, now: i64) -> Option<bool> {
        match &self.kind {
            ConditionKind::TimeBased { release_at } => Some(now >= *release_at),
            ConditionKind::ApprovalBased {
                required_count,
                approvals,
                ..
            } => Some(approvals.len() >= *required_count),
            ConditionKind::Compound { .. } => None,
        }
    }

    /// Approvals recorded so far and the threshold, for approval conditions.
    pub fn approval_progress(&self) -> Option<(usize, usize)> {
        match &self.kind {
            ConditionKind::ApprovalBased {
                required_count,
                approvals,
                ..
            } => Some((approvals.len(), *required_count)),
            _ => None,
        }
    }

    /// Record an approval. Approvals keep being accepted after the condition
    /// is met; they simply have no further effect.
    pub(crate) fn record_approval(
        &mut self,
        principal: &Principal,
    ) -> Result<(usize, usize), ConditionError> {
        match &mut self.kind {
            ConditionKind::ApprovalBased {
                required_approvers,
                required_count,
                approvals,
            } => {
                if !required_approvers.contains(principal) {
                    return Err(ConditionError::NotAnApprover {
                        id: self.id,
                        principal: principal.clone(),
                    });
                }
                if !approvals.insert(principal.clone()) {
                    return Err(ConditionError::AlreadyApproved {
                        id: self.id,
                        principal: principal.clone(),
                    });
                }
                Ok((approvals.len(), *required_count))
            }
            _ => Err(ConditionError::NotApprovalCondition { id: self.id }),
        }
    }

    pub(crate) fn mark_met(&mut self) {
        self.met = true;
        self.processed = true;
    }
}
