//! Custody state machine
//!
//! ```text
//!            activate            freeze
//!   Setup ───────────▶ Active ◀──────────▶ Frozen
//!                        │      unfreeze     │
//!                        ├──── vote ─────────┤──▶ Emergency
//!                        └──── collapse ─────┴──▶ Collapsed
//! ```
//!
//! Emergency votes are collected in versioned [`EmergencyVoteSession`]s. A
//! session ends when it passes, when it expires (first vote older than the
//! configured TTL) or when the vault collapses; ended sessions are archived
//! and the next vote opens a new version.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};
use types::ids::Principal;

use crate::errors::CustodyError;
use crate::security::PrincipalDirectory;

/// Lifecycle phase of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustodyState {
    Setup,
    Active,
    Frozen,
    Emergency,
    Collapsed,
}

impl CustodyState {
    /// Phases in which conditions resolve and normal claims are paid.
    pub const OPERATIONAL: &'static [CustodyState] = &[CustodyState::Active, CustodyState::Frozen];

    pub fn is_operational(&self) -> bool {
        Self::OPERATIONAL.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CustodyState::Setup => "setup",
            CustodyState::Active => "active",
            CustodyState::Frozen => "frozen",
            CustodyState::Emergency => "emergency",
            CustodyState::Collapsed => "collapsed",
        }
    }
}

impl fmt::Display for CustodyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an emergency vote session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    Open,
    Passed,
    Expired,
    Abandoned,
}

/// One round of emergency voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyVoteSession {
    pub version: u64,
    pub opened_at: i64,
    /// Voter → time of vote.
    votes_cast: BTreeMap<Principal, i64>,
    pub outcome: SessionOutcome,
}

impl EmergencyVoteSession {
    fn open(version: u64, opened_at: i64) -> Self {
        Self {
            version,
            opened_at,
            votes_cast: BTreeMap::new(),
            outcome: SessionOutcome::Open,
        }
    }

    pub fn vote_count(&self) -> usize {
        self.votes_cast.len()
    }

    pub fn has_voted(&self, principal: &Principal) -> bool {
        self.votes_cast.contains_key(principal)
    }

    pub fn voters(&self) -> impl Iterator<Item = &Principal> {
        self.votes_cast.keys()
    }

    pub fn is_expired(&self, now: i64, ttl: Option<i64>) -> bool {
        ttl.map_or(false, |ttl| now.saturating_sub(self.opened_at) >= ttl)
    }
}

/// Result of a recorded emergency vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote recorded, quorum not yet reached.
    Pending { session: u64, votes: usize, required: usize },
    /// The vault entered Emergency.
    EmergencyDeclared { session: u64 },
}

#[derive(Debug, Clone)]
pub struct CustodyStateMachine {
    state: CustodyState,
    quorum: Decimal,
    session_ttl: Option<i64>,
    session: Option<EmergencyVoteSession>,
    concluded: Vec<EmergencyVoteSession>,
    next_version: u64,
}

impl CustodyStateMachine {
    pub fn new(quorum: Decimal, session_ttl: Option<i64>) -> Self {
        Self {
            state: CustodyState::Setup,
            quorum,
            session_ttl,
            session: None,
            concluded: Vec::new(),
            next_version: 1,
        }
    }

    /// Rebuild from persisted parts.
    pub(crate) fn from_parts(
        state: CustodyState,
        quorum: Decimal,
        session_ttl: Option<i64>,
        session: Option<EmergencyVoteSession>,
        concluded: Vec<EmergencyVoteSession>,
        next_version: u64,
    ) -> Self {
        Self {
            state,
            quorum,
            session_ttl,
            session,
            concluded,
            next_version,
        }
    }

    pub fn state(&self) -> CustodyState {
        self.state
    }

    pub fn session(&self) -> Option<&EmergencyVoteSession> {
        self.session.as_ref()
    }

    pub fn concluded_sessions(&self) -> &[EmergencyVoteSession] {
        &self.concluded
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.next_version
    }

    /// Supervisor votes needed to declare an emergency:
    /// `ceil(quorum * supervisors)`, at least one.
    pub fn required_votes(&self, supervisors: usize) -> usize {
        let raw = (self.quorum * Decimal::from(supervisors)).ceil();
        raw.to_usize().unwrap_or(usize::MAX).max(1)
    }

    /// Fail unless the current phase is one of `allowed`.
    pub fn require(
        &self,
        operation: &'static str,
        allowed: &[CustodyState],
    ) -> Result<(), CustodyError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CustodyError::InvalidPhase {
                operation,
                phase: self.state,
            })
        }
    }

    // ───────────────────────── Transitions ─────────────────────────

    /// Setup → Active. Operator-only.
    pub fn activate(
        &mut self,
        caller: &Principal,
        directory: &dyn PrincipalDirectory,
    ) -> Result<CustodyState, CustodyError> {
        self.require("activate", &[CustodyState::Setup])?;
        require_operator(caller, directory, "activate")?;
        Ok(self.transition(CustodyState::Active))
    }

    /// Active → Frozen. Any supervisor.
    pub fn freeze(
        &mut self,
        caller: &Principal,
        directory: &dyn PrincipalDirectory,
    ) -> Result<CustodyState, CustodyError> {
        self.require("freeze", &[CustodyState::Active])?;
        if !directory.is_supervisor(caller) {
            return Err(unauthorized(caller, "freeze"));
        }
        Ok(self.transition(CustodyState::Frozen))
    }

    /// Frozen → Active. Operator or any supervisor.
    pub fn unfreeze(
        &mut self,
        caller: &Principal,
        directory: &dyn PrincipalDirectory,
    ) -> Result<CustodyState, CustodyError> {
        self.require("unfreeze", &[CustodyState::Frozen])?;
        if !directory.is_operator(caller) && !directory.is_supervisor(caller) {
            return Err(unauthorized(caller, "unfreeze"));
        }
        Ok(self.transition(CustodyState::Active))
    }

    /// Active|Frozen → Collapsed. Operator-only. An open vote session is
    /// archived as abandoned.
    pub fn collapse(
        &mut self,
        caller: &Principal,
        directory: &dyn PrincipalDirectory,
    ) -> Result<CustodyState, CustodyError> {
        self.require("collapse", CustodyState::OPERATIONAL)?;
        require_operator(caller, directory, "collapse")?;
        self.conclude(SessionOutcome::Abandoned);
        Ok(self.transition(CustodyState::Collapsed))
    }

    /// Record an emergency vote. The operator's vote declares the emergency
    /// outright; supervisor votes do once they reach the quorum.
    pub fn vote_emergency(
        &mut self,
        caller: &Principal,
        directory: &dyn PrincipalDirectory,
        now: i64,
    ) -> Result<VoteOutcome, CustodyError> {
        self.require("vote_emergency", CustodyState::OPERATIONAL)?;
        let is_operator = directory.is_operator(caller);
        if !is_operator && !directory.is_supervisor(caller) {
            return Err(unauthorized(caller, "vote_emergency"));
        }

        let expired = self
            .session
            .as_ref()
            .map_or(false, |s| s.is_expired(now, self.session_ttl));
        if let Some(session) = self.session.as_ref().filter(|_| !expired) {
            if session.has_voted(caller) {
                return Err(CustodyError::AlreadyVoted {
                    principal: caller.clone(),
                    session: session.version,
                });
            }
        }

        if expired {
            self.conclude(SessionOutcome::Expired);
        }
        let opened = self.session.is_none();
        let next = self.next_version;
        let session = self
            .session
            .get_or_insert_with(|| EmergencyVoteSession::open(next, now));
        session.votes_cast.insert(caller.clone(), now);
        let (version, votes) = (session.version, session.vote_count());
        if opened {
            debug!(version, "Opened emergency vote session");
            self.next_version += 1;
        }

        let required = self.required_votes(directory.supervisor_count());
        debug!(session = version, voter = %caller, votes, required, "Emergency vote recorded");

        if is_operator || votes >= required {
            self.conclude(SessionOutcome::Passed);
            self.transition(CustodyState::Emergency);
            return Ok(VoteOutcome::EmergencyDeclared { session: version });
        }
        Ok(VoteOutcome::Pending {
            session: version,
            votes,
            required,
        })
    }

    fn conclude(&mut self, outcome: SessionOutcome) {
        if let Some(mut session) = self.session.take() {
            debug!(session = session.version, ?outcome, "Emergency vote session concluded");
            session.outcome = outcome;
            self.concluded.push(session);
        }
    }

    fn transition(&mut self, to: CustodyState) -> CustodyState {
        let from = self.state;
        self.state = to;
        info!(%from, %to, "Custody state transition");
        from
    }
}

fn unauthorized(caller: &Principal, operation: &'static str) -> CustodyError {
    CustodyError::Unauthorized {
        principal: caller.clone(),
        operation,
    }
}

pub(crate) fn require_operator(
    caller: &Principal,
    directory: &dyn PrincipalDirectory,
    operation: &'static str,
) -> Result<(), CustodyError> {
    if directory.is_operator(caller) {
        Ok(())
    } else {
        Err(unauthorized(caller, operation))
    }
}
