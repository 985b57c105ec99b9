//! Explicit transition table for every period graph.
//!
//! A handler either passes (the service then persists the workspace and audits
//! the change), blocks with the full list of violations, or refuses silently
//! when the actor lacks the capability. Combinations missing from the table are
//! no-ops.

mod final_term;
mod first_term;
mod makeup;
mod shared;

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::attendance::DispositionEntry;
use super::domain::{Actor, PeriodType, SessionState};
use super::messages::Validation;
use super::minutes::ClosingForm;
use super::policy::GradingPolicy;
use super::repository::{DocumentStore, GradingRepository};
use super::service::SessionServiceError;
use super::session::{PresenceRoll, SessionWorkspace};

/// Extra input some transitions consume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPayload {
    #[serde(default)]
    pub presence: Option<PresenceForm>,
    #[serde(default)]
    pub dispositions: Vec<DispositionEntry>,
    #[serde(default)]
    pub closing: Option<ClosingForm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceForm {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(flatten)]
    pub roll: PresenceRoll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardResult {
    /// Apply the new state; the validation may still carry warnings.
    Passed(Validation),
    Blocked(Validation),
    /// Refused without messages, exactly like an unknown transition.
    Unauthorized,
}

pub struct TransitionContext<'a> {
    pub workspace: &'a mut SessionWorkspace,
    pub actor: &'a Actor,
    pub payload: &'a TransitionPayload,
    pub repository: &'a dyn GradingRepository,
    pub documents: &'a dyn DocumentStore,
    pub policy: &'a GradingPolicy,
}

pub type TransitionResult = Result<GuardResult, SessionServiceError>;

pub type TransitionFn = fn(&mut TransitionContext<'_>) -> TransitionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    pub period: PeriodType,
    pub from: SessionState,
    pub to: SessionState,
}

pub struct TransitionTable {
    handlers: HashMap<TransitionKey, TransitionFn>,
}

impl TransitionTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Every graph: first term, final, and make-up (shared by the deferred make-up).
    pub fn standard() -> Self {
        let mut table = Self::empty();
        first_term::register(&mut table);
        final_term::register(&mut table);
        makeup::register(&mut table, PeriodType::MakeupExam);
        makeup::register(&mut table, PeriodType::DeferredMakeup);
        table
    }

    pub fn register(
        &mut self,
        period: PeriodType,
        from: SessionState,
        to: SessionState,
        handler: TransitionFn,
    ) {
        self.handlers
            .insert(TransitionKey { period, from, to }, handler);
    }

    pub fn get(
        &self,
        period: PeriodType,
        from: SessionState,
        to: SessionState,
    ) -> Option<TransitionFn> {
        self.handlers
            .get(&TransitionKey { period, from, to })
            .copied()
    }

    /// States reachable from `from` in the given period.
    pub fn targets(&self, period: PeriodType, from: SessionState) -> Vec<SessionState> {
        let mut targets: Vec<SessionState> = self
            .handlers
            .keys()
            .filter(|key| key.period == period && key.from == from)
            .map(|key| key.to)
            .collect();
        targets.sort();
        targets
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::standard()
    }
}

const fn stage(step: u8) -> SessionState {
    SessionState::Stage(step)
}

const N: SessionState = SessionState::NotStarted;
const C: SessionState = SessionState::Closed;
