//! Priority-ordered decision over the evaluated conditions.

use super::conditions::Conditions;
use super::states::State;
use crate::annotations;
use crate::resource::Action;

/// A single-shot request annotation the reconciler must remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    SyncNow,
    ApplyNow,
}

impl Signal {
    /// Returns the annotation carrying this request.
    pub fn annotation(&self) -> &'static str {
        match self {
            Signal::SyncNow => annotations::SYNC_NOW,
            Signal::ApplyNow => annotations::APPLY_NOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub state: State,
    /// Set only when this decision acts on the request.
    pub consume: Option<Signal>,
    /// No rule matched. Should never happen.
    pub anomaly: bool,
}

impl Decision {
    fn to(state: State) -> Self {
        Self {
            state,
            consume: None,
            anomaly: false,
        }
    }

    fn consuming(state: State, signal: Signal) -> Self {
        Self {
            state,
            consume: Some(signal),
            anomaly: false,
        }
    }
}

/// Maps the conditions to the next state. The first matching rule wins.
pub fn decide(c: &Conditions) -> Decision {
    let plan_exhausted = c.plan_retries_exhausted();
    let apply_exhausted = c.apply_retries_exhausted();

    if c.is_running {
        return Decision::to(State::Idle);
    }
    if c.is_sync_scheduled {
        return Decision::consuming(State::PlanNeeded, Signal::SyncNow);
    }
    if c.is_apply_scheduled {
        return Decision::consuming(State::ApplyNeeded { is_manual: true }, Signal::ApplyNow);
    }
    if (c.is_last_plan_too_old || !c.is_last_relevant_commit_planned) && !plan_exhausted {
        return Decision::to(State::PlanNeeded);
    }
    if !c.is_apply_up_to_date && !c.has_last_plan_failed && !apply_exhausted {
        return Decision::to(State::ApplyNeeded { is_manual: false });
    }
    if plan_exhausted || apply_exhausted {
        let action = if plan_exhausted {
            Action::Plan
        } else {
            Action::Apply
        };
        return Decision::to(State::MaxRetriesReached { action });
    }

    Decision {
        state: State::Idle,
        consume: None,
        anomaly: true,
    }
}
