//! Run resource: one plan or apply attempt against a layer.

use serde::{Deserialize, Serialize};

use super::layer::ResourceRef;
use super::Resource;

/// Action carried out by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Plan,
    Apply,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Plan => write!(f, "plan"),
            Action::Apply => write!(f, "apply"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(Action::Plan),
            "apply" => Ok(Action::Apply),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

impl Action {
    /// Capitalized form used in diagnostics.
    pub fn title(&self) -> &'static str {
        match self {
            Action::Plan => "Plan",
            Action::Apply => "Apply",
        }
    }
}

/// Lifecycle state of a run. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    /// Returns true once the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    /// Returns true if a run may move from `self` to `next`.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match self {
            RunState::Pending => next != RunState::Pending,
            RunState::Running => next != RunState::Pending,
            RunState::Succeeded | RunState::Failed => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Pending => write!(f, "Pending"),
            RunState::Running => write!(f, "Running"),
            RunState::Succeeded => write!(f, "Succeeded"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// Run specification. Immutable once the run is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    pub action: Action,
    /// The layer this run belongs to.
    pub layer: ResourceRef,
    /// Commit the run targets.
    pub revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    #[serde(default)]
    pub state: RunState,
    /// Number of attempts the runner made inside this run.
    #[serde(default)]
    pub retries: u32,
}

/// Type alias for Run resource.
pub type Run = Resource<RunSpec, RunStatus>;

impl Run {
    /// Returns true if the run belongs to the layer `namespace/name`.
    pub fn belongs_to(&self, namespace: &str, name: &str) -> bool {
        self.spec.layer.name == name && self.spec.layer.namespace_or(self.namespace()) == namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialization() {
        assert_eq!(serde_json::to_string(&Action::Plan).unwrap(), "\"plan\"");
        assert_eq!(serde_json::to_string(&Action::Apply).unwrap(), "\"apply\"");
        assert_eq!("APPLY".parse::<Action>(), Ok(Action::Apply));
    }

    #[test]
    fn test_run_state_terminal() {
        assert!(!RunState::Pending.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Succeeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_run_state_transitions() {
        assert!(RunState::Pending.can_transition_to(RunState::Running));
        assert!(RunState::Pending.can_transition_to(RunState::Failed));
        assert!(RunState::Running.can_transition_to(RunState::Succeeded));
        assert!(!RunState::Running.can_transition_to(RunState::Pending));
        assert!(!RunState::Succeeded.can_transition_to(RunState::Failed));
        assert!(!RunState::Failed.can_transition_to(RunState::Running));
    }
}
