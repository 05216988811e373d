//! Layer resource: the unit of infrastructure-as-code being reconciled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repository::RemediationStrategy;
use super::run::{Action, Run};
use super::{object_key, Resource, DEFAULT_NAMESPACE};
use crate::annotations;

/// Label set on layers that another controller owns.
pub const MANAGED_BY_LABEL: &str = "driftwatch.io/managed-by";

/// Owner kind marking a layer created for a pull request.
pub const PULL_REQUEST_OWNER_KIND: &str = "PullRequest";

/// Reference to another resource by namespace and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    /// Creates a reference to `namespace/name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the `namespace/name` key, resolving an empty namespace
    /// against `fallback`.
    pub fn key_or(&self, fallback: &str) -> String {
        object_key(self.namespace_or(fallback), &self.name)
    }

    /// Returns the namespace, or `fallback` when unset.
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            if fallback.is_empty() {
                DEFAULT_NAMESPACE
            } else {
                fallback
            }
        } else {
            &self.namespace
        }
    }
}

/// Layer specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    /// The repository holding the layer's code.
    pub repository: ResourceRef,

    pub branch: String,

    /// Path of the layer inside the repository.
    pub path: String,

    /// Per-layer override of the repository remediation strategy.
    #[serde(default)]
    pub remediation_strategy: RemediationStrategy,
}

/// Status of a diagnostic condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A diagnostic condition recorded on the layer status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Creates a condition observed at `now`.
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: now,
        }
    }

    /// Returns true if the condition holds.
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Entry of the layer run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRun {
    pub name: String,
    pub action: Action,
    pub commit: String,
    pub date: DateTime<Utc>,
}

impl LayerRun {
    /// Summarizes a run for the layer status.
    pub fn from_run(run: &Run) -> Self {
        Self {
            name: run.metadata.name.clone(),
            action: run.spec.action,
            commit: run.spec.revision.clone(),
            date: run.metadata.creation_timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Observed state of a layer. Everything here is a cache of the last
/// reconciliation and is recomputed on the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStatus {
    /// Label of the state chosen by the last reconciliation.
    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LayerRun>,

    #[serde(default)]
    pub last_result: String,

    /// Most recent first.
    #[serde(default)]
    pub latest_runs: Vec<LayerRun>,
}

impl LayerStatus {
    /// Records a newly created run, evicting the oldest history entries
    /// beyond `limit`.
    pub fn record_run(&mut self, run: LayerRun, limit: usize) {
        self.latest_runs.insert(0, run.clone());
        self.latest_runs.truncate(limit);
        self.last_run = Some(run);
    }

    /// Replaces the conditions, keeping the previous transition time of any
    /// condition whose status did not change.
    pub fn set_conditions(&mut self, conditions: Vec<Condition>) {
        let merged = conditions
            .into_iter()
            .map(|mut condition| {
                if let Some(previous) = self.condition(&condition.condition_type) {
                    if previous.status == condition.status {
                        condition.last_transition_time = previous.last_transition_time;
                    }
                }
                condition
            })
            .collect();
        self.conditions = merged;
    }

    /// Returns the recorded condition of the given type.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Progress of a manual sync or apply request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualSyncStatus {
    None,
    /// The request annotation is set and has not been consumed yet.
    Annotated,
    /// The controller consumed the request in its last reconciliation.
    Pending,
}

/// Type alias for Layer resource.
pub type Layer = Resource<LayerSpec, LayerStatus>;

impl Layer {
    /// Returns true if the layer was created for a pull request.
    pub fn is_pr(&self) -> bool {
        self.metadata
            .owner_references
            .first()
            .is_some_and(|owner| owner.kind == PULL_REQUEST_OWNER_KIND)
    }

    /// Returns true if another controller manages this layer.
    pub fn is_managed(&self) -> bool {
        self.metadata
            .labels
            .get(MANAGED_BY_LABEL)
            .is_some_and(|v| !v.is_empty())
    }

    /// Returns the `namespace/name` key of the layer repository.
    pub fn repository_key(&self) -> String {
        self.spec.repository.key_or(self.namespace())
    }

    /// Progress of a manual sync request.
    pub fn manual_sync_status(&self) -> ManualSyncStatus {
        self.manual_status(annotations::SYNC_NOW, "IsSyncScheduled")
    }

    /// Progress of a manual apply request.
    pub fn manual_apply_status(&self) -> ManualSyncStatus {
        self.manual_status(annotations::APPLY_NOW, "IsApplyScheduled")
    }

    /// Apply status first, then sync status.
    pub fn manual_operation_status(&self) -> ManualSyncStatus {
        match self.manual_apply_status() {
            ManualSyncStatus::None => self.manual_sync_status(),
            status => status,
        }
    }

    fn manual_status(&self, annotation: &str, condition_type: &str) -> ManualSyncStatus {
        if self.annotation(annotation).is_some() {
            return ManualSyncStatus::Annotated;
        }
        match self.status.condition(condition_type) {
            Some(condition) if condition.is_true() => ManualSyncStatus::Pending,
            _ => ManualSyncStatus::None,
        }
    }

    /// A valid plan exists when the last plan recorded a non-empty checksum.
    pub fn has_valid_plan(&self) -> bool {
        self.annotation(annotations::LAST_PLAN_SUM)
            .is_some_and(|sum| !sum.is_empty())
    }
}
