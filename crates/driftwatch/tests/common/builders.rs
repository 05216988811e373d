//! Builders for creating test resources programmatically.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};

use driftwatch::annotations;
use driftwatch::resource::{
    Action, Layer, LayerRun, LayerSpec, Repository, RepositorySpec, ResourceKind, ResourceRef,
    Run, RunSpec, RunState, SyncWindow, WindowKind, MANAGED_BY_LABEL,
};

pub const NAMESPACE: &str = "infra";
pub const REPOSITORY: &str = "platform";

/// Builder for creating `Layer` instances.
pub struct LayerBuilder {
    layer: Layer,
}

impl LayerBuilder {
    /// A layer of the default repository with no facts recorded.
    pub fn new(name: &str) -> Self {
        Self {
            layer: Layer::new(
                ResourceKind::Layer,
                NAMESPACE,
                name,
                LayerSpec {
                    repository: ResourceRef::new(NAMESPACE, REPOSITORY),
                    branch: "main".to_string(),
                    path: format!("terraform/{}", name),
                    ..Default::default()
                },
            ),
        }
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.layer
            .metadata
            .annotations
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn relevant_commit(self, commit: &str) -> Self {
        self.annotation(annotations::LAST_RELEVANT_COMMIT, commit)
    }

    /// Records a successful plan of `commit` at `date`.
    pub fn planned(self, sum: &str, commit: &str, date: DateTime<Utc>) -> Self {
        self.annotation(annotations::LAST_PLAN_SUM, sum)
            .annotation(annotations::LAST_PLAN_COMMIT, commit)
            .annotation(annotations::LAST_PLAN_DATE, &date.to_rfc3339())
    }

    pub fn applied(self, sum: &str) -> Self {
        self.annotation(annotations::LAST_APPLY_SUM, sum)
    }

    pub fn auto_apply(mut self, enabled: bool) -> Self {
        self.layer.spec.remediation_strategy.auto_apply = Some(enabled);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.layer.spec.remediation_strategy.on_error.max_retries = Some(retries);
        self
    }

    pub fn managed(mut self) -> Self {
        self.layer
            .metadata
            .labels
            .insert(MANAGED_BY_LABEL.to_string(), "pull-request".to_string());
        self
    }

    /// Points the layer at `run` as its last run.
    pub fn last_run(mut self, run: &Run) -> Self {
        self.layer.status.last_run = Some(LayerRun::from_run(run));
        self
    }

    pub fn build(self) -> Layer {
        self.layer
    }
}

/// Builder for creating `Repository` instances.
pub struct RepositoryBuilder {
    spec: RepositorySpec,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self {
            spec: RepositorySpec {
                url: "https://git.example.com/platform.git".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn auto_apply(mut self, enabled: bool) -> Self {
        self.spec.remediation_strategy.auto_apply = Some(enabled);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.spec.remediation_strategy.on_error.max_retries = Some(retries);
        self
    }

    /// Adds an every-day window gating `actions` (both when empty).
    pub fn window(mut self, kind: WindowKind, start: &str, end: &str, actions: &[Action]) -> Self {
        self.spec.sync_windows.push(SyncWindow {
            kind,
            days: vec![],
            start: start.to_string(),
            end: end.to_string(),
            layers: vec![],
            actions: actions.to_vec(),
        });
        self
    }

    pub fn build(self) -> Repository {
        Repository::new(ResourceKind::Repository, NAMESPACE, REPOSITORY, self.spec)
    }
}

impl Default for RepositoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating `Run` instances.
pub struct RunBuilder {
    run: Run,
}

impl RunBuilder {
    pub fn new(name: &str, layer: &str, action: Action) -> Self {
        Self {
            run: Run::new(
                ResourceKind::Run,
                NAMESPACE,
                name,
                RunSpec {
                    action,
                    layer: ResourceRef::new(NAMESPACE, layer),
                    revision: "abc123".to_string(),
                },
            ),
        }
    }

    pub fn state(mut self, state: RunState) -> Self {
        self.run.status.state = state;
        self
    }

    pub fn revision(mut self, revision: &str) -> Self {
        self.run.spec.revision = revision.to_string();
        self
    }

    /// Sets the creation time to `minutes` before `now`.
    pub fn created_minutes_ago(mut self, now: DateTime<Utc>, minutes: i64) -> Self {
        self.run.metadata.creation_timestamp = Some(now - Duration::minutes(minutes));
        self
    }

    pub fn build(self) -> Run {
        self.run
    }
}
