//! The observable view of all layers, rebuilt from the mirrors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use super::watcher::Mirror;
use crate::annotations;
use crate::broadcast::Payload;
use crate::resource::{
    auto_apply_enabled, object_key, Layer, LayerRun, ManualSyncStatus, Repository, Run,
};

/// Result text of a plan that changes nothing.
pub const NO_CHANGES_RESULT: &str = "Plan: 0 to create, 0 to update, 0 to delete";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(rename = "id")]
    pub name: String,
    pub commit: String,
    pub date: String,
    pub action: String,
}

impl RunSummary {
    fn from_history(entry: &LayerRun) -> Self {
        Self {
            name: entry.name.clone(),
            commit: entry.commit.clone(),
            date: entry.date.to_rfc3339_opts(SecondsFormat::Secs, true),
            action: entry.action.to_string(),
        }
    }

    fn from_run(run: &Run) -> Self {
        Self {
            name: run.name().to_string(),
            commit: run.spec.revision.clone(),
            date: run
                .metadata
                .creation_timestamp
                .map(|date| date.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            action: run.spec.action.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub repository: String,
    pub branch: String,
    pub path: String,
    pub state: String,
    pub run_count: usize,
    pub last_run: RunSummary,
    pub last_run_at: String,
    pub last_result: String,
    pub is_running: bool,
    #[serde(rename = "isPR")]
    pub is_pr: bool,
    pub latest_runs: Vec<RunSummary>,
    pub manual_sync_status: ManualSyncStatus,
    pub has_valid_plan: bool,
    pub auto_apply: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayersResponse {
    pub results: Vec<LayerSummary>,
}

/// Coarse health shown for a layer.
pub fn layer_state(layer: &Layer) -> &'static str {
    let status = &layer.status;
    let mut state = if status.conditions.is_empty() {
        "disabled"
    } else {
        match status.state.as_str() {
            "ApplyNeeded" if status.last_result == NO_CHANGES_RESULT => "success",
            "ApplyNeeded" | "PlanNeeded" => "warning",
            _ => "success",
        }
    };
    if !layer.has_valid_plan() {
        state = "error";
    }
    state
}

/// Builds the summary of one layer. `runs` and `repositories` are keyed by
/// `namespace/name`.
pub fn summarize(
    layer: &Layer,
    runs: &HashMap<String, Run>,
    repositories: &HashMap<String, Repository>,
) -> LayerSummary {
    let last_run = layer
        .status
        .last_run
        .as_ref()
        .and_then(|entry| runs.get(&object_key(layer.namespace(), &entry.name)));
    let repository_key = layer.repository_key();

    LayerSummary {
        uid: layer.metadata.uid.clone(),
        name: layer.name().to_string(),
        namespace: layer.namespace().to_string(),
        repository: repository_key.clone(),
        branch: layer.spec.branch.clone(),
        path: layer.spec.path.clone(),
        state: layer_state(layer).to_string(),
        run_count: layer.status.latest_runs.len(),
        last_run: last_run.map(RunSummary::from_run).unwrap_or_default(),
        last_run_at: layer
            .status
            .last_run
            .as_ref()
            .map(|entry| entry.date.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default(),
        last_result: layer.status.last_result.clone(),
        is_running: last_run.is_some_and(|run| !run.status.state.is_terminal()),
        is_pr: layer.is_pr(),
        latest_runs: layer
            .status
            .latest_runs
            .iter()
            .map(RunSummary::from_history)
            .collect(),
        manual_sync_status: layer.manual_operation_status(),
        has_valid_plan: layer.has_valid_plan(),
        auto_apply: repositories
            .get(&repository_key)
            .is_some_and(|repository| auto_apply_enabled(repository, layer)),
    }
}

/// Summarizes every layer, ordered by namespace then name.
pub fn build_layers(
    layers: &[Layer],
    runs: &HashMap<String, Run>,
    repositories: &HashMap<String, Repository>,
) -> LayersResponse {
    let mut results: Vec<LayerSummary> = layers
        .iter()
        .map(|layer| summarize(layer, runs, repositories))
        .collect();
    results.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    LayersResponse { results }
}

/// Builds snapshots from the three mirrors.
#[derive(Clone)]
pub struct SnapshotBuilder {
    layers: Mirror<Layer>,
    runs: Mirror<Run>,
    repositories: Mirror<Repository>,
}

impl SnapshotBuilder {
    /// Creates a builder reading from the three mirrors.
    pub fn new(layers: Mirror<Layer>, runs: Mirror<Run>, repositories: Mirror<Repository>) -> Self {
        Self {
            layers,
            runs,
            repositories,
        }
    }

    /// Builds the summaries of all layers, sorted by namespace then name.
    pub fn build(&self) -> LayersResponse {
        let layers = self.layers.values();
        let runs = self.runs.to_map();
        let repositories = self.repositories.to_map();
        build_layers(&layers, &runs, &repositories)
    }

    /// Builds and serializes a snapshot.
    pub fn render(&self) -> Result<Payload, serde_json::Error> {
        let json = serde_json::to_string(&self.build())?;
        Ok(Arc::from(json))
    }
}
