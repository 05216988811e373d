//! Repository resource: auto-apply policy and sync windows shared by layers.

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use super::layer::Layer;
use super::run::Action;
use super::Resource;

/// What to do when runs fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnErrorStrategy {
    /// Consecutive failures of one action allowed before manual
    /// intervention is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Remediation policy. Set on a repository as the default for its layers and
/// on a layer as an override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply: Option<bool>,

    #[serde(default)]
    pub on_error: OnErrorStrategy,
}

/// Whether a sync window allows or denies actions while it is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Allow,
    Deny,
}

/// A recurring time window gating when actions may run.
///
/// The window is open on each of `days` (every day when empty) from
/// `start` to `end`, both `HH:MM` in UTC. When `end` is not after `start`
/// the window runs past midnight into the next day; `start == end` spans a
/// full 24 hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWindow {
    pub kind: WindowKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<Weekday>,

    pub start: String,

    pub end: String,

    /// Glob patterns matched against layer names. Empty matches every layer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<String>,

    /// Actions gated by this window. Empty gates both.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

/// Repository specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub remediation_strategy: RemediationStrategy,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_windows: Vec<SyncWindow>,
}

/// Type alias for Repository resource.
pub type Repository = Resource<RepositorySpec>;

/// Effective auto-apply policy: the layer override, else the repository
/// default, else disabled.
pub fn auto_apply_enabled(repository: &Repository, layer: &Layer) -> bool {
    layer
        .spec
        .remediation_strategy
        .auto_apply
        .or(repository.spec.remediation_strategy.auto_apply)
        .unwrap_or(false)
}

/// Effective retry budget: the layer override, else the repository default,
/// else `default`.
pub fn max_retries(repository: &Repository, layer: &Layer, default: u32) -> u32 {
    layer
        .spec
        .remediation_strategy
        .on_error
        .max_retries
        .or(repository.spec.remediation_strategy.on_error.max_retries)
        .unwrap_or(default)
}
