//! Annotation keys and the helpers that set and clear them.
//!
//! Keys are part of the compatibility surface shared with the webhook
//! receiver and the runner, so they must not change.

use std::collections::HashMap;

use crate::resource::Layer;
use crate::store::{modify_layer, ResourceStore, Result};

/// Latest commit that touched the layer path, set by the webhook receiver.
pub const LAST_RELEVANT_COMMIT: &str = "webhook.driftwatch.io/relevant-commit";

/// Checksum of the last plan. Empty when the last plan failed.
pub const LAST_PLAN_SUM: &str = "runner.driftwatch.io/plan-sum";
pub const LAST_PLAN_DATE: &str = "runner.driftwatch.io/plan-date";
pub const LAST_PLAN_COMMIT: &str = "runner.driftwatch.io/plan-commit";

/// Checksum of the plan that was last applied.
pub const LAST_APPLY_SUM: &str = "runner.driftwatch.io/apply-sum";
pub const LAST_APPLY_DATE: &str = "runner.driftwatch.io/apply-date";
pub const LAST_APPLY_COMMIT: &str = "runner.driftwatch.io/apply-commit";

/// Single-shot request for a plan. Removed when the controller acts on it.
pub const SYNC_NOW: &str = "api.driftwatch.io/sync-now";

/// Single-shot request for an apply. Removed when the controller acts on it.
pub const APPLY_NOW: &str = "api.driftwatch.io/apply-now";

/// Label linking a run to its layer.
pub const LAYER_LABEL: &str = "driftwatch.io/layer";

/// Sets `values` on the layer annotations.
pub async fn add(
    store: &dyn ResourceStore,
    layer: &Layer,
    values: HashMap<String, String>,
) -> Result<Layer> {
    modify_layer(store, layer.namespace(), layer.name(), |current| {
        current
            .metadata
            .annotations
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
    })
    .await
}

/// Removes `key` from the layer annotations. Removing a missing key is not
/// an error.
pub async fn remove(store: &dyn ResourceStore, layer: &Layer, key: &str) -> Result<Layer> {
    modify_layer(store, layer.namespace(), layer.name(), |current| {
        current.metadata.annotations.remove(key);
    })
    .await
}
