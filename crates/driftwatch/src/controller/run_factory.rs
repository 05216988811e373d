//! Construction of new runs.

use uuid::Uuid;

use crate::annotations::LAYER_LABEL;
use crate::resource::{
    Action, Layer, OwnerReference, ResourceKind, ResourceRef, Run, RunSpec, RunState,
};

const SUFFIX_LEN: usize = 5;

/// Builds a pending run of `action` at `revision` for `layer`. The caller
/// persists it.
pub fn build_run(layer: &Layer, revision: &str, action: Action) -> Run {
    let mut run = Run::new(
        ResourceKind::Run,
        layer.namespace(),
        run_name(layer.name(), action),
        RunSpec {
            action,
            layer: ResourceRef::new(layer.namespace(), layer.name()),
            revision: revision.to_string(),
        },
    );
    run.metadata
        .labels
        .insert(LAYER_LABEL.to_string(), layer.name().to_string());
    run.metadata.owner_references.push(OwnerReference {
        kind: ResourceKind::Layer.to_string(),
        name: layer.name().to_string(),
        uid: layer.metadata.uid.clone(),
    });
    run.status.state = RunState::Pending;
    run
}

fn run_name(layer_name: &str, action: Action) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", layer_name, action, &id[..SUFFIX_LEN])
}
