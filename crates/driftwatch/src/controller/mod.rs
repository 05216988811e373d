//! Reconciliation of layers: facts, decision, actions and the loop that
//! drives them.

pub mod conditions;
pub mod engine;
pub mod reconciler;
pub mod run_factory;
pub mod runs;
pub mod scheduler;
pub mod states;
pub mod sync_window;

pub use conditions::{ConditionEvaluator, Conditions, Evaluation, LayerContext, RetryInfo};
pub use engine::{decide, Decision, Signal};
pub use reconciler::{Clock, Reconciler};
pub use run_factory::build_run;
pub use runs::{report_run_result, RunReport, RunReportError};
pub use scheduler::Controller;
pub use states::{ActContext, Outcome, State};
pub use sync_window::{is_sync_blocked, BlockReason};
