pub mod annotations;
pub mod broadcast;
pub mod config;
pub mod controller;
pub mod error;
pub mod plans;
pub mod resource;
pub mod store;
pub mod telemetry;
pub mod watch;

pub use broadcast::{EventRecorder, SubscriberRegistry, Subscription};
pub use config::{load_config, Config};
pub use controller::{report_run_result, Controller, Reconciler, RunReport};
pub use error::{ConfigError, DriftwatchError, Result, WatchError};
pub use plans::{FsPlanStore, PlanFormat, PlanKey, PlanStore};
pub use resource::{Layer, Repository, Run};
pub use store::{InMemoryStore, ManifestLoader, ResourceStore};
pub use telemetry::{init_logging, LogFormat};
pub use watch::WatchManager;
