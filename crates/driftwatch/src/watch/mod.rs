//! Live notification pipeline feeding the layers event stream.

pub mod debounce;
pub mod manager;
pub mod snapshot;
pub mod watcher;

pub use debounce::{DebounceScheduler, DEFAULT_DEBOUNCE};
pub use manager::WatchManager;
pub use snapshot::{LayerSummary, LayersResponse, RunSummary, SnapshotBuilder};
pub use watcher::{ChangeNotice, ChangeType, Mirror, ResourceWatcher};
