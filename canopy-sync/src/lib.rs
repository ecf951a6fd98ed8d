//! # canopy-sync
//!
//! Reconciles a hierarchical entity store with a mirrored tree of YAML files.
//!
//! Build a [`SyncEngine`] over an [`canopy_core::EntityStore`] and a [`Codec`]
//! for one item type, then drive it directly (`export_all`, `import_file`,
//! `report`, `delete_item`) or through the bulk entrypoints in [`pipeline`].
//! Wrap it in an [`EventBridge`] to export on store notifications.

pub mod codec;
pub mod diff;
pub mod engine;
pub mod error;
pub mod events;
pub mod file_store;
pub mod path;
pub mod pipeline;
pub mod tracker;

pub use codec::{Codec, RecordCodec, SerializedNode, UPDATE_SKIPPED};
pub use engine::{CancelToken, SyncEngine};
pub use error::SyncError;
pub use events::{AutoExportGate, EventBridge, StoreObserver, SuppressGuard};
pub use file_store::{FileRecord, FileStore, WriteResult};
pub use path::{safe_name, PathResolver};
pub use pipeline::{export_run, import_run, report_run, ImportReport, SyncScope};
pub use tracker::{ChangeTracker, SyncTally, TrackedAction, TrackedKind, TRACKER_FILE};
