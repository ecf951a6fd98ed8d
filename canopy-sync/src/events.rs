//! Reactive side: store notifications → engine.
//!
//! The host store calls a [`StoreObserver`] after it saves or deletes
//! entities. [`EventBridge`] turns those calls into exports and retirements
//! unless auto-export is suppressed through its [`AutoExportGate`], which bulk
//! imports hold for their whole run so their own store writes are not
//! exported back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use canopy_core::{Entity, EntityStore, SyncAction};

use crate::codec::Codec;
use crate::engine::SyncEngine;

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Shared switch that suppresses reactive exports while any guard is alive.
#[derive(Debug, Clone, Default)]
pub struct AutoExportGate {
    suppressed: Arc<AtomicUsize>,
}

impl AutoExportGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress auto-export until the returned guard is dropped. Guards nest.
    pub fn suppress(&self) -> SuppressGuard {
        self.suppressed.fetch_add(1, Ordering::SeqCst);
        SuppressGuard {
            suppressed: Arc::clone(&self.suppressed),
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst) > 0
    }

    /// Run `f` with auto-export suppressed.
    pub fn with_suppressed<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.suppress();
        f()
    }
}

/// Releases one level of suppression on drop, including during unwinding.
#[derive(Debug)]
#[must_use = "auto-export resumes as soon as the guard is dropped"]
pub struct SuppressGuard {
    suppressed: Arc<AtomicUsize>,
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.suppressed.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Notification interface the host store drives.
pub trait StoreObserver {
    fn on_saved(&mut self, entities: &[Entity]) -> Vec<SyncAction>;
    fn on_deleted(&mut self, entities: &[Entity]) -> Vec<SyncAction>;
}

/// Observer that exports saved entities and retires deleted ones.
pub struct EventBridge<S: EntityStore, C: Codec> {
    engine: SyncEngine<S, C>,
    gate: AutoExportGate,
}

impl<S: EntityStore, C: Codec> EventBridge<S, C> {
    pub fn new(engine: SyncEngine<S, C>, gate: AutoExportGate) -> Self {
        Self { engine, gate }
    }

    pub fn gate(&self) -> &AutoExportGate {
        &self.gate
    }

    pub fn engine(&self) -> &SyncEngine<S, C> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SyncEngine<S, C> {
        &mut self.engine
    }

    pub fn into_inner(self) -> SyncEngine<S, C> {
        self.engine
    }
}

impl<S: EntityStore, C: Codec> StoreObserver for EventBridge<S, C> {
    fn on_saved(&mut self, entities: &[Entity]) -> Vec<SyncAction> {
        if self.gate.is_suppressed() {
            tracing::debug!(count = entities.len(), "auto-export suppressed; save ignored");
            return Vec::new();
        }

        let item_type = self.engine.codec().item_type().clone();
        let mut actions = Vec::new();
        for entity in entities.iter().filter(|e| e.item_type == item_type) {
            tracing::info!(name = %entity.name, "save: exporting");
            let action = self.engine.export_one(entity);
            if action.success {
                if let Some(path) = &action.file_path {
                    if let Err(err) = self.engine.manage_orphans(&entity.key, path) {
                        tracing::warn!(key = %entity.key, error = %err, "orphan cleanup failed");
                    }
                }
            }
            actions.push(action);
        }
        actions
    }

    fn on_deleted(&mut self, entities: &[Entity]) -> Vec<SyncAction> {
        if self.gate.is_suppressed() {
            tracing::debug!(count = entities.len(), "auto-export suppressed; delete ignored");
            return Vec::new();
        }

        let item_type = self.engine.codec().item_type().clone();
        let mut actions = Vec::new();
        for entity in entities.iter().filter(|e| e.item_type == item_type) {
            tracing::info!(name = %entity.name, "delete: retiring file");
            actions.push(self.engine.retire(entity));
        }
        actions
    }
}
