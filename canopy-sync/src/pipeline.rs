//! Shared bulk entrypoints used by the CLI.

use std::collections::HashSet;

use canopy_core::{EntityId, EntityStore, SyncAction};
use serde::Serialize;

use crate::codec::Codec;
use crate::engine::SyncEngine;
use crate::events::AutoExportGate;
use crate::file_store::FileRecord;
use crate::SyncError;

/// Scope for an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// Every entity of the engine's item type.
    All,
    /// One entity and its descendants.
    Under(EntityId),
}

/// Run the export pipeline for a scope.
pub fn export_run<S: EntityStore, C: Codec>(
    engine: &mut SyncEngine<S, C>,
    scope: SyncScope,
) -> Result<Vec<SyncAction>, SyncError> {
    match scope {
        SyncScope::All => engine.export_all(),
        SyncScope::Under(id) => engine.export_from(Some(id)),
    }
}

/// Everything an import run did, by phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub first_pass: Vec<SyncAction>,
    pub second_pass: Vec<SyncAction>,
    pub deletes: Vec<SyncAction>,
    pub pruned: Vec<std::path::PathBuf>,
}

impl ImportReport {
    /// All actions, first pass through deletes.
    pub fn actions(&self) -> impl Iterator<Item = &SyncAction> {
        self.first_pass
            .iter()
            .chain(&self.second_pass)
            .chain(&self.deletes)
    }
}

/// Import the whole category tree.
///
/// Auto-export is suppressed for the entire run. Files are applied
/// parents-first, then a second pass binds forward references, tracked deletes
/// are replayed and empty containers pruned.
pub fn import_run<S: EntityStore, C: Codec>(
    engine: &mut SyncEngine<S, C>,
    gate: &AutoExportGate,
    force: bool,
) -> Result<ImportReport, SyncError> {
    let _guard = gate.suppress();
    let cancel = engine.cancel_token();

    let mut records = engine.files().scan(engine.category())?;
    order_parents_first(&mut records);
    tracing::info!(category = %engine.category(), files = records.len(), force, "import started");

    let mut report = ImportReport::default();
    for record in &records {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                completed: report.first_pass.len(),
            });
        }
        report
            .first_pass
            .push(engine.import_file(&record.path, force).into_action());
    }

    report.second_pass = engine.process_post_import(&report.first_pass);

    let on_disk: HashSet<_> = records.iter().map(|r| r.key).collect();
    let item_type = engine.codec().item_type().clone();
    let tracked: Vec<_> = engine
        .tracker()
        .pending_deletes(&item_type)
        .into_iter()
        .map(|a| a.key)
        .collect();
    for key in tracked {
        if on_disk.contains(&key) {
            // Re-created since the delete was recorded.
            engine.tracker_mut().remove_actions(&key)?;
            continue;
        }
        if engine.store().get_by_key(&key)?.is_some() {
            report.deletes.push(engine.delete_item(&key));
        }
    }

    report.pruned = engine.clean_empty_containers(None)?;
    tracing::info!(
        category = %engine.category(),
        first_pass = report.first_pass.len(),
        second_pass = report.second_pass.len(),
        deletes = report.deletes.len(),
        "import finished",
    );
    Ok(report)
}

/// Report every file of the category without touching the store.
pub fn report_run<S: EntityStore, C: Codec>(
    engine: &SyncEngine<S, C>,
) -> Result<Vec<SyncAction>, SyncError> {
    let mut records = engine.files().scan(engine.category())?;
    order_parents_first(&mut records);
    Ok(records.iter().map(|r| engine.report(&r.path)).collect())
}

/// Shallow paths first, then lexical, so containers precede their contents.
fn order_parents_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        a.path
            .components()
            .count()
            .cmp(&b.path.components().count())
            .then_with(|| a.path.cmp(&b.path))
    });
}
