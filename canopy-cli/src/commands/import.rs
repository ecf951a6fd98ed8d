//! `canopy import [--force]`: apply the file tree to the store.

use anyhow::{Context, Result};
use clap::Args;

use canopy_core::FailureKind;
use canopy_sync::{import_run, AutoExportGate, SyncTally};

use super::{print_actions, print_tally, Workspace};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Overwrite store entities that differ from their files.
    #[arg(long)]
    pub force: bool,
}

impl ImportArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let mut engine = ws.engine()?;
        let gate = AutoExportGate::new();

        let report = import_run(&mut engine, &gate, self.force).context("import failed")?;
        ws.save_store(engine.store())?;

        let actions: Vec<_> = report.actions().cloned().collect();
        print_actions(&ws.root, &actions);
        for pruned in &report.pruned {
            let shown = pruned.strip_prefix(&ws.root).unwrap_or(pruned);
            println!("  ⌫  {} (pruned)", shown.display());
        }
        let counted: Vec<_> = report
            .first_pass
            .iter()
            .chain(&report.deletes)
            .cloned()
            .collect();
        print_tally("import", &SyncTally::from_actions(&counted));

        let skipped = report
            .first_pass
            .iter()
            .filter(|a| a.failure == Some(FailureKind::ConflictNotForced))
            .count();
        if skipped > 0 {
            println!("  {skipped} update(s) skipped; rerun with --force to apply them");
        }
        Ok(())
    }
}
