//! `canopy report`: what an import would change, store untouched.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use canopy_core::{ChangeType, SyncAction};
use canopy_sync::{report_run, SyncTally};

use super::{print_tally, Workspace};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Print the unified diff for each changed entity.
    #[arg(long, conflicts_with = "json")]
    pub diff: bool,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "details")]
    details: String,
}

impl ReportArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let engine = ws.engine()?;
        let actions = report_run(&engine).context("report failed")?;

        if self.json {
            let json = serde_json::to_string_pretty(&actions)
                .context("failed to serialize report as JSON")?;
            println!("{json}");
            return Ok(());
        }

        if actions.is_empty() {
            let dir = engine.files().category_dir(engine.category());
            println!("No files under '{}'.", dir.display());
            return Ok(());
        }

        let rows: Vec<ReportRow> = actions.iter().map(|a| row(ws, a)).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));

        if self.diff {
            for diff in actions.iter().filter_map(|a| a.diff.as_deref()) {
                println!();
                print!("{diff}");
            }
        }
        print_tally("report", &SyncTally::from_actions(&actions));
        Ok(())
    }
}

fn row(ws: &Workspace, action: &SyncAction) -> ReportRow {
    let file = action
        .file_path
        .as_deref()
        .map(|p| p.strip_prefix(&ws.root).unwrap_or(p).display().to_string())
        .unwrap_or_else(|| action.name.clone());

    let change = if !action.success {
        "fail".red().to_string()
    } else {
        match action.change {
            ChangeType::Create => "create".green().to_string(),
            ChangeType::Update => "update".yellow().to_string(),
            ChangeType::Delete => "delete".red().to_string(),
            ChangeType::NoChange => "-".dimmed().to_string(),
            ChangeType::Fail => "fail".red().to_string(),
        }
    };

    let details = if action.details.is_empty() {
        action.message.clone().unwrap_or_default()
    } else {
        action
            .details
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    };

    ReportRow {
        file,
        change,
        details,
    }
}
