//! `canopy status`: how the store and the file tree line up.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use canopy_core::{ChangeType, Entity};
use canopy_sync::TrackedKind;

use super::{Engine, Workspace};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum EntityState {
    Synced,
    Modified,
    NotExported,
    OnlyOnDisk,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct EntityStatus {
    name: String,
    key: String,
    kind: String,
    state: EntityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    /// Reference targets not yet in the store.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pending_references: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct PendingAction {
    action: TrackedKind,
    name: String,
    key: String,
    at: DateTime<Utc>,
    age: String,
}

#[derive(Debug, Clone, Serialize)]
struct StatusReport {
    item_type: String,
    category: String,
    entities: Vec<EntityStatus>,
    pending: Vec<PendingAction>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "file")]
    file: String,
}

impl StatusArgs {
    pub fn run(self, ws: &Workspace) -> Result<()> {
        let engine = ws.engine()?;
        let report = build_report(ws, &engine)?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(&report);
        Ok(())
    }
}

fn build_report(ws: &Workspace, engine: &Engine) -> Result<StatusReport> {
    let relative = |p: &Path| {
        p.strip_prefix(&ws.root)
            .unwrap_or(p)
            .display()
            .to_string()
    };

    let mut entities: Vec<&Entity> = engine
        .store()
        .iter()
        .filter(|e| e.item_type == ws.item_type)
        .collect();
    entities.sort_by(|a, b| a.name.cmp(&b.name));

    let mut rows = Vec::new();
    let mut known = HashSet::new();
    for entity in entities {
        known.insert(entity.key);
        let (state, file) = match engine.file_path_for(entity) {
            Err(err) => {
                tracing::warn!(key = %entity.key, error = %err, "cannot resolve file path");
                (EntityState::Error, None)
            }
            Ok(path) if !path.is_file() => (EntityState::NotExported, None),
            Ok(path) => {
                let action = engine.report(&path);
                let state = match (action.success, action.change) {
                    (true, ChangeType::NoChange) => EntityState::Synced,
                    (true, _) => EntityState::Modified,
                    (false, _) => EntityState::Error,
                };
                (state, Some(relative(&path)))
            }
        };
        rows.push(EntityStatus {
            name: entity.name.clone(),
            key: entity.key.to_string(),
            kind: entity.kind.to_string(),
            state,
            file,
            pending_references: entity
                .pending_references()
                .iter()
                .map(ToString::to_string)
                .collect(),
        });
    }

    let records = engine
        .files()
        .scan(engine.category())
        .context("failed to scan category folder")?;
    for record in records.into_iter().filter(|r| !known.contains(&r.key)) {
        let name = record
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        rows.push(EntityStatus {
            name,
            key: record.key.to_string(),
            kind: "-".to_string(),
            state: EntityState::OnlyOnDisk,
            file: Some(relative(&record.path)),
            pending_references: Vec::new(),
        });
    }

    let now = Utc::now();
    let pending = engine
        .tracker()
        .actions()
        .iter()
        .filter(|a| a.item_type == ws.item_type)
        .map(|a| PendingAction {
            action: a.action,
            name: a.name.clone(),
            key: a.key.to_string(),
            at: a.at,
            age: format_age(now, a.at),
        })
        .collect();

    Ok(StatusReport {
        item_type: ws.item_type.to_string(),
        category: engine.category().to_string(),
        entities: rows,
        pending,
    })
}

fn print_table(report: &StatusReport) {
    let count = |state: EntityState| report.entities.iter().filter(|e| e.state == state).count();
    println!(
        "Canopy v{} | {} → {}/ | {} synced | {} modified | {} not exported | {} only on disk",
        env!("CARGO_PKG_VERSION"),
        report.item_type,
        report.category,
        count(EntityState::Synced),
        count(EntityState::Modified),
        count(EntityState::NotExported),
        count(EntityState::OnlyOnDisk),
    );

    if report.entities.is_empty() {
        println!("No entities or files for '{}'.", report.item_type);
    } else {
        let rows: Vec<StatusTableRow> = report
            .entities
            .iter()
            .map(|e| StatusTableRow {
                name: e.name.clone(),
                kind: e.kind.clone(),
                state: match e.pending_references.len() {
                    0 => state_label(e.state),
                    n => format!("{} ({n} pending ref)", state_label(e.state)),
                },
                file: e.file.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if !report.pending.is_empty() {
        println!("{}", "Tracked actions".bold());
        for action in &report.pending {
            let label = match action.action {
                TrackedKind::Delete => "delete",
                TrackedKind::Rename => "rename",
            };
            println!("  {label:<7} {} ({}, {})", action.name, action.key, action.age);
        }
    }
}

fn state_label(state: EntityState) -> String {
    match state {
        EntityState::Synced => format!("{} synced", "●".green()),
        EntityState::Modified => format!("{} modified", "●".yellow()),
        EntityState::NotExported => format!("{} not exported", "○".bright_black()),
        EntityState::OnlyOnDisk => format!("{} only on disk", "●".cyan()),
        EntityState::Error => format!("{} error", "●".red()),
    }
}

/// "just now", "5m ago", "3h ago", "2d ago".
fn format_age(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn format_age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "just now");
        assert_eq!(format_age(now, now - Duration::minutes(5)), "5m ago");
        assert_eq!(format_age(now, now - Duration::hours(3)), "3h ago");
        assert_eq!(format_age(now, now - Duration::days(2)), "2d ago");
        assert_eq!(format_age(now, now + Duration::minutes(1)), "just now");
    }
}
