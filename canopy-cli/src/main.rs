//! Canopy: mirror a hierarchical entity store to a tree of YAML files.
//!
//! # Usage
//!
//! ```text
//! canopy [--root DIR] [--store FILE] [--type TYPE] init [--folder NAME]
//! canopy export [--under KEY]
//! canopy import [--force]
//! canopy report [--json] [--diff]
//! canopy delete <KEY>
//! canopy clean
//! canopy entity add <NAME> [--parent KEY] [--container] [--field k=v]... [--ref k=KEY]...
//! canopy entity rename <KEY> <NAME>
//! canopy entity move <KEY> [--parent KEY]
//! canopy entity remove <KEY>
//! canopy status [--json]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    delete::DeleteArgs, entity::EntityCommand, export::ExportArgs, import::ImportArgs,
    init::InitArgs, report::ReportArgs, status::StatusArgs, Workspace,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "canopy",
    version,
    about = "Keep a hierarchical entity store and a tree of YAML files in sync",
    long_about = None,
)]
struct Cli {
    /// Sync root holding canopy.yaml and the category folders.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Store file (defaults to <root>/.canopy-store.yaml).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Item type handled by this invocation.
    #[arg(long = "type", global = true, default_value = "data-type", value_name = "TYPE")]
    item_type: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write canopy.yaml and an empty store under the sync root.
    Init(InitArgs),

    /// Write every entity of the item type to disk.
    Export(ExportArgs),

    /// Apply the file tree to the store.
    Import(ImportArgs),

    /// Show what an import would change, without changing anything.
    Report(ReportArgs),

    /// Delete an entity by key and archive its file.
    Delete(DeleteArgs),

    /// Prune folders of containers with no children.
    Clean,

    /// Edit the store directly; changes are exported when export_on_save is set.
    Entity {
        #[command(subcommand)]
        command: EntityCommand,
    },

    /// Summarise store, files and pending tracked actions.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let ws = Workspace::open(&cli.root, cli.store.as_deref(), &cli.item_type)?;
    match cli.command {
        Commands::Init(args) => args.run(ws),
        Commands::Export(args) => args.run(&ws),
        Commands::Import(args) => args.run(&ws),
        Commands::Report(args) => args.run(&ws),
        Commands::Delete(args) => args.run(&ws),
        Commands::Clean => commands::clean::run(&ws),
        Commands::Entity { command } => commands::entity::run(&ws, command),
        Commands::Status(args) => args.run(&ws),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
