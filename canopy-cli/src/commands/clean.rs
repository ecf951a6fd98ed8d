//! `canopy clean`: prune folders left behind by emptied containers.

use anyhow::{Context, Result};

use super::Workspace;

pub fn run(ws: &Workspace) -> Result<()> {
    let mut engine = ws.engine()?;
    let pruned = engine
        .clean_empty_containers(None)
        .context("failed to clean empty containers")?;

    if pruned.is_empty() {
        println!("✓ Nothing to clean");
        return Ok(());
    }
    for path in &pruned {
        let shown = path.strip_prefix(&ws.root).unwrap_or(path);
        println!("  ⌫  {}", shown.display());
    }
    println!("✓ Cleaned {} folder(s)", pruned.len());
    Ok(())
}
