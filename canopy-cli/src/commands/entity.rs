//! `canopy entity ...`: edit the store the way a host application would.
//!
//! Every edit is saved to the store file. When `export_on_save` is set the
//! edit is also handed to the [`EventBridge`], which exports the entity (or
//! archives its file) straight away.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use canopy_core::{Entity, EntityId, EntityKey, EntityStore, Link, SyncAction};
use canopy_sync::{AutoExportGate, EventBridge, StoreObserver};

use super::{print_actions, Engine, Workspace};

#[derive(Subcommand, Debug)]
pub enum EntityCommand {
    /// Create an entity.
    Add(AddArgs),

    /// Change an entity's name.
    Rename {
        key: EntityKey,
        name: String,
    },

    /// Move an entity under another container, or to the top level.
    Move {
        key: EntityKey,
        /// New parent container; omit for the top level.
        #[arg(long, value_name = "KEY")]
        parent: Option<EntityKey>,
    },

    /// Delete an entity from the store.
    Remove {
        key: EntityKey,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub name: String,

    /// Parent container.
    #[arg(long, value_name = "KEY")]
    pub parent: Option<EntityKey>,

    /// Create a container instead of an item.
    #[arg(long)]
    pub container: bool,

    /// Field value, repeatable.
    #[arg(long = "field", value_name = "NAME=VALUE", value_parser = parse_pair)]
    pub fields: Vec<(String, String)>,

    /// Reference to another entity by key, repeatable.
    #[arg(long = "ref", value_name = "NAME=KEY", value_parser = parse_reference)]
    pub references: Vec<(String, EntityKey)>,
}

pub fn run(ws: &Workspace, command: EntityCommand) -> Result<()> {
    let mut engine = ws.engine()?;

    let (entity, deleted) = match command {
        EntityCommand::Add(args) => (add(ws, &mut engine, args)?, false),
        EntityCommand::Rename { key, name } => {
            let mut entity = existing(&engine, &key)?;
            entity.name = name;
            (save(&mut engine, entity)?, false)
        }
        EntityCommand::Move { key, parent } => {
            let mut entity = existing(&engine, &key)?;
            entity.parent = match parent {
                Some(parent) => Some(container_id(&engine, &parent)?),
                None => None,
            };
            (save(&mut engine, entity)?, false)
        }
        EntityCommand::Remove { key } => {
            let entity = engine
                .store_mut()
                .delete(&key)
                .context("failed to delete from store")?
                .with_context(|| format!("no entity with key {key}"))?;
            (entity, true)
        }
    };

    let mut bridge = EventBridge::new(engine, AutoExportGate::new());
    let actions: Vec<SyncAction> = if !ws.settings.export_on_save {
        Vec::new()
    } else if deleted {
        bridge.on_deleted(std::slice::from_ref(&entity))
    } else {
        bridge.on_saved(std::slice::from_ref(&entity))
    };
    ws.save_store(bridge.engine().store())?;

    let verb = if deleted { "Removed" } else { "Saved" };
    println!("✓ {verb} '{}' {}", entity.name, entity.key);
    print_actions(&ws.root, &actions);
    Ok(())
}

fn add(ws: &Workspace, engine: &mut Engine, args: AddArgs) -> Result<Entity> {
    let mut entity = if args.container {
        Entity::container(args.name, ws.item_type.clone())
    } else {
        Entity::item(args.name, ws.item_type.clone())
    };
    if let Some(parent) = args.parent {
        entity.parent = Some(container_id(engine, &parent)?);
    }
    for (name, value) in args.fields {
        entity.fields.insert(name, value);
    }
    for (name, key) in args.references {
        let link = match engine
            .store()
            .get_by_key(&key)
            .context("failed to read store")?
        {
            Some(target) => Link::Resolved(target.id),
            None => Link::Pending(key),
        };
        entity.references.insert(name, link);
    }
    save(engine, entity)
}

fn save(engine: &mut Engine, entity: Entity) -> Result<Entity> {
    engine
        .store_mut()
        .save(entity)
        .context("failed to save entity")
}

fn existing(engine: &Engine, key: &EntityKey) -> Result<Entity> {
    engine
        .store()
        .get_by_key(key)
        .context("failed to read store")?
        .with_context(|| format!("no entity with key {key}"))
}

fn container_id(engine: &Engine, key: &EntityKey) -> Result<EntityId> {
    let parent = existing(engine, key)?;
    if !parent.is_container() {
        bail!("'{}' is not a container", parent.name);
    }
    Ok(parent.id)
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

fn parse_reference(raw: &str) -> Result<(String, EntityKey), String> {
    let (name, key) = parse_pair(raw)?;
    let key = key
        .parse::<EntityKey>()
        .map_err(|e| format!("invalid key '{key}': {e}"))?;
    Ok((name, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pair_splits_on_first_equals() {
        assert_eq!(
            parse_pair("editor=a=b").unwrap(),
            ("editor".to_string(), "a=b".to_string())
        );
        assert!(parse_pair("=value").is_err());
        assert!(parse_pair("novalue").is_err());
    }

    #[test]
    fn parse_reference_rejects_bad_keys() {
        let key = EntityKey::new();
        assert_eq!(
            parse_reference(&format!("source={key}")).unwrap(),
            ("source".to_string(), key)
        );
        assert!(parse_reference("source=not-a-key").is_err());
    }
}
