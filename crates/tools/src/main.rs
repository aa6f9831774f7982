use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use simstate::{
    ComponentManager, EntityId, ParamNode, SYSTEM_ENTITY, SaveFile, ScriptContext, SimContext,
    TemplateCatalog, stock_registry,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Template catalog JSON used to rebuild template-derived state
    #[arg(short, long, global = true)]
    templates: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a state from an entity list and write it as a save file
    New {
        /// JSON list of `{ "id": <entity>, "template": <name> }`
        #[arg(short, long)]
        entities: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long, default_value = "dev")]
        build_id: String,
    },
    /// Print the human-readable dump of a save
    Dump { save: PathBuf },
    /// Print the state hash of a save
    Hash { save: PathBuf },
    /// Check that a save re-serializes to identical bytes
    Verify { save: PathBuf },
}

#[derive(Deserialize)]
struct EntitySpec {
    id: u32,
    template: String,
}

fn load_catalog(path: Option<&Path>) -> Result<TemplateCatalog> {
    let Some(path) = path else {
        return Ok(TemplateCatalog::new());
    };
    TemplateCatalog::load(path)
        .with_context(|| format!("Failed to load template catalog: {}", path.display()))
}

fn new_manager(catalog: TemplateCatalog) -> Result<ComponentManager> {
    let registry = stock_registry().context("Failed to register component types")?;
    Ok(ComponentManager::new(SimContext::new(ScriptContext::new(), catalog), registry))
}

fn build_state(catalog: TemplateCatalog, entities: &[EntitySpec]) -> Result<ComponentManager> {
    let mut manager = new_manager(catalog)?;
    let template_manager = manager
        .lookup_type_id("TemplateManager")
        .context("TemplateManager component type is not registered")?;
    manager.add_component(SYSTEM_ENTITY, template_manager, &ParamNode::new())?;

    for spec in entities {
        if spec.id <= SYSTEM_ENTITY.0 {
            bail!("entity id {} is reserved", spec.id);
        }
        manager
            .add_entity(&spec.template, EntityId(spec.id))
            .with_context(|| format!("Failed to add entity {} ({})", spec.id, spec.template))?;
    }
    Ok(manager)
}

fn load_state(catalog: TemplateCatalog, save: &Path) -> Result<(SaveFile, ComponentManager)> {
    let save_file = SaveFile::load(save)
        .with_context(|| format!("Failed to load save file: {}", save.display()))?;
    let mut manager = new_manager(catalog)?;
    save_file.restore_into(&mut manager).context("Failed to restore simulation state")?;
    log::info!(
        "loaded {} components from {} (build {})",
        manager.component_count(),
        save.display(),
        save_file.header.build_id
    );
    Ok((save_file, manager))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let catalog = load_catalog(args.templates.as_deref())?;

    match args.command {
        Command::New { entities, out, build_id } => {
            let data = fs::read_to_string(&entities)
                .with_context(|| format!("Failed to read entity list: {}", entities.display()))?;
            let specs: Vec<EntitySpec> =
                serde_json::from_str(&data).context("Failed to deserialize entity list JSON")?;
            let manager = build_state(catalog, &specs)?;
            let save = SaveFile::capture(&manager, &build_id)?;
            save.write_atomic(&out)
                .with_context(|| format!("Failed to write save file: {}", out.display()))?;
            println!("Wrote {} entities to {}", specs.len(), out.display());
            println!("State Hash: {}", manager.compute_state_hash()?);
        }
        Command::Dump { save } => {
            let (_, manager) = load_state(catalog, &save)?;
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            manager.dump_debug_state(&mut lock)?;
            lock.flush()?;
        }
        Command::Hash { save } => {
            let (_, manager) = load_state(catalog, &save)?;
            println!("{}", manager.compute_state_hash()?);
        }
        Command::Verify { save } => {
            let (save_file, manager) = load_state(catalog, &save)?;
            let mut bytes = Vec::new();
            manager.serialize_state(&mut bytes)?;
            if bytes != save_file.payload {
                bail!(
                    "re-serialized state differs: {} bytes stored, {} bytes produced",
                    save_file.payload.len(),
                    bytes.len()
                );
            }
            println!("Verified {} ({} bytes)", save.display(), bytes.len());
            println!("State Hash: {}", manager.compute_state_hash()?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CATALOG: &str = r#"{
        "unit": { "params": { "Position": { "altitude": 1 }, "Scripted": { "hp": 50 } } },
        "unit/scout": { "parent": "unit", "params": { "Position": { "x": 3, "z": 4 } } }
    }"#;

    fn specs() -> Vec<EntitySpec> {
        vec![
            EntitySpec { id: 2, template: "unit/scout".to_string() },
            EntitySpec { id: 3, template: "unit".to_string() },
        ]
    }

    #[test]
    fn build_save_and_verify_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.sav");
        let catalog = TemplateCatalog::from_json_str(CATALOG).unwrap();

        let manager = build_state(catalog.clone(), &specs()).unwrap();
        assert_eq!(manager.component_count(), 5);
        SaveFile::capture(&manager, "test").unwrap().write_atomic(&path).unwrap();

        let (save_file, restored) = load_state(catalog, &path).unwrap();
        let mut bytes = Vec::new();
        restored.serialize_state(&mut bytes).unwrap();
        assert_eq!(bytes, save_file.payload);
        assert_eq!(restored.compute_state_hash().unwrap(), manager.compute_state_hash().unwrap());
    }

    #[test]
    fn reserved_entity_ids_are_rejected() {
        let catalog = TemplateCatalog::from_json_str(CATALOG).unwrap();
        let specs = vec![EntitySpec { id: 1, template: "unit".to_string() }];
        assert!(build_state(catalog, &specs).is_err());
    }

    #[test]
    fn missing_templates_are_reported() {
        let specs = vec![EntitySpec { id: 5, template: "ghost".to_string() }];
        let err = build_state(TemplateCatalog::new(), &specs).err().unwrap();
        assert!(format!("{err:#}").contains("template 'ghost' does not exist"));
    }
}
