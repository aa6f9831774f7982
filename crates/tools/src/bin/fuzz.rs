use anyhow::{Result, bail};
use clap::Parser;
use rand_chacha::{
    ChaCha8Rng,
    rand_core::{Rng, SeedableRng},
};
use simstate::{
    ComponentManager, EntityId, ObjectRef, ParamNode, Position, ScriptValue, Scripted, SimContext,
    StateSnapshot, stock_registry,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
    #[arg(short, long, default_value_t = 200)]
    iterations: u32,
    #[arg(long, default_value_t = 32)]
    max_entities: u32,
}

fn choose<T: Clone>(rng: &mut ChaCha8Rng, slice: &[T]) -> T {
    let p = rng.next_u64() as usize % slice.len();
    slice[p].clone()
}

fn random_value(rng: &mut ChaCha8Rng, depth: u32, shared: &mut Vec<ObjectRef>) -> ScriptValue {
    let roll = rng.next_u64() % if depth == 0 { 6 } else { 9 };
    match roll {
        0 => ScriptValue::Void,
        1 => ScriptValue::Null,
        2 => ScriptValue::Bool(rng.next_u64() % 2 == 1),
        3 => ScriptValue::number(f64::from(rng.next_u64() as i32)),
        4 => ScriptValue::Double(f64::from_bits(rng.next_u64())),
        5 => ScriptValue::string(&choose(rng, &["", "east", "Ω", "line\nbreak", "🦀"])),
        6 | 7 => {
            let object = if roll == 6 { ObjectRef::new_object() } else { ObjectRef::new_array() };
            shared.push(object.clone());
            for index in 0..rng.next_u64() % 5 {
                let value = random_value(rng, depth - 1, shared);
                if object.is_array() {
                    object.push(value);
                } else {
                    object.set(format!("k{index}"), value);
                }
            }
            ScriptValue::Object(object)
        }
        // Re-use an earlier object to exercise backrefs and cycles.
        _ if shared.is_empty() => ScriptValue::Null,
        _ => ScriptValue::Object(choose(rng, shared)),
    }
}

fn random_world(rng: &mut ChaCha8Rng, max_entities: u32) -> Result<ComponentManager> {
    let mut manager = ComponentManager::new(SimContext::default(), stock_registry()?);
    let (Some(position), Some(scripted)) =
        (manager.lookup_type_id("Position"), manager.lookup_type_id("Scripted"))
    else {
        bail!("stock component types are missing");
    };

    let mut shared = Vec::new();
    for _ in 0..rng.next_u64() % u64::from(max_entities.max(1)) {
        let entity = EntityId(2 + (rng.next_u64() % 4096) as u32);
        if manager.entity_components(entity).is_empty() && rng.next_u64() % 2 == 0 {
            manager.add_component(entity, position, &ParamNode::new())?;
            if let Some(pos) = manager.query_mut::<Position>(entity, position) {
                pos.move_to(f64::from_bits(rng.next_u64()), (rng.next_u64() % 1000) as f64);
            }
        }
        if !manager.has_component(entity, scripted) {
            manager.add_component(entity, scripted, &ParamNode::new())?;
            let state = random_value(rng, 3, &mut shared);
            if let Some(component) = manager.query_mut::<Scripted>(entity, scripted) {
                component.set_state(state);
            }
        }
    }
    Ok(manager)
}

fn main() -> Result<()> {
    let env = env_logger::Env::default().default_filter_or("warn,simstate::manager=off");
    env_logger::Builder::from_env(env).init();
    let args = Args::parse();

    println!("Starting state fuzz on seed {} for {} iterations...", args.seed, args.iterations);
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut total_bytes = 0usize;

    for iteration in 0..args.iterations {
        let world = random_world(&mut rng, args.max_entities)?;
        let snapshot = StateSnapshot::capture(&world)?;
        total_bytes += snapshot.bytes.len();

        let mut restored = ComponentManager::new(SimContext::default(), stock_registry()?);
        snapshot.restore(&mut restored)?;

        let mut again = Vec::new();
        restored.serialize_state(&mut again)?;
        if again != snapshot.bytes {
            bail!("iteration {iteration}: re-serialized bytes differ");
        }
        if world.context().script().rooted_count() != 0 {
            bail!("iteration {iteration}: script roots leaked");
        }

        // A strict prefix must be rejected without leaving components behind.
        let cut = rng.next_u64() as usize % snapshot.bytes.len();
        if restored.deserialize_state(&snapshot.bytes[..cut]).is_ok() {
            bail!("iteration {iteration}: truncated state at {cut} was accepted");
        }
        if restored.component_count() != 0 {
            bail!("iteration {iteration}: failed load left components behind");
        }
    }

    println!("Fuzz complete: {} iterations, {} bytes checked", args.iterations, total_bytes);
    Ok(())
}
