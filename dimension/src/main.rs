//! Pocket Dimension Benchmark
//!
//! Drives the sandbox engine: provisions spaces, materializes them one per
//! tick, breaches and repairs a shell, then saves and reloads the registry.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dimension::sandbox::SandboxWorld;
use dimension::{DimensionConfig, OwnerId, PocketDimension, Realm, Location};

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Pocket dimension benchmark starting...");

    let save_dir = std::env::temp_dir().join(format!("pocketworld-bench-{}", std::process::id()));
    let config = match std::env::args().nth(1) {
        Some(path) => DimensionConfig::from_json_file(path)?,
        None => DimensionConfig::default(),
    };
    let host = Arc::new(SandboxWorld::new(Some(save_dir.clone())));
    let dimension = PocketDimension::new(config.clone(), host.clone())?;

    let owners: Vec<OwnerId> = (0..200).map(|_| OwnerId::random()).collect();
    let mut now = Utc::now();
    info!("Provisioning {} spaces...", owners.len());
    for (i, owner) in owners.iter().enumerate() {
        dimension.get_or_create(*owner, &format!("owner_{}", i), now)?;
    }

    now = now + config.materialize_delay();
    let start = std::time::Instant::now();
    let mut ticks = 0u32;
    loop {
        let report = dimension.tick(now);
        ticks += 1;
        if report.pending_materialize == 0 && report.materialized.is_none() {
            break;
        }
        if ticks > 100_000 {
            anyhow::bail!("materialization did not drain");
        }
        now = now + Duration::milliseconds(50);
    }
    let elapsed = start.elapsed();
    info!(
        "Materialized {} spaces in {} ticks: {:?} total, {:?} per tick, {} chunks stored",
        dimension.instances().iter().filter(|i| i.materialized).count(),
        ticks,
        elapsed,
        elapsed / ticks.max(1),
        host.stored_chunks()
    );

    // One occupant walks in, opens a door and waits for it to close
    let first = owners[0];
    host.spawn_occupant(first, Location::new(Realm::Home(0), 0.5, 64.0, 0.5));
    dimension.enter(first, "owner_0", now)?;
    if let Some(space) = dimension.instance(first) {
        let door = space.inner.min.offset(-1, 1, space.center.z - space.inner.min.z);
        dimension.open_breach(first, door, now)?;
        let report = dimension.tick(now + config.restore_delay());
        info!("Door closed again: {}", report.restored == Some(first));
    }
    dimension.exit(first, now)?;

    let stats = dimension.shutdown(now)?;
    info!("Saved {} spaces ({} bytes)", stats.instances, stats.file_bytes);

    let start = std::time::Instant::now();
    let reloaded = PocketDimension::new(config, Arc::new(SandboxWorld::new(Some(save_dir.clone()))))?;
    let report = reloaded.ensure_loaded(now)?;
    info!(
        "Reloaded {} spaces in {:?} (snapshot version {:?})",
        report.restored,
        start.elapsed(),
        report.from_version
    );

    std::fs::remove_dir_all(&save_dir)?;
    Ok(())
}
