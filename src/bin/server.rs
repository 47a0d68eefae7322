//! realm-sync-server binary
//!
//! Loads a scene manifest, populates it through the staged spawner and runs
//! the authoritative tick loop on an in-process loopback transport.
//!
//! ## Configuration (TOML via `config` crate, `REALM_*` env, CLI flags)
//!
//! | Key                                | Default | Description                          |
//! |------------------------------------|---------|--------------------------------------|
//! | `REALM_TICK_RATE_HZ`               | `30`    | Server tick rate                     |
//! | `REALM_PRESENCE_INTERVAL_SECS`     | `1`     | Presence broadcast interval          |
//! | `REALM_WORLD_CLOCK_INTERVAL_SECS`  | `5`     | World clock broadcast interval       |
//! | `REALM_INSTANTIATE_DELAY_SECS`     | `0.5`   | Minimum delay after scene load       |
//! | `REALM_DAY_LENGTH_SECS`            | `1440`  | Real seconds per in-world day        |
//! | `REALM_HEADLESS`                   | auto    | No display attached                  |
//! | `REALM_OBSERVER_PREFAB`            | none    | Observer spawned on headless servers |

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use realm_sync::{
    runtime::WorldRuntime,
    scene::{ManifestScene, ProxyFactory},
    server::ServerWorld,
    transport::LoopbackHub,
    types::SyncConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "realm-sync-server", about = "Realm Sync authoritative server", version)]
struct Args {
    /// Scene manifest (JSON)
    #[arg(long, env = "REALM_SCENE")]
    scene: PathBuf,

    /// Optional TOML config file
    #[arg(long, env = "REALM_CONFIG")]
    config: Option<PathBuf>,

    /// Tick rate (Hz), overrides the config file
    #[arg(long)]
    tick_rate_hz: Option<f32>,

    /// Force headless mode on or off instead of detecting it
    #[arg(long)]
    headless: Option<bool>,

    /// Observer prefab spawned on headless servers
    #[arg(long)]
    observer_prefab: Option<String>,
}

fn display_attached() -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("realm_sync=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config =
        SyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(hz) = args.tick_rate_hz {
        config = config.with_tick_rate_hz(hz);
    }
    config = config.with_headless(args.headless.unwrap_or_else(|| !display_attached()));
    if let Some(prefab) = args.observer_prefab {
        config = config.with_observer_prefab(prefab);
    }

    let scene = ManifestScene::from_path(&args.scene)
        .with_context(|| format!("Failed to load scene manifest {}", args.scene.display()))?;

    log::info!(
        "Starting realm-sync-server (scene='{}', tick={}Hz, headless={})",
        scene.manifest().scene_id,
        config.tick_rate_hz,
        config.headless,
    );

    let hub = LoopbackHub::new();
    let factory = ProxyFactory::for_manifest(scene.manifest());
    let tick_interval = config.tick_interval();

    let mut world = ServerWorld::new(config, Box::new(hub.server_transport()), Box::new(factory));
    world.on_scene_loaded(Box::new(scene));

    let world = Arc::new(Mutex::new(world));
    WorldRuntime::new(world, tick_interval).run().await
}
