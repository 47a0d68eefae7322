//! Async frame driver – runs a [`ServerWorld`] at a fixed tick rate.
//!
//! The world itself is synchronous; this wrapper only owns the timer and the
//! shutdown path. Each tick runs inside a `tracing` span so subscriber output
//! groups everything a frame logged.

use anyhow::Result;
use log::info;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::server::ServerWorld;
use crate::types::WorldStats;

pub struct WorldRuntime {
    world: Arc<Mutex<ServerWorld>>,
    tick_interval: Duration,
}

impl WorldRuntime {
    pub fn new(world: Arc<Mutex<ServerWorld>>, tick_interval: Duration) -> Self {
        Self {
            world,
            tick_interval,
        }
    }

    pub fn world(&self) -> Arc<Mutex<ServerWorld>> {
        self.world.clone()
    }

    /// Run until SIGINT.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for SIGINT: {}", e);
            }
        })
        .await
        .map(|_| ())
    }

    /// Run until `shutdown` resolves, then stop the server cleanly.
    pub async fn run_until<F>(self, shutdown: F) -> Result<WorldStats>
    where
        F: Future<Output = ()>,
    {
        self.world.lock().on_start_server();
        info!(
            "World runtime ticking every {:.1}ms",
            self.tick_interval.as_secs_f64() * 1000.0
        );

        let world = self.world.clone();
        let dt = self.tick_interval;
        let ticker = async move {
            let mut timer = tokio::time::interval(dt);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let tick = world.lock().tick_count() + 1;
                async {
                    let report = world.lock().on_server_tick(dt);
                    if !report.admitted.is_empty() {
                        tracing::debug!(admitted = report.admitted.len(), "players admitted");
                    }
                }
                .instrument(tracing::info_span!("tick", n = tick))
                .await;
            }
        };

        tokio::select! {
            _ = ticker => {}
            _ = shutdown => {
                info!("World runtime shutting down");
            }
        }

        let mut world = self.world.lock();
        let stats = world.stats();
        world.on_stop_server();
        Ok(stats)
    }
}
