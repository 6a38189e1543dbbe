//! Keel server entry point.
//!
//! Loads configuration, installs logging, starts the game server and runs it
//! until a termination signal arrives.

mod cli;
mod config;
mod logging;
mod signals;

use cli::CliArgs;
use config::AppConfig;
use game_server::GameServer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the health summary is logged.
const HEALTH_REPORT_PERIOD: Duration = Duration::from_secs(60);

pub struct Application {
    config: AppConfig,
    server: Arc<GameServer>,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Configuration is loaded before logging exists, so failures here go
        // straight to stderr through main's error.
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args).map_err(anyhow::Error::msg)?;
        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {}", e);
        }

        logging::setup_logging(&config.logging)?;

        let server = GameServer::new(config.to_server_config()?)?;
        info!("🚀 Keel v{}", env!("CARGO_PKG_VERSION"));
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self { config, server: Arc::new(server) })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {} ({})", self.config.server.bind_address, self.config.network.mode);
        info!("  🕒 Tick interval: {}ms", self.config.server.tick_interval_ms);
        info!("  🩺 Heartbeat period: {}ms", self.config.server.supervisor_period_ms);

        if let Err(e) = self.server.start().await {
            error!("❌ Server failed to start: {}", e);
            if let Err(e) = self.server.shutdown().await {
                warn!("⚠️ Cleanup after failed start reported: {}", e);
            }
            return Err(e.into());
        }

        let monitoring = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_REPORT_PERIOD);
                let mut last_posted = 0u64;
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let bus = server.event_bus().stats();
                    let sessions = match server.session_stats().await {
                        Ok(stats) => stats,
                        Err(e) => {
                            warn!("⚠️ Health report unavailable: {}", e);
                            break;
                        }
                    };
                    info!(
                        "📊 System Health - {} events/min | {} subscribers | {} sessions | {} rejected hellos",
                        bus.events_posted - last_posted,
                        bus.subscribers,
                        sessions.active_sessions,
                        sessions.handshakes_rejected
                    );
                    last_posted = bus.events_posted;
                }
            })
        };

        match signals::wait_for_shutdown_signal().await {
            Ok(received) => info!("🛑 Stopping on {} signal", received),
            Err(e) => error!("❌ Signal handling failed: {}", e),
        }

        monitoring.abort();
        self.server.shutdown().await?;
        info!("👋 Keel stopped");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let app = Application::new(args).await?;
    app.run().await
}
