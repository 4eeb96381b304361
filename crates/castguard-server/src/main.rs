use castguard_config::ConfigLoader;
use castguard_monitor::{Supervisor, SystemdUnit};
use castguard_notify::AlertDispatcher;
use castguard_server::{api, logging, AppState};
use castguard_shutdown::ShutdownCoordinator;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Self-healing supervisor for a desktop HLS stream")]
struct Args {
    /// Config file path (TOML or JSON)
    #[arg(short, long, default_value = "castguard.toml")]
    config: PathBuf,

    /// Override the HTTP listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new(&args.config).load()?;
    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let _log_guard = logging::init_logging(&config.logging)?;

    if args.check_config {
        info!(config = %args.config.display(), "Configuration is valid");
        return Ok(());
    }

    info!(
        config = %args.config.display(),
        unit = %config.service.unit_name,
        "Starting castguard"
    );

    let unit = Arc::new(SystemdUnit::new(&config.service));
    let dispatcher = Arc::new(AlertDispatcher::from_config(&config));
    if dispatcher.notifier_count() == 0 {
        warn!("No alert sinks enabled, alerts are only logged");
    }

    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        unit.clone(),
        unit.clone(),
        dispatcher,
    )?);
    let app = api::create_router(Arc::new(AppState::from_supervisor(&supervisor)));

    let coordinator = ShutdownCoordinator::builder()
        .with_drain_timeout(Duration::from_millis(config.scheduler.drain_timeout_ms))
        .build();
    let signals = coordinator.signal_handler().clone();
    let tracker = coordinator.task_tracker().clone();

    if config.service.journal {
        let unit = unit.clone();
        let token = signals.subscribe();
        tracker.spawn("journal-follower", async move {
            if let Err(e) = unit.follow_journal(token).await {
                warn!("Journal follower stopped: {}", e);
            }
        });
    }

    {
        let supervisor = supervisor.clone();
        let token = signals.subscribe();
        tracker.spawn("supervisor", async move {
            if let Err(e) = supervisor.run(token).await {
                error!("Supervisor failed: {}", e);
            }
        });
    }

    let addr = args
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", addr);

    {
        let mut token = signals.subscribe();
        tracker.spawn("http-server", async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                token.cancelled().await;
            });
            if let Err(e) = server.await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let signal = signals.wait_for_system_signal().await?;
    coordinator.finish(signal).await;
    Ok(())
}
