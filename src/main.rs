//! upstream-guard daemon.
//!
//! Fronts a set of remote services with classified retries, per-service
//! circuit breakers and a response cache.
//!
//! ```text
//!     Client ──▶ gateway (/call/{service}/...) ──▶ ServiceClient ──▶ upstream service
//!                                                    │
//!     Operator ──▶ admin API (/admin/...) ───────────┘
//!                                                    │
//!                         events ──▶ tracing + Prometheus metrics
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use upstream_guard::admin::{setup_admin_router, AdminState};
use upstream_guard::client::{HttpTransport, ServiceClient};
use upstream_guard::config::watcher::ConfigWatcher;
use upstream_guard::config::{load_config, GuardConfig};
use upstream_guard::gateway::{setup_gateway_router, GatewayState};
use upstream_guard::lifecycle::cancel::CancelToken;
use upstream_guard::lifecycle::shutdown::{ctrl_c, Shutdown};
use upstream_guard::observability::{logging, metrics, FanoutSink, MetricsSink, SharedSink, TracingSink};

#[derive(Parser)]
#[command(name = "upstream-guard")]
#[command(about = "Resilient gateway for remote service calls", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "guard.toml")]
    config: PathBuf,

    /// Do not reload services when the config file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        eprintln!("config file {} not found, using defaults", args.config.display());
        GuardConfig::default()
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "upstream-guard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let sinks: Vec<SharedSink> = vec![Arc::new(TracingSink), Arc::new(MetricsSink)];
    let sink: SharedSink = Arc::new(FanoutSink::new(sinks));
    let client = ServiceClient::new(Arc::new(HttpTransport::new()), sink, config.client_options());
    register_services(&client, &config)?;

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(sweep_cache(
        client.clone(),
        Duration::from_secs(config.cache.sweep_interval_secs),
        shutdown.subscribe(),
    )));

    // keep the watcher handle alive for the process lifetime
    let _watcher = if !args.no_watch && args.config.exists() {
        let (watcher, updates) = ConfigWatcher::new(&args.config);
        let handle = watcher.run()?;
        tasks.push(tokio::spawn(apply_reloads(client.clone(), updates, shutdown.subscribe())));
        Some(handle)
    } else {
        None
    };

    if config.gateway.enabled {
        let listener = TcpListener::bind(&config.gateway.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Gateway listening");
        let state = GatewayState::new(client.clone(), &config.gateway.forward_headers)
            .with_shutdown(shutdown.subscribe());
        let token = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, setup_gateway_router(state))
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Gateway server failed");
            }
        }));
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let state = AdminState::new(client.clone(), config.admin.api_key.as_str());
        let token = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, setup_admin_router(state))
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin server failed");
            }
        }));
    }

    ctrl_c().await;
    shutdown.trigger();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Task panicked during shutdown");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn register_services(client: &ServiceClient, config: &GuardConfig) -> Result<(), url::ParseError> {
    for descriptor in config.descriptors()? {
        client.register_service(descriptor);
    }
    tracing::info!(services = client.registry().len(), "Services registered");
    Ok(())
}

async fn sweep_cache(client: ServiceClient, every: Duration, shutdown: CancelToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let removed = client.cache().sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                }
            }
        }
    }
}

async fn apply_reloads(
    client: ServiceClient,
    mut updates: tokio::sync::mpsc::UnboundedReceiver<GuardConfig>,
    shutdown: CancelToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            update = updates.recv() => {
                let Some(config) = update else { break };
                if let Err(e) = register_services(&client, &config) {
                    tracing::error!(error = %e, "Reloaded config has an invalid service address");
                }
            }
        }
    }
}
