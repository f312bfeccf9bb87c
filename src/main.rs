//! wirepool daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ ProxyServer (listen / listen_tls)
//!                 │  CONNECT ───────────────▶ raw TCP tunnel ──▶ upstream
//!                 │  GET/HEAD ──▶ ResponseCache ── hit ──▶ client
//!                 └─ miss / other ──▶ upstream (absolute URI or LoadBalancer)
//!
//!   admin API ──▶ ConnectionRegistry ──▶ AdmissionQueue ──▶ Dialer (TCP/TLS)
//!                      │                 LoadBalancer
//!                      └─ EventBus ──▶ metrics subscriber
//! ```
//!
//! Startup order: config, logging, metrics, core, listeners, admin API.
//! Shutdown order: stop admin, close proxy listeners and drain, close
//! upstream connections.

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use wirepool::admin::{setup_admin_router, AdminState};
use wirepool::cache::ResponseCache;
use wirepool::config::{load_config, ConfigWatcher, ProxyConfig};
use wirepool::crypto::CipherKey;
use wirepool::lifecycle::{wait_for_stop, Shutdown};
use wirepool::load_balancer::LoadBalancer;
use wirepool::net::{tls, Dialer};
use wirepool::observability::{logging, metrics};
use wirepool::proxy::{ProxyOptions, ProxyServer};
use wirepool::registry::{ConnectionRegistry, RegistryOptions};
use wirepool::resilience::RetryPolicy;

#[derive(Parser)]
#[command(name = "wirepool", version, about = "Pooled upstream connections and a caching forward proxy")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "WIREPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Reload the upstream rotation when the config file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "wirepool starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstreams = config.upstreams.len(),
        max_concurrent = config.connections.max_concurrent,
        cache_capacity = config.cache.capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Core
    let balancer = LoadBalancer::with_targets(config.upstreams.clone());
    let registry_options = RegistryOptions::from_config(&config.connections, &config.cipher);
    let ca_path = config.connections.ca_path.as_deref().map(Path::new);
    let dialer = Dialer::new(tls::client_connector(ca_path)?, Some(registry_options.keep_alive));
    let registry = ConnectionRegistry::new(registry_options, dialer.clone(), balancer.clone());
    metrics::track_registry(&registry);

    // Proxy
    let cache = Arc::new(ResponseCache::new(
        config.cache.capacity,
        Duration::from_secs(config.cache.default_ttl_secs),
    ));
    let proxy = ProxyServer::new(ProxyOptions::from(&config), cache.clone(), balancer.clone(), dialer);
    proxy.listen(config.listener.bind_address.parse()?).await?;
    if let (Some(https_address), Some(tls_config)) = (&config.listener.https_bind_address, &config.listener.tls) {
        let acceptor = tls::server_acceptor(Path::new(&tls_config.cert_path), Path::new(&tls_config.key_path))?;
        proxy.listen_tls(https_address.parse()?, acceptor).await?;
    }

    let shutdown = Shutdown::new();
    spawn_cache_janitor(cache, &shutdown);

    let admin_task = if config.admin.enabled {
        let state = AdminState {
            registry: registry.clone(),
            proxy: proxy.clone(),
            retry: RetryPolicy::from(&config.retries),
            api_key: Arc::from(config.admin.api_key.as_str()),
            cipher_key: config
                .cipher
                .key_hex
                .as_deref()
                .map(CipherKey::from_hex)
                .transpose()?
                .map(Arc::new),
        };
        let router = setup_admin_router(state, Duration::from_secs(config.timeouts.upstream_request_secs));
        let listener = tokio::net::TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let mut signal = shutdown.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.recv().await })
                .await
        }))
    } else {
        None
    };

    // Kept alive for the life of the process; dropping it stops watching.
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let balancer = balancer.clone();
            tokio::spawn(async move {
                while let Some(new_config) = updates.recv().await {
                    balancer.replace_targets(new_config.upstreams);
                    tracing::info!(upstreams = balancer.len(), "Upstream rotation reloaded");
                }
            });
            Some(watcher)
        }
        _ => None,
    };

    let signal = wait_for_stop().await?;
    tracing::info!(%signal, "Shutdown signal received");
    shutdown.trigger();

    proxy.close_all().await;
    let closed = registry.close_all().await;
    tracing::info!(closed, "Upstream connections closed");

    if let Some(task) = admin_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Periodically drop expired cache entries so they do not hold memory
/// until the next lookup of the same key.
fn spawn_cache_janitor(cache: Arc<ResponseCache>, shutdown: &Shutdown) {
    let mut signal = shutdown.subscribe();
    let period = cache.default_ttl().clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired cache entries");
                    }
                }
                _ = signal.recv() => break,
            }
        }
    });
}
