//! inbox-guard server entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fred::prelude::*;
use inbox_guard_common::Config;
use inbox_guard_filter::{
    AccountAgeResolver, ApClient, KvStore, MemoryKvStore, RedisKvStore, SpamClassifier, SpamRules,
};
use inbox_guard_proxy::{HttpUpstream, Notifier, ProxyState, router};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Connect the account-age cache: Redis when configured, memory otherwise.
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn KvStore>> {
    let Some(url) = config.redis.url.as_deref() else {
        warn!("No Redis URL configured; account ages are cached in memory only");
        return Ok(Arc::new(MemoryKvStore::new()));
    };

    let fred_config =
        fred::types::config::Config::from_url(url).context("Failed to parse Redis URL")?;
    let client = fred::clients::Client::new(fred_config, None, None, None);
    client.connect();
    client
        .wait_for_connect()
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");

    Ok(Arc::new(RedisKvStore::new(
        Arc::new(client),
        config.redis.prefix.clone(),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inbox_guard=debug,tower_http=info".into()),
        )
        .init();

    info!("Starting inbox-guard...");

    let config = Config::load().context("Failed to load configuration")?;
    let rules = SpamRules::from_config(&config.rules).context("Invalid [rules] configuration")?;
    info!(
        cc_threshold = rules.cc_threshold,
        heuristics = ?rules.heuristic_order,
        cutoff = %rules.account_cutoff,
        "Loaded spam rules"
    );

    let store = connect_store(&config).await?;
    let fetcher = ApClient::new(Duration::from_secs(config.upstream.timeout_secs))?;
    let resolver = AccountAgeResolver::new(store, Arc::new(fetcher), rules.account_age_ttl);
    let classifier = SpamClassifier::new(rules, resolver);

    let upstream = HttpUpstream::new(
        &config.upstream.origin,
        Duration::from_secs(config.upstream.timeout_secs),
    )?;
    let notifier = Notifier::new(&config.notify)?;
    if !notifier.is_enabled() {
        info!("Notification channel not configured; alerts are disabled");
    }

    let state = ProxyState::new(
        classifier,
        Arc::new(upstream),
        Arc::new(notifier),
        config.server.max_body_bytes,
    );
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, origin = %config.upstream.origin, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
