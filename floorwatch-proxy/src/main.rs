/**
 * FLOORWATCH PROXY - Point d'entrée du proxy de session unique
 *
 * RÔLE : Bootstrap du proxy : config, logging, session upstream, flux CSV,
 * API HTTP. Arrêt propre sur Ctrl-C (poller et relecture CSV joints).
 *
 * ARCHITECTURE : une seule session contre le système de suivi legacy,
 * rafraîchie à intervalle fixe, servie en lecture locale au dashboard.
 */

mod config;
mod http;
mod poller;
mod session;
mod state;
mod upstream;

use crate::config::{load_config, ProxyConfig};
use crate::http::AppState;
use crate::session::SessionManager;

use anyhow::{Context, Result};
use floorwatch_feed::CsvFeed;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg: ProxyConfig = load_config().await;
    let addr: SocketAddr = cfg
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind))?;

    info!("🚀 [proxy] upstream: {}", cfg.upstream.url);
    info!(
        "⏰ [proxy] poll interval {}s, CSV refresh {}s",
        cfg.poll_interval().as_secs(),
        cfg.csv_refresh_interval().as_secs()
    );

    // session unique upstream
    let session = SessionManager::new(&cfg);

    // flux CSV (relecture périodique)
    let shutdown = CancellationToken::new();
    let (feed, feed_task) = if cfg.csv.enabled {
        let feed = Arc::new(CsvFeed::new(&cfg.csv.path, cfg.csv_refresh_interval()));
        let task = feed.spawn_refresh(shutdown.child_token());
        (Some(feed), Some(task))
    } else {
        info!("[proxy] CSV feed disabled");
        (None, None)
    };

    // HTTP
    let app = http::build_router(AppState {
        session: session.clone(),
        feed,
    });
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("[proxy] listening on http://{addr}");

    // connexion initiale unique, sans bloquer le service HTTP
    let initial = session.clone();
    tokio::spawn(async move {
        match initial.establish_connection().await {
            Ok(true) => {}
            Ok(false) => warn!("[proxy] initial connection failed, retrying on next request"),
            Err(e) => warn!("[proxy] initial connection aborted: {}", e),
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("🛑 [proxy] shutting down...");
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    if let Some(task) = feed_task {
        task.await.ok();
    }
    session.shutdown().await;
    Ok(())
}
