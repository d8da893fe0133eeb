/*!
Serveur de test pour le routeur du proxy

Facilite les tests de bout en bout avec:
- Service du routeur Axum sur un port éphémère
- Requêtes JSON via reqwest
- Attente active bornée sur une condition
*/

use anyhow::Result;
use axum::Router;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Init logging pour tests (idempotent)
pub fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Routeur servi sur 127.0.0.1:<port libre>, arrêté au drop
pub struct TestServer {
    pub addr: SocketAddr,
    client: reqwest::Client,
    handle: JoinHandle<()>,
}

pub async fn serve_router(router: Router) -> Result<TestServer> {
    init_logging();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            log::error!("[test] router stopped: {}", e);
        }
    });

    log::info!("🧪 Test server on {}", addr);
    Ok(TestServer {
        addr,
        client: reqwest::Client::new(),
        handle,
    })
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    /// GET + décodage JSON, renvoie aussi le code HTTP
    pub async fn get_json(&self, path: &str) -> Result<(u16, Value)> {
        let response = self.get(path).await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    pub async fn post_text(&self, path: &str, body: &str) -> Result<(u16, Value)> {
        let response = self
            .client
            .post(self.url(path))
            .header("Content-Type", "text/csv")
            .body(body.to_string())
            .send()
            .await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Accès à un champ imbriqué ("session.isActive")
pub fn field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// Réévalue `check` toutes les 20ms jusqu'à `true` ou expiration
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log::warn!("⏰ Timeout after {:?} waiting for condition", timeout);
    false
}
