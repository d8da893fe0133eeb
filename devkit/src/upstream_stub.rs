/*!
Stub du système de suivi de production legacy

Remplace le vrai serveur pendant les tests: compte les requêtes reçues,
mesure la concurrence maximale observée, renvoie les cookies configurés et
peut simuler latence ou panne (code HTTP non-2xx).
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Chemin servi par le stub, identique à celui du vrai système
pub const UPSTREAM_PATH: &str = "/Tecnicon/Link";

#[derive(Debug, Clone)]
struct Behaviour {
    status: StatusCode,
    body: String,
    cookies: Vec<String>,
    delay: Duration,
}

/// Requête reçue par le stub (pour assertions)
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
struct StubState {
    behaviour: Arc<Mutex<Behaviour>>,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

pub struct UpstreamStub {
    addr: SocketAddr,
    state: StubState,
    handle: JoinHandle<()>,
}

impl UpstreamStub {
    /// Démarre le stub sur un port libre de 127.0.0.1
    pub async fn start() -> Result<Self> {
        let state = StubState {
            behaviour: Arc::new(Mutex::new(Behaviour {
                status: StatusCode::OK,
                body: String::new(),
                cookies: vec!["JSESSIONID=stub-session; Path=/Tecnicon".to_string()],
                delay: Duration::ZERO,
            })),
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route(UPSTREAM_PATH, axum::routing::get(serve_page))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[stub] upstream stub stopped: {}", e);
            }
        });

        log::info!("🏭 [STUB] legacy upstream listening on {}", addr);
        Ok(Self { addr, state, handle })
    }

    pub fn url(&self) -> String {
        format!("http://{}{}?d=Nzg5NA==", self.addr, UPSTREAM_PATH)
    }

    pub fn set_body<S: Into<String>>(&self, body: S) {
        self.state.behaviour.lock().unwrap().body = body.into();
    }

    pub fn set_status(&self, status: u16) {
        self.state.behaviour.lock().unwrap().status =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    pub fn set_cookies(&self, cookies: &[&str]) {
        self.state.behaviour.lock().unwrap().cookies =
            cookies.iter().map(|c| c.to_string()).collect();
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.behaviour.lock().unwrap().delay = delay;
    }

    /// Nombre total de requêtes reçues
    pub fn hits(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Nombre maximal de requêtes traitées simultanément
    pub fn max_concurrent(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for UpstreamStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_page(State(state): State<StubState>, headers: HeaderMap) -> Response {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    state.requests.lock().unwrap().push(ReceivedRequest {
        cookie: header_str(header::COOKIE),
        user_agent: header_str(header::USER_AGENT),
    });

    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    let _in_flight = InFlight(state.in_flight.clone());
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let behaviour = state.behaviour.lock().unwrap().clone();
    if !behaviour.delay.is_zero() {
        tokio::time::sleep(behaviour.delay).await;
    }

    let mut response = (behaviour.status, behaviour.body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    if behaviour.status.is_success() {
        for cookie in &behaviour.cookies {
            if let Ok(value) = HeaderValue::from_str(cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_serves_body_and_cookies() {
        let stub = UpstreamStub::start().await.unwrap();
        stub.set_body("<table></table>");
        stub.set_cookies(&["A=1", "B=2"]);

        let response = reqwest::Client::new()
            .get(stub.url())
            .header("Cookie", "A=1")
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
        let cookies: Vec<_> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["A=1", "B=2"]);
        assert_eq!(response.text().await.unwrap(), "<table></table>");

        assert_eq!(stub.hits(), 1);
        assert_eq!(stub.requests()[0].cookie.as_deref(), Some("A=1"));
        assert_eq!(stub.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn stub_can_fail() {
        let stub = UpstreamStub::start().await.unwrap();
        stub.set_status(503);

        let response = reqwest::get(stub.url()).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
        assert!(response.headers().get("set-cookie").is_none());
    }
}
