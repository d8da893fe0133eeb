/**
 * API REST FLOORWATCH - Serveur HTTP du proxy de session unique
 *
 * RÔLE :
 * Expose au dashboard le dernier snapshot de la session upstream et, si
 * activé, le flux CSV. Les lectures ne touchent jamais le réseau, sauf
 * `/api/tecnicon-data` qui déclenche l'établissement quand aucune session
 * n'est active.
 *
 * ROUTES :
 * - /health, /api/test : vivacité
 * - /api/tecnicon-data, /api/session-info, /api/summary : session upstream
 * - /api/csv-data, /api/csv-summary, /api/csv-upload : flux CSV
 *
 * CORS :
 * `CorsLayer::permissive()` : toute origine (dashboard servi ailleurs),
 * preflight OPTIONS répondu par la couche sans atteindre les handlers.
 */

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use floorwatch_feed::{CsvFeed, FeedError, FleetSummary, LoadOutcome};
use serde_json::{json, Value};
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::session::SessionManager;

const SOURCE: &str = "single_persistent_session";

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    /// None quand le flux CSV est désactivé
    pub feed: Option<Arc<CsvFeed>>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/test", get(get_test))
        .route("/api/tecnicon-data", get(get_tecnicon_data))
        .route("/api/session-info", get(get_session_info))
        .route("/api/summary", get(get_summary))
        .route("/api/csv-data", get(get_csv_data))
        .route("/api/csv-summary", get(get_csv_summary))
        .route("/api/csv-upload", post(upload_csv))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

fn request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(9);
    id
}

// GET /api/tecnicon-data (snapshot session, connexion si inactive)
async fn get_tecnicon_data(State(app): State<AppState>) -> (StatusCode, Json<Value>) {
    if !app.session.is_active() {
        if let Err(e) = app.session.establish_connection().await {
            error!("[http] tecnicon-data: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            );
        }
    }

    let snapshot = app.session.snapshot();
    let machines = snapshot.as_ref().map(|s| s.machines()).unwrap_or(&[]);
    let session_age = snapshot
        .as_ref()
        .map(|s| s.age_secs(OffsetDateTime::now_utc()))
        .unwrap_or(0);

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "machines": machines,
            "timestamp": now_rfc3339(),
            "total": machines.len(),
            "sessionAge": session_age,
            "source": SOURCE,
            "isActive": app.session.is_active(),
            "requestId": request_id(),
        })),
    )
}

// GET /api/session-info (état de la session unique)
async fn get_session_info(State(app): State<AppState>) -> Json<crate::state::SessionInfo> {
    Json(app.session.info())
}

// GET /api/test
async fn get_test(State(app): State<AppState>) -> Json<Value> {
    let info = app.session.info();
    Json(json!({
        "message": "Floorwatch proxy with single upstream session is running",
        "timestamp": now_rfc3339(),
        "session": {
            "isActive": info.is_active,
            "machinesCount": info.machines_count,
        }
    }))
}

// GET /api/summary (compteurs du snapshot session)
async fn get_summary(State(app): State<AppState>) -> Json<Value> {
    let snapshot = app.session.snapshot();
    let machines = snapshot.as_ref().map(|s| s.machines()).unwrap_or(&[]);
    let info = app.session.info();
    Json(json!({
        "summary": FleetSummary::from_machines(machines),
        "isActive": info.is_active,
        "sessionAge": info.session_age,
    }))
}

fn feed_disabled() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "CSV feed is disabled" })),
    )
}

// GET /api/csv-data (dernier snapshot CSV + état de chargement)
async fn get_csv_data(State(app): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(feed) = app.feed else {
        return feed_disabled();
    };
    let snapshot = feed.snapshot();
    let machines = snapshot.as_ref().map(|s| s.machines()).unwrap_or(&[]);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "machines": machines,
            "total": machines.len(),
            "status": feed.status(OffsetDateTime::now_utc()),
        })),
    )
}

// GET /api/csv-summary
async fn get_csv_summary(State(app): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(feed) = app.feed else {
        return feed_disabled();
    };
    let snapshot = feed.snapshot();
    let machines = snapshot.as_ref().map(|s| s.machines()).unwrap_or(&[]);
    (
        StatusCode::OK,
        Json(json!({
            "summary": FleetSummary::from_machines(machines),
            "status": feed.status(OffsetDateTime::now_utc()),
        })),
    )
}

// POST /api/csv-upload (corps CSV brut)
async fn upload_csv(State(app): State<AppState>, body: String) -> (StatusCode, Json<Value>) {
    let Some(feed) = app.feed else {
        return feed_disabled();
    };
    match feed.load_text(&body, "upload") {
        Ok(LoadOutcome::Published { machines }) => {
            info!("[http] CSV upload published {} machines", machines);
            (StatusCode::OK, Json(json!({ "success": true, "machines": machines })))
        }
        Ok(LoadOutcome::Superseded) => (
            StatusCode::OK,
            Json(json!({ "success": true, "superseded": true })),
        ),
        Err(e @ FeedError::Empty { .. }) => {
            warn!("[http] rejected CSV upload: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use floorwatch_devkit::{field, serve_router, CsvFixture, MachineRow, TestServer, UpstreamStub};
    use std::time::Duration;

    async fn proxy_for(
        stub: &UpstreamStub,
        feed: Option<Arc<CsvFeed>>,
    ) -> (Arc<SessionManager>, TestServer) {
        let mut cfg = ProxyConfig::default();
        cfg.upstream.url = stub.url();
        cfg.upstream.connect_timeout_secs = 5;
        let session = SessionManager::new(&cfg);
        let router = build_router(AppState { session: session.clone(), feed });
        (session, serve_router(router).await.unwrap())
    }

    async fn fleet_stub() -> UpstreamStub {
        let stub = UpstreamStub::start().await.unwrap();
        stub.set_body(CsvFixture::sample_fleet().to_html_page());
        stub
    }

    #[tokio::test]
    async fn tecnicon_data_connects_once_then_serves_cache() {
        let stub = fleet_stub().await;
        let (session, server) = proxy_for(&stub, None).await;

        let response = server.get("/api/tecnicon-data").await.unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["total"], 4);
        assert_eq!(body["source"], "single_persistent_session");
        assert_eq!(body["isActive"], true);
        assert_eq!(body["requestId"].as_str().unwrap().len(), 9);
        assert_eq!(body["machines"][0]["id"], "006");
        assert_eq!(body["machines"][0]["efficiency"], 80);
        assert!(body["sessionAge"].as_i64().unwrap() <= 1);

        let (status, again) = server.get_json("/api/tecnicon-data").await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(again["total"], 4);
        assert_ne!(again["requestId"], body["requestId"]);
        assert_eq!(stub.hits(), 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn upstream_down_is_not_a_server_error() {
        let stub = fleet_stub().await;
        stub.set_status(503);
        let (_session, server) = proxy_for(&stub, None).await;

        let (status, body) = server.get_json("/api/tecnicon-data").await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["isActive"], false);
        assert_eq!(body["total"], 0);
        assert_eq!(body["sessionAge"], 0);
    }

    #[tokio::test]
    async fn session_info_and_test_shapes() {
        let stub = fleet_stub().await;
        let (session, server) = proxy_for(&stub, None).await;

        let (_, info) = server.get_json("/api/session-info").await.unwrap();
        assert_eq!(info["isActive"], false);
        assert_eq!(info["isPolling"], false);
        assert_eq!(info["hasSession"], false);
        assert!(info["lastUpdate"].is_null());
        assert!(info["sessionAge"].is_null());
        assert_eq!(info["connectionMutex"], false);
        assert_eq!(stub.hits(), 0, "session-info never touches upstream");

        session.establish_connection().await.unwrap();
        let (_, info) = server.get_json("/api/session-info").await.unwrap();
        assert_eq!(info["isActive"], true);
        assert_eq!(info["isPolling"], true);
        assert_eq!(info["machinesCount"], 4);
        assert!(info["lastUpdate"].is_string());

        let (_, test) = server.get_json("/api/test").await.unwrap();
        assert!(test["message"].is_string());
        assert_eq!(field(&test, "session.isActive"), Some(&Value::Bool(true)));
        assert_eq!(field(&test, "session.machinesCount"), Some(&json!(4)));

        let health = server.get("/health").await.unwrap().text().await.unwrap();
        assert_eq!(health, "ok");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn summary_counts_session_snapshot() {
        let stub = fleet_stub().await;
        let (session, server) = proxy_for(&stub, None).await;
        session.establish_connection().await.unwrap();

        let (_, body) = server.get_json("/api/summary").await.unwrap();
        assert_eq!(field(&body, "summary.total"), Some(&json!(4)));
        assert_eq!(field(&body, "summary.byCategory.production"), Some(&json!(1)));
        assert_eq!(field(&body, "summary.byCategory.setup"), Some(&json!(1)));
        assert_eq!(field(&body, "summary.byCategory.idle"), Some(&json!(1)));
        assert_eq!(field(&body, "summary.byCategory.maintenance"), Some(&json!(1)));
        assert_eq!(field(&body, "summary.unassigned"), Some(&json!(1)));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn csv_endpoints_serve_feed_and_accept_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dados.csv");
        std::fs::write(&path, CsvFixture::sample_fleet().build()).unwrap();
        let feed = Arc::new(CsvFeed::new(&path, Duration::from_secs(20)));

        let stub = fleet_stub().await;
        let (_session, server) = proxy_for(&stub, Some(feed.clone())).await;

        let (_, before) = server.get_json("/api/csv-data").await.unwrap();
        assert_eq!(before["total"], 0);
        assert_eq!(field(&before, "status.state"), Some(&json!("no_data")));

        feed.refresh().await.unwrap();
        let (_, data) = server.get_json("/api/csv-data").await.unwrap();
        assert_eq!(data["total"], 4);
        assert_eq!(field(&data, "status.state"), Some(&json!("fresh")));

        let (_, summary) = server.get_json("/api/csv-summary").await.unwrap();
        assert_eq!(field(&summary, "summary.total"), Some(&json!(4)));

        let upload = CsvFixture::new().row(MachineRow::new("77").status("Setup")).build();
        let (status, body) = server.post_text("/api/csv-upload", &upload).await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body["machines"], 1);
        let (_, data) = server.get_json("/api/csv-data").await.unwrap();
        assert_eq!(data["machines"][0]["id"], "77");
        assert_eq!(field(&data, "status.origin"), Some(&json!("upload")));

        let (status, body) = server.post_text("/api/csv-upload", "  \n").await.unwrap();
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
        let (_, data) = server.get_json("/api/csv-data").await.unwrap();
        assert_eq!(data["total"], 1, "empty upload keeps the last snapshot");
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn csv_endpoints_report_disabled_feed() {
        let stub = fleet_stub().await;
        let (_session, server) = proxy_for(&stub, None).await;

        let (status, body) = server.get_json("/api/csv-data").await.unwrap();
        assert_eq!(status, 404);
        assert_eq!(body["success"], false);
        let (status, _) = server.post_text("/api/csv-upload", "x;y").await.unwrap();
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn preflight_gets_cors_headers() {
        let stub = fleet_stub().await;
        let (_session, server) = proxy_for(&stub, None).await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, server.url("/api/tecnicon-data"))
            .header("Origin", "http://dashboard.local")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert!(response.headers().contains_key("access-control-allow-methods"));
        assert_eq!(stub.hits(), 0);

        let response = client
            .get(server.url("/api/session-info"))
            .header("Origin", "http://dashboard.local")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }
}
