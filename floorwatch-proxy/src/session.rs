/**
 * SESSION UNIQUE - Connexion et rafraîchissement de la session upstream
 *
 * RÔLE :
 * Maintient exactement une session logique contre le système legacy :
 * établissement (capture du cookie), rafraîchissement périodique avec le
 * même cookie, rétrogradation en "inactive" au premier échec.
 *
 * CONCURRENCE :
 * - Single-flight : une tentative de connexion au plus, partagée par tous
 *   les appelants (`Shared` future stockée dans `attempt`)
 * - Gate async : toute requête upstream (connexion ou refresh) la tient
 *   pendant toute sa durée, donc jamais deux requêtes sortantes
 * - Lectures locales : snapshot sous RwLock, jamais bloquées par le réseau
 *
 * Le nettoyage (`is_connecting`, slot de tentative) est fait par
 * `ConnectingGuard` sur tous les chemins de sortie, panic compris.
 */

use floorwatch_feed::{machines_from_page, Snapshot, StatusCensus};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::poller::Poller;
use crate::state::{SessionInfo, SessionState};
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("connection attempt aborted: {0}")]
    Aborted(String),
    #[error("session manager is shut down")]
    Closed,
}

type Attempt = Shared<BoxFuture<'static, Result<bool, SessionError>>>;

pub struct SessionManager {
    client: UpstreamClient,
    connect_timeout: Duration,
    refresh_timeout: Duration,
    state: RwLock<SessionState>,
    attempt: Mutex<Option<Attempt>>,
    gate: tokio::sync::Mutex<()>,
    poller: Poller,
    census: StatusCensus,
    this: Weak<SessionManager>,
}

/// Remet `is_connecting` à false et libère le slot single-flight au drop
struct ConnectingGuard {
    session: Arc<SessionManager>,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        self.session.state.write().is_connecting = false;
        *self.session.attempt.lock() = None;
    }
}

impl SessionManager {
    pub fn new(cfg: &ProxyConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            client: UpstreamClient::new(&cfg.upstream),
            connect_timeout: Duration::from_secs(cfg.upstream.connect_timeout_secs),
            refresh_timeout: Duration::from_secs(cfg.upstream.refresh_timeout_secs),
            state: RwLock::new(SessionState::default()),
            attempt: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
            poller: Poller::new(cfg.poll_interval()),
            census: StatusCensus::new(),
            this: this.clone(),
        })
    }

    /// Établit la session, ou rejoint la tentative en cours.
    ///
    /// `Ok(true)` immédiat si la session est déjà active. Un échec upstream
    /// donne `Ok(false)` (pas de retry automatique); `Err` seulement si la
    /// tentative elle-même a avorté.
    pub async fn establish_connection(&self) -> Result<bool, SessionError> {
        let attempt = {
            let mut slot = self.attempt.lock();
            match slot.clone() {
                Some(running) => {
                    debug!("[session] connection already in flight, joining it");
                    running
                }
                None => {
                    if self.state.read().is_active {
                        return Ok(true);
                    }
                    let session = self.this.upgrade().ok_or(SessionError::Closed)?;
                    session.state.write().is_connecting = true;
                    let guard = ConnectingGuard { session };

                    let task = tokio::spawn(async move {
                        let ok = guard.session.connect_once().await;
                        drop(guard);
                        ok
                    });
                    let attempt: Attempt = task
                        .map(|joined| joined.map_err(|e| SessionError::Aborted(e.to_string())))
                        .boxed()
                        .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Rafraîchit les données avec le cookie existant, ou rétablit la
    /// session s'il n'y a rien de réutilisable.
    pub async fn refresh_session(&self) -> Result<bool, SessionError> {
        let cookie = {
            let state = self.state.read();
            if state.is_active && state.has_cookie() {
                state.cookie.clone()
            } else {
                None
            }
        };

        let Some(cookie) = cookie else {
            info!("[session] no reusable session, re-establishing");
            self.state.write().is_active = false;
            return self.establish_connection().await;
        };

        let outcome = {
            let _gate = self.gate.lock().await;
            debug!("[session] refreshing with existing session");
            self.client.fetch(Some(&cookie), self.refresh_timeout).await
        };

        match outcome {
            Ok(page) => {
                let snapshot = self.extract(&page.body);
                let count = snapshot.len();
                self.state.write().snapshot = Some(snapshot);
                info!("[session] refreshed {} machines on the same session", count);
                Ok(true)
            }
            Err(e) => {
                warn!("[session] refresh failed, session marked inactive: {}", e);
                self.state.write().is_active = false;
                Ok(false)
            }
        }
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.state.read().snapshot.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().is_active
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub fn info(&self) -> SessionInfo {
        let in_flight = self.attempt.lock().is_some();
        let state = self.state.read();
        SessionInfo::from_state(
            &state,
            self.poller.is_running(),
            in_flight,
            OffsetDateTime::now_utc(),
        )
    }

    /// Arrête le poller et attend sa fin; aucune reprise ensuite
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
        info!("[session] shut down");
    }

    async fn connect_once(&self) -> bool {
        let outcome = {
            let _gate = self.gate.lock().await;
            info!("[session] establishing single session with {}", self.client.url());
            self.client.fetch(None, self.connect_timeout).await
        };

        match outcome {
            Ok(page) => {
                let snapshot = self.extract(&page.body);
                let count = snapshot.len();
                {
                    let mut state = self.state.write();
                    match page.cookie {
                        Some(cookie) => state.cookie = Some(cookie),
                        None => warn!("[session] upstream sent no session cookie"),
                    }
                    state.snapshot = Some(snapshot);
                    state.is_active = true;
                }
                info!("[session] session active with {} machines", count);
                self.start_polling();
                true
            }
            Err(e) => {
                error!("[session] connection failed: {}", e);
                self.state.write().is_active = false;
                false
            }
        }
    }

    fn extract(&self, body: &str) -> Snapshot {
        let now = OffsetDateTime::now_utc();
        let report = machines_from_page(body, now);
        if report.dropped_without_id > 0
            || report.malformed_numbers > 0
            || report.malformed_rows > 0
        {
            debug!(
                "[session] page rows: {} read, {} without id, {} malformed numbers, {} unbalanced quotes",
                report.rows_read,
                report.dropped_without_id,
                report.malformed_numbers,
                report.malformed_rows
            );
        }
        self.census.observe(&report.machines);
        Snapshot::new(report.machines, now)
    }

    fn start_polling(&self) {
        let weak = self.this.clone();
        self.poller.start(move || {
            let weak = weak.clone();
            async move {
                let Some(session) = weak.upgrade() else {
                    return false;
                };
                match session.refresh_session().await {
                    Ok(true) => {}
                    Ok(false) => warn!("[poller] refresh failed, waiting for next cycle"),
                    Err(e) => error!("[poller] {}", e),
                }
                true
            }
        });
    }
}
