/**
 * CSV FEED - Rafraîchissement périodique du fichier d'export
 *
 * RÔLE :
 * Relit le fichier CSV (par défaut toutes les 20s) ou ingère un contenu
 * uploadé, et publie un snapshot complet à chaque chargement réussi.
 *
 * SÉQUENCEMENT :
 * Chaque chargement prend un ticket croissant AVANT de lire la source.
 * Un résultat n'est publié que si son ticket est plus récent que le dernier
 * publié : une lecture lente et ancienne n'écrase jamais une donnée récente.
 *
 * ÉTATS EXPOSÉS :
 * no_data (rien jamais chargé) / updating / fresh / stale, plus la dernière
 * erreur de lecture. Aucune donnée de démonstration n'est fabriquée.
 */

use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::csv::parse_report;
use crate::models::Snapshot;
use crate::status::StatusCensus;
use crate::FeedError;

/// Un snapshot plus vieux que `STALE_FACTOR` intervalles est "stale"
const STALE_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Published { machines: usize },
    /// Un chargement plus récent a déjà été publié
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FeedState {
    NoData,
    Updating,
    Fresh { age_secs: i64 },
    Stale { age_secs: i64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    #[serde(flatten)]
    pub state: FeedState,
    pub machines: usize,
    pub last_update: Option<String>,
    pub last_error: Option<String>,
    pub origin: Option<String>,
}

#[derive(Debug, Default)]
struct FeedInner {
    snapshot: Option<Snapshot>,
    published_ticket: u64,
    error_ticket: u64,
    last_error: Option<String>,
    origin: Option<String>,
}

pub struct CsvFeed {
    path: PathBuf,
    refresh_interval: Duration,
    inner: RwLock<FeedInner>,
    next_ticket: AtomicU64,
    loading: AtomicUsize,
    census: StatusCensus,
}

impl CsvFeed {
    pub fn new(path: impl Into<PathBuf>, refresh_interval: Duration) -> Self {
        Self {
            path: path.into(),
            refresh_interval,
            inner: RwLock::new(FeedInner::default()),
            next_ticket: AtomicU64::new(0),
            loading: AtomicUsize::new(0),
            census: StatusCensus::new(),
        }
    }

    /// Dernier snapshot publié, `None` tant que rien n'a été chargé
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner.read().snapshot.clone()
    }

    /// Relit le fichier source et publie le résultat
    pub async fn refresh(&self) -> Result<LoadOutcome, FeedError> {
        let ticket = self.take_ticket();
        let _loading = LoadingGuard::enter(&self.loading);

        let read = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| FeedError::Unreadable {
                path: self.path.clone(),
                source,
            });
        let origin = self.path.display().to_string();

        match read {
            Ok(text) => self.publish(ticket, &text, origin),
            Err(err) => {
                self.record_error(ticket, &err);
                Err(err)
            }
        }
    }

    /// Ingestion d'un contenu CSV fourni directement (upload)
    pub fn load_text(&self, text: &str, origin: &str) -> Result<LoadOutcome, FeedError> {
        let ticket = self.take_ticket();
        let _loading = LoadingGuard::enter(&self.loading);
        self.publish(ticket, text, origin.to_string())
    }

    pub fn status(&self, now: OffsetDateTime) -> FeedStatus {
        let inner = self.inner.read();
        let updating = self.loading.load(Ordering::SeqCst) > 0;
        let stale_after = (self.refresh_interval * STALE_FACTOR).as_secs() as i64;

        let state = match &inner.snapshot {
            _ if updating => FeedState::Updating,
            None => FeedState::NoData,
            Some(snap) => {
                let age_secs = snap.age_secs(now);
                if age_secs > stale_after {
                    FeedState::Stale { age_secs }
                } else {
                    FeedState::Fresh { age_secs }
                }
            }
        };

        FeedStatus {
            state,
            machines: inner.snapshot.as_ref().map(Snapshot::len).unwrap_or(0),
            last_update: inner
                .snapshot
                .as_ref()
                .and_then(|s| s.taken_at().format(&Rfc3339).ok()),
            last_error: inner.last_error.clone(),
            origin: inner.origin.clone(),
        }
    }

    /// Démarre la relecture périodique; s'arrête quand `cancel` est déclenché
    pub fn spawn_refresh(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(feed.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "[feed] refreshing {} every {}s",
                feed.path.display(),
                feed.refresh_interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[feed] refresh loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = feed.refresh().await {
                            warn!("[feed] {}", e);
                        }
                    }
                }
            }
        })
    }

    fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, ticket: u64, text: &str, origin: String) -> Result<LoadOutcome, FeedError> {
        if text.trim().is_empty() {
            let err = FeedError::Empty { origin };
            self.record_error(ticket, &err);
            return Err(err);
        }

        let now = OffsetDateTime::now_utc();
        let report = parse_report(text, now);
        if report.malformed_numbers > 0
            || report.dropped_without_id > 0
            || report.malformed_rows > 0
        {
            debug!(
                "[feed] {}: {} malformed numeric cells, {} rows without id, {} unbalanced quotes",
                origin, report.malformed_numbers, report.dropped_without_id, report.malformed_rows
            );
        }
        self.census.observe(&report.machines);

        let count = report.machines.len();
        let mut inner = self.inner.write();
        if ticket <= inner.published_ticket {
            debug!(
                "[feed] dropping load #{} from {} (already at #{})",
                ticket, origin, inner.published_ticket
            );
            return Ok(LoadOutcome::Superseded);
        }

        inner.snapshot = Some(Snapshot::new(report.machines, now));
        inner.published_ticket = ticket;
        if inner.error_ticket < ticket {
            inner.last_error = None;
        }
        inner.origin = Some(origin);
        info!("[feed] published {} machines (load #{})", count, ticket);
        Ok(LoadOutcome::Published { machines: count })
    }

    fn record_error(&self, ticket: u64, err: &FeedError) {
        let mut inner = self.inner.write();
        if ticket > inner.published_ticket && ticket > inner.error_ticket {
            inner.error_ticket = ticket;
            inner.last_error = Some(err.to_string());
        }
    }
}

/// Compteur de chargements en cours, décrémenté sur tous les chemins
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floorwatch_devkit::fixtures::{CsvFixture, MachineRow};
    use std::io::Write;

    fn fixture(ids: &[&str]) -> String {
        ids.iter()
            .fold(CsvFixture::new(), |f, id| f.row(MachineRow::new(*id)))
            .build()
    }

    #[tokio::test]
    async fn missing_file_reports_no_data_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let feed = CsvFeed::new(dir.path().join("Dados.csv"), Duration::from_secs(20));

        let err = feed.refresh().await.unwrap_err();
        assert!(matches!(err, FeedError::Unreadable { .. }));

        let status = feed.status(OffsetDateTime::now_utc());
        assert_eq!(status.state, FeedState::NoData);
        assert_eq!(status.machines, 0);
        assert!(status.last_error.unwrap().contains("Dados.csv"));
        assert!(feed.snapshot().is_none());
    }

    #[tokio::test]
    async fn refresh_publishes_file_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", fixture(&["006", "112"])).unwrap();
        let feed = CsvFeed::new(file.path(), Duration::from_secs(20));

        let outcome = feed.refresh().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Published { machines: 2 });

        let status = feed.status(OffsetDateTime::now_utc());
        assert!(matches!(status.state, FeedState::Fresh { .. }));
        assert_eq!(status.machines, 2);
        assert!(status.last_update.is_some());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn read_failure_keeps_last_good_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dados.csv");
        std::fs::write(&path, fixture(&["25", "26", "27"])).unwrap();
        let feed = CsvFeed::new(&path, Duration::from_secs(20));
        feed.refresh().await.unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(feed.refresh().await.is_err());

        let status = feed.status(OffsetDateTime::now_utc());
        assert_eq!(status.machines, 3);
        assert!(status.last_error.is_some());
        assert_eq!(feed.snapshot().unwrap().len(), 3);
    }

    #[test]
    fn older_ticket_never_overwrites_newer_data() {
        let feed = CsvFeed::new("unused.csv", Duration::from_secs(20));
        let slow = feed.take_ticket();
        let fast = feed.take_ticket();

        assert_eq!(
            feed.publish(fast, &fixture(&["1", "2"]), "fast".into()).unwrap(),
            LoadOutcome::Published { machines: 2 }
        );
        assert_eq!(
            feed.publish(slow, &fixture(&["9"]), "slow".into()).unwrap(),
            LoadOutcome::Superseded
        );

        let snap = feed.snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(feed.status(OffsetDateTime::now_utc()).origin.as_deref(), Some("fast"));
    }

    #[test]
    fn empty_upload_is_rejected_without_wiping_data() {
        let feed = CsvFeed::new("unused.csv", Duration::from_secs(20));
        feed.load_text(&fixture(&["66"]), "upload").unwrap();

        let err = feed.load_text("  \n", "upload").unwrap_err();
        assert!(matches!(err, FeedError::Empty { .. }));
        assert_eq!(feed.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn old_snapshot_is_stale() {
        let feed = CsvFeed::new("unused.csv", Duration::from_secs(20));
        feed.load_text(&fixture(&["66"]), "upload").unwrap();

        let later = OffsetDateTime::now_utc() + time::Duration::seconds(120);
        match feed.status(later).state {
            FeedState::Stale { age_secs } => assert!(age_secs >= 119),
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn loading_counter_marks_updating() {
        let feed = CsvFeed::new("unused.csv", Duration::from_secs(20));
        let guard = LoadingGuard::enter(&feed.loading);
        assert_eq!(feed.status(OffsetDateTime::now_utc()).state, FeedState::Updating);
        drop(guard);
        assert_eq!(feed.status(OffsetDateTime::now_utc()).state, FeedState::NoData);
    }

    #[tokio::test]
    async fn refresh_loop_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dados.csv");
        std::fs::write(&path, fixture(&["1"])).unwrap();
        let feed = Arc::new(CsvFeed::new(&path, Duration::from_millis(20)));
        let cancel = CancellationToken::new();

        let handle = feed.spawn_refresh(cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(feed.snapshot().unwrap().len(), 1);
    }
}
