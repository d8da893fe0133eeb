use floorwatch_feed::Snapshot;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Enregistrement unique de la session upstream (un par process)
#[derive(Debug, Default)]
pub struct SessionState {
    pub is_active: bool,
    pub is_connecting: bool,
    pub cookie: Option<String>,
    pub snapshot: Option<Snapshot>,
}

impl SessionState {
    pub fn has_cookie(&self) -> bool {
        self.cookie.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn machines_count(&self) -> usize {
        self.snapshot.as_ref().map(Snapshot::len).unwrap_or(0)
    }

    /// Âge arrondi du dernier snapshot, None avant le premier succès
    pub fn session_age(&self, now: OffsetDateTime) -> Option<i64> {
        self.snapshot.as_ref().map(|s| s.age_secs(now))
    }
}

/// Vue `/api/session-info`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub is_active: bool,
    pub is_connecting: bool,
    pub is_polling: bool,
    pub has_session: bool,
    pub machines_count: usize,
    pub last_update: Option<String>,
    pub session_age: Option<i64>,
    /// Une tentative de connexion occupe le slot single-flight
    pub connection_mutex: bool,
}

impl SessionInfo {
    pub fn from_state(
        state: &SessionState,
        is_polling: bool,
        attempt_in_flight: bool,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            is_active: state.is_active,
            is_connecting: state.is_connecting,
            is_polling,
            has_session: state.has_cookie(),
            machines_count: state.machines_count(),
            last_update: state
                .snapshot
                .as_ref()
                .and_then(|s| s.taken_at().format(&Rfc3339).ok()),
            session_age: state.session_age(now),
            connection_mutex: attempt_in_flight,
        }
    }
}
