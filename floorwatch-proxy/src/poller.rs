/**
 * POLLER - Rafraîchissement périodique de la session upstream
 *
 * Une seule tâche tokio, ticks à intervalle fixe (premier tick après un
 * intervalle complet), exécutions strictement séquentielles. `start` est
 * idempotent, `stop` annule puis attend la fin de la tâche. Après
 * `shutdown`, plus aucun `start` ne relance la boucle.
 */

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    running: Option<Running>,
    closed: bool,
}

pub struct Poller {
    interval: Duration,
    slot: Mutex<Slot>,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Démarre la boucle si elle ne tourne pas déjà; `tick` renvoie `false`
    /// pour arrêter la boucle de l'intérieur. Retourne `true` si démarrée ici,
    /// `false` si elle tournait déjà ou si le poller est fermé.
    pub fn start<F, Fut>(&self, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.closed || slot.running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("[poller] polling every {}s", period.as_secs());

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("[poller] tick");
                        if !tick().await {
                            break;
                        }
                    }
                }
            }
            info!("[poller] stopped");
        });

        slot.running = Some(Running { cancel, handle });
        true
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub async fn stop(&self) {
        let running = self.slot.lock().running.take();
        Self::join(running).await;
    }

    /// Ferme le poller sous le même verrou que `start`, puis arrête la boucle
    pub async fn shutdown(&self) {
        let running = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.running.take()
        };
        Self::join(running).await;
    }

    async fn join(running: Option<Running>) {
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            let _ = handle.await;
        }
    }
}
