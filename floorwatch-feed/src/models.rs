use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::status::{classify, Category};

/// Enregistrement canonique d'une machine physique.
///
/// Produit aussi bien par le proxy (page HTML du système legacy) que par
/// l'import CSV. Les clés JSON restent en camelCase pour le front React.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineRecord {
    /// Identifiant stable (chiffres), unique dans un snapshot
    pub id: String,
    /// Opérateur affecté, vide = machine sans opérateur
    pub operator: String,
    /// Libellé libre dans la langue source, classifié à la lecture
    pub status: String,
    pub event: String,
    pub op: String,
    pub operation: String,
    pub reference: String,
    pub planned: u64,
    pub produced: u64,
    pub rejected: u64,
    /// Toujours dérivé de `planned`/`produced`, jamais lu en entrée
    pub efficiency: u64,
    pub plan_time: u64,
    pub os_number: String,
    pub expected_date: String,
    pub expected_time: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl MachineRecord {
    pub fn category(&self) -> Category {
        classify(&self.status)
    }

    pub fn is_unassigned(&self) -> bool {
        self.operator.trim().is_empty()
    }
}

/// `round(produced / planned * 100)`, 0 quand rien n'est planifié
pub fn efficiency(planned: u64, produced: u64) -> u64 {
    if planned == 0 {
        return 0;
    }
    ((produced as f64 / planned as f64) * 100.0).round() as u64
}

/// Liste complète des machines à un instant donné.
///
/// Remplacée en bloc à chaque rafraîchissement : un lecteur qui a cloné
/// le snapshot garde l'ancienne liste entière, jamais un mélange.
#[derive(Debug, Clone)]
pub struct Snapshot {
    machines: Arc<[MachineRecord]>,
    taken_at: OffsetDateTime,
}

impl Snapshot {
    pub fn new(machines: Vec<MachineRecord>, taken_at: OffsetDateTime) -> Self {
        Self {
            machines: machines.into(),
            taken_at,
        }
    }

    pub fn machines(&self) -> &[MachineRecord] {
        &self.machines
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn taken_at(&self) -> OffsetDateTime {
        self.taken_at
    }

    /// Âge en secondes (arrondi), jamais négatif
    pub fn age_secs(&self, now: OffsetDateTime) -> i64 {
        let millis = (now - self.taken_at).whole_milliseconds().max(0);
        ((millis + 500) / 1000) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn efficiency_formula() {
        assert_eq!(efficiency(10000, 7500), 75);
        assert_eq!(efficiency(0, 500), 0);
        assert_eq!(efficiency(3, 2), 67);
        assert_eq!(efficiency(100, 130), 130);
    }

    #[test]
    fn snapshot_age_rounds_to_seconds() {
        let snap = Snapshot::new(Vec::new(), datetime!(2026-10-16 08:00:00 UTC));
        assert_eq!(snap.age_secs(datetime!(2026-10-16 08:00:41.6 UTC)), 42);
        assert_eq!(snap.age_secs(datetime!(2026-10-16 07:59:00 UTC)), 0);
        assert!(snap.is_empty());
    }

    #[test]
    fn record_serializes_in_camel_case() {
        let record = MachineRecord {
            id: "006".into(),
            operator: String::new(),
            status: "Setup".into(),
            event: String::new(),
            op: String::new(),
            operation: String::new(),
            reference: String::new(),
            planned: 0,
            produced: 0,
            rejected: 0,
            efficiency: 0,
            plan_time: 12,
            os_number: "OS-1".into(),
            expected_date: String::new(),
            expected_time: String::new(),
            timestamp: datetime!(2026-10-16 08:00:00 UTC),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["planTime"], 12);
        assert_eq!(json["osNumber"], "OS-1");
        assert_eq!(json["timestamp"], "2026-10-16T08:00:00Z");
        assert!(record.is_unassigned());
        assert_eq!(record.category(), Category::Setup);
    }
}
