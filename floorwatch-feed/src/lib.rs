/*!
# Floorwatch Feed - Données d'état des machines de l'usine

Bibliothèque commune aux deux pipelines du tableau de bord :
- `models` : enregistrement machine canonique + snapshot atomique
- `csv` : parsing de l'export `;` en enregistrements typés
- `extract` : normalisation de la page HTML du système legacy
- `status` : classification des statuts libres en catégories fermées
- `summary` : compteurs par catégorie (en-tête du dashboard)
- `feed` : rafraîchissement périodique du fichier CSV avec séquencement
*/

pub mod csv;
pub mod extract;
pub mod feed;
pub mod models;
pub mod status;
pub mod summary;

use std::path::PathBuf;

pub use crate::csv::{parse_machines, parse_report, ParseReport};
pub use extract::machines_from_page;
pub use feed::{CsvFeed, FeedState, FeedStatus, LoadOutcome};
pub use models::{efficiency, MachineRecord, Snapshot};
pub use status::{canonical_key, classify, Category, StatusCensus};
pub use summary::FleetSummary;

/// Erreurs du pipeline CSV
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("CSV source {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV content from {origin} is empty")]
    Empty { origin: String },
}
