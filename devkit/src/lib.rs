/*!
# Floorwatch DevKit - Stubs et utilitaires pour les tests

Bibliothèque facilitant les tests du proxy et du pipeline CSV avec:
- Stub HTTP du système de suivi legacy (cookies, latence, pannes)
- Fixtures CSV / table HTML au format de l'export
- Serveur de test pour exercer le routeur Axum de bout en bout
*/

pub mod fixtures;
pub mod test_utils;
pub mod upstream_stub;

pub use fixtures::{CsvFixture, MachineRow};
pub use test_utils::{field, init_logging, serve_router, wait_until, TestServer};
pub use upstream_stub::{ReceivedRequest, UpstreamStub};
