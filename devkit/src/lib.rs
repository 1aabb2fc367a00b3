/*!
# Kapua DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le test du kernel Kapua sans backend réel:
- Stub HTTP de l'API REST Kapua (routes, délais, compteurs)
- Builders de fixtures JSON (devices, events, tokens, erreurs)
*/

pub mod backend_stub;
pub mod fixtures;

pub use backend_stub::{RecordedRequest, StubBackend, StubResponse};
pub use fixtures::{DeviceFixture, KapuaFixtures};
