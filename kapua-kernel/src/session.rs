/**
 * SESSION KAPUA - Cycle de vie du credential d'accès
 *
 * RÔLE : Conserver le token courant (CredentialStore) et décider, avant chaque
 * appel sortant, s'il faut le rafraîchir ou se ré-authentifier.
 *
 * FONCTIONNEMENT :
 * - snapshot sous verrou lecture, verrou relâché avant tout I/O réseau
 * - refresh / ré-authentification hors verrou, puis `store` sous verrou écriture
 * - une seule rénovation à la fois: les appels concurrents attendent la porte
 *   `renewal` puis réévaluent le snapshot frais
 *
 * Les endpoints /authentication/... ne passent jamais par `ensure_valid`.
 */

use crate::client::{encode, KapuaClient};
use crate::error::KapuaError;
use crate::models::{AccessToken, RefreshTokenRequest, UsernamePasswordCredentials};
use parking_lot::RwLock;
use reqwest::Method;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// Marge avant expiration à partir de laquelle on rafraîchit
pub const REFRESH_WINDOW: Duration = Duration::minutes(5);

#[derive(Clone, Default, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub access_expiry: Option<OffsetDateTime>,
    pub refresh_token: Option<String>,
    pub refresh_expiry: Option<OffsetDateTime>,
    pub scope: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &if self.access_token.is_empty() { "" } else { "***" })
            .field("access_expiry", &self.access_expiry)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("refresh_expiry", &self.refresh_expiry)
            .field("scope", &self.scope)
            .finish()
    }
}

impl From<AccessToken> for Credential {
    fn from(token: AccessToken) -> Self {
        Self {
            access_token: token.token_id,
            access_expiry: token.expires_on,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            refresh_expiry: token.refresh_expires_on,
            scope: token.scope_id,
        }
    }
}

impl Credential {
    /// Refresh token présent et non expiré (expiry inconnue = utilisable)
    fn usable_refresh_token(&self, now: OffsetDateTime) -> Option<&str> {
        let token = self.refresh_token.as_deref().filter(|t| !t.is_empty())?;
        match self.refresh_expiry {
            Some(expiry) if now > expiry => None,
            _ => Some(token),
        }
    }
}

/// Stockage du credential courant; toujours remplacé en bloc
#[derive(Debug, Default)]
pub struct CredentialStore {
    inner: RwLock<Credential>,
}

impl CredentialStore {
    pub fn snapshot(&self) -> Credential {
        self.inner.read().clone()
    }

    pub fn store(&self, credential: Credential) {
        *self.inner.write() = credential;
    }

    pub fn clear(&self) {
        *self.inner.write() = Credential::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoExpiryKnown,
    Valid,
    ExpiringSoon,
    ExpiredWithRefresh,
    ExpiredNoRefresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Keep,
    Refresh,
    Reauthenticate,
}

pub fn classify(credential: &Credential, now: OffsetDateTime) -> SessionState {
    let Some(expiry) = credential.access_expiry else {
        return SessionState::NoExpiryKnown;
    };
    if now > expiry {
        if credential.usable_refresh_token(now).is_some() {
            SessionState::ExpiredWithRefresh
        } else {
            SessionState::ExpiredNoRefresh
        }
    } else if expiry - now > REFRESH_WINDOW {
        SessionState::Valid
    } else {
        SessionState::ExpiringSoon
    }
}

/// Action à mener pour un credential donné
pub fn plan(credential: &Credential, now: OffsetDateTime) -> SessionAction {
    match classify(credential, now) {
        SessionState::NoExpiryKnown | SessionState::Valid => SessionAction::Keep,
        // refresh avec le refresh token stocké, même absent: un échec reste non fatal
        SessionState::ExpiringSoon | SessionState::ExpiredWithRefresh => SessionAction::Refresh,
        SessionState::ExpiredNoRefresh => SessionAction::Reauthenticate,
    }
}

impl KapuaClient {
    /// Vérifie le credential avant un appel sortant et le renouvelle si besoin
    pub async fn ensure_valid(&self) -> Result<(), KapuaError> {
        if plan(&self.credentials().snapshot(), self.clock().now()) == SessionAction::Keep {
            return Ok(());
        }

        let _gate = self.renewal_gate().lock().await;
        // un autre appel a peut-être déjà renouvelé pendant l'attente
        let credential = self.credentials().snapshot();
        let now = self.clock().now();

        let result = match plan(&credential, now) {
            SessionAction::Keep => return Ok(()),
            SessionAction::Refresh => {
                info!("access token expiring or expired, attempting automatic refresh");
                let request = RefreshTokenRequest {
                    refresh_token: credential.refresh_token.clone().unwrap_or_default(),
                    token_id: credential.access_token.clone(),
                };
                self.refresh_token(&request).await.map(|_| ())
            }
            SessionAction::Reauthenticate => {
                info!("no usable refresh token, performing full re-authentication");
                self.quick_authenticate().await.map(|_| ())
            }
        };
        result.map_err(|e| KapuaError::Session(Box::new(e)))
    }

    pub async fn authenticate_user(
        &self,
        credentials: &UsernamePasswordCredentials,
    ) -> Result<AccessToken, KapuaError> {
        info!("authenticating user {}", credentials.username);
        let token: AccessToken = self
            .authentication_json("/authentication/user", encode(credentials)?, "authenticate user")
            .await?;
        self.store_token(&token);
        info!("user authentication successful");
        Ok(token)
    }

    /// Authentification avec les identifiants longue durée de la configuration
    pub async fn quick_authenticate(&self) -> Result<AccessToken, KapuaError> {
        self.authenticate_user(self.configured_credentials()).await
    }

    pub async fn refresh_token(&self, request: &RefreshTokenRequest) -> Result<AccessToken, KapuaError> {
        let token: AccessToken = self
            .authentication_json("/authentication/refresh", encode(request)?, "refresh token")
            .await?;
        self.store_token(&token);
        info!("token refresh successful");
        Ok(token)
    }

    /// Invalide la session côté backend puis vide le store
    pub async fn logout(&self) -> Result<(), KapuaError> {
        if self.credentials().snapshot().access_token.is_empty() {
            return Err(KapuaError::NotAuthenticated);
        }
        self.execute(Method::POST, "/authentication/logout", &[], None, "logout").await?;
        self.credentials().clear();
        info!("logout successful");
        Ok(())
    }

    fn store_token(&self, token: &AccessToken) {
        let mut credential = Credential::from(token.clone());
        if credential.scope.is_empty() {
            // garder le scope connu si la réponse n'en renvoie pas
            let previous = self.credentials().snapshot().scope;
            if previous.is_empty() {
                warn!("access token carries no scope id");
            }
            credential.scope = previous;
        }
        debug!(
            expires = ?credential.access_expiry,
            refresh_expires = ?credential.refresh_expiry,
            "token information updated"
        );
        self.credentials().store(credential);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::KapuaConf;
    use kapua_devkit::{KapuaFixtures, StubBackend, StubResponse};
    use std::sync::Arc;
    use time::format_description::well_known::Rfc3339;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-08-01 12:00:00 UTC);

    fn credential(expiry: Option<OffsetDateTime>, refresh: Option<&str>, refresh_expiry: Option<OffsetDateTime>) -> Credential {
        Credential {
            access_token: "tok-old".into(),
            access_expiry: expiry,
            refresh_token: refresh.map(str::to_string),
            refresh_expiry,
            scope: "tenant".into(),
        }
    }

    fn rfc(ts: OffsetDateTime) -> String {
        ts.format(&Rfc3339).unwrap()
    }

    async fn client_against(stub: &StubBackend) -> KapuaClient {
        let conf = KapuaConf {
            api_endpoint: stub.base_url(),
            username: "kapua-sys".into(),
            password: "secret".into(),
            ..KapuaConf::default()
        };
        KapuaClient::new(&conf, Arc::new(FixedClock(NOW))).unwrap()
    }

    fn mount_auth_routes(stub: &StubBackend) {
        let fresh = KapuaFixtures::access_token("tok-new", "tenant", &rfc(NOW + Duration::hours(1)), "ref-new", Some(&rfc(NOW + Duration::hours(2))));
        stub.on("POST", "/v1/authentication/refresh", StubResponse::ok(fresh.clone()));
        stub.on("POST", "/v1/authentication/user", StubResponse::ok(fresh));
    }

    fn mount_user_route(stub: &StubBackend) {
        let fresh = KapuaFixtures::access_token("tok-user", "tenant", &rfc(NOW + Duration::hours(1)), "ref-user", None);
        stub.on("POST", "/v1/authentication/user", StubResponse::ok(fresh));
    }

    #[test]
    fn test_classify_state_machine() {
        let soon = NOW + Duration::minutes(3);
        let later = NOW + Duration::minutes(30);
        let past = NOW - Duration::minutes(1);

        assert_eq!(classify(&credential(None, Some("r"), None), NOW), SessionState::NoExpiryKnown);
        assert_eq!(classify(&credential(Some(later), None, None), NOW), SessionState::Valid);
        assert_eq!(classify(&credential(Some(soon), Some("r"), None), NOW), SessionState::ExpiringSoon);
        assert_eq!(classify(&credential(Some(past), Some("r"), None), NOW), SessionState::ExpiredWithRefresh);
        assert_eq!(
            classify(&credential(Some(past), Some("r"), Some(NOW + Duration::hours(1))), NOW),
            SessionState::ExpiredWithRefresh
        );
        assert_eq!(classify(&credential(Some(past), None, None), NOW), SessionState::ExpiredNoRefresh);
        assert_eq!(
            classify(&credential(Some(past), Some("r"), Some(NOW - Duration::seconds(1))), NOW),
            SessionState::ExpiredNoRefresh
        );
    }

    #[test]
    fn test_refresh_window_boundaries() {
        // exactement 5 minutes restantes: dans la fenêtre
        let at_window = credential(Some(NOW + REFRESH_WINDOW), Some("r"), None);
        assert_eq!(classify(&at_window, NOW), SessionState::ExpiringSoon);

        let just_outside = credential(Some(NOW + REFRESH_WINDOW + Duration::seconds(1)), Some("r"), None);
        assert_eq!(classify(&just_outside, NOW), SessionState::Valid);

        // à l'instant exact d'expiration, pas encore expiré
        assert_eq!(classify(&credential(Some(NOW), Some("r"), None), NOW), SessionState::ExpiringSoon);
    }

    #[test]
    fn test_plan_expiring_soon_always_refreshes() {
        let without_refresh = credential(Some(NOW + Duration::minutes(2)), None, None);
        assert_eq!(plan(&without_refresh, NOW), SessionAction::Refresh);
        let with_refresh = credential(Some(NOW + Duration::minutes(2)), Some("r"), None);
        assert_eq!(plan(&with_refresh, NOW), SessionAction::Refresh);
        assert_eq!(plan(&credential(Some(NOW - Duration::minutes(2)), None, None), NOW), SessionAction::Reauthenticate);
    }

    #[tokio::test]
    async fn test_expiring_soon_without_refresh_token_attempts_refresh() {
        let stub = StubBackend::start().await.unwrap();
        stub.on(
            "POST",
            "/v1/authentication/refresh",
            StubResponse::json(401, KapuaFixtures::kapua_error("UNAUTHENTICATED", "missing refresh token", None)),
        );
        mount_user_route(&stub);
        let client = client_against(&stub).await;
        client.credentials().store(credential(Some(NOW + Duration::minutes(2)), None, None));

        let err = client.ensure_valid().await.unwrap_err();
        assert!(matches!(err, KapuaError::Session(_)));
        assert_eq!(stub.hits("/v1/authentication/refresh"), 1);
        assert_eq!(stub.hits("/v1/authentication/user"), 0);
        let sent = stub.last_request("/v1/authentication/refresh").unwrap().body.unwrap();
        assert_eq!(sent["refreshToken"], "");
        assert_eq!(client.credentials().snapshot().access_token, "tok-old");
    }

    #[test]
    fn test_store_replaces_wholesale_and_clear_resets() {
        let store = CredentialStore::default();
        store.store(credential(Some(NOW), Some("r"), Some(NOW)));
        store.store(Credential { access_token: "other".into(), ..Credential::default() });
        let snap = store.snapshot();
        assert_eq!(snap.access_token, "other");
        assert_eq!(snap.refresh_token, None);
        assert_eq!(snap.access_expiry, None);

        store.clear();
        assert_eq!(store.snapshot(), Credential::default());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let cred = credential(None, Some("super-secret-refresh"), None);
        let printed = format!("{cred:?}");
        assert!(!printed.contains("tok-old"));
        assert!(!printed.contains("super-secret-refresh"));
    }

    #[tokio::test]
    async fn test_no_expiry_never_renews() {
        let stub = StubBackend::start().await.unwrap();
        mount_auth_routes(&stub);
        let client = client_against(&stub).await;
        client.credentials().store(credential(None, Some("ref"), None));

        client.ensure_valid().await.unwrap();
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_valid_token_is_a_no_op() {
        let stub = StubBackend::start().await.unwrap();
        mount_auth_routes(&stub);
        let client = client_against(&stub).await;
        client.credentials().store(credential(Some(NOW + Duration::minutes(6)), Some("ref"), None));

        client.ensure_valid().await.unwrap();
        assert!(stub.requests().is_empty());
        assert_eq!(client.credentials().snapshot().access_token, "tok-old");
    }

    #[tokio::test]
    async fn test_expiring_soon_refreshes_once_and_updates_store() {
        let stub = StubBackend::start().await.unwrap();
        mount_auth_routes(&stub);
        let client = client_against(&stub).await;
        client
            .credentials()
            .store(credential(Some(NOW + Duration::minutes(4)), Some("ref-old"), Some(NOW + Duration::hours(1))));

        client.ensure_valid().await.unwrap();

        assert_eq!(stub.hits("/v1/authentication/refresh"), 1);
        assert_eq!(stub.hits("/v1/authentication/user"), 0);
        let sent = stub.last_request("/v1/authentication/refresh").unwrap().body.unwrap();
        assert_eq!(sent["refreshToken"], "ref-old");
        assert_eq!(sent["tokenId"], "tok-old");

        let snap = client.credentials().snapshot();
        assert_eq!(snap.access_token, "tok-new");
        assert_eq!(snap.refresh_token.as_deref(), Some("ref-new"));
        assert_eq!(snap.access_expiry, Some(NOW + Duration::hours(1)));
        assert_eq!(snap.refresh_expiry, Some(NOW + Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_expired_with_expired_refresh_reauthenticates() {
        let stub = StubBackend::start().await.unwrap();
        mount_auth_routes(&stub);
        let client = client_against(&stub).await;
        client
            .credentials()
            .store(credential(Some(NOW - Duration::minutes(10)), Some("ref-old"), Some(NOW - Duration::minutes(1))));

        client.ensure_valid().await.unwrap();

        assert_eq!(stub.hits("/v1/authentication/user"), 1);
        assert_eq!(stub.hits("/v1/authentication/refresh"), 0);
        let sent = stub.last_request("/v1/authentication/user").unwrap().body.unwrap();
        assert_eq!(sent["username"], "kapua-sys");
        assert_eq!(client.credentials().snapshot().access_token, "tok-new");
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_reauthenticates() {
        let stub = StubBackend::start().await.unwrap();
        mount_auth_routes(&stub);
        let client = client_against(&stub).await;
        client.credentials().store(credential(Some(NOW - Duration::minutes(10)), None, None));

        client.ensure_valid().await.unwrap();

        assert_eq!(stub.hits("/v1/authentication/user"), 1);
        assert_eq!(stub.hits("/v1/authentication/refresh"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let stub = StubBackend::start().await.unwrap();
        mount_auth_routes(&stub);
        let fresh = KapuaFixtures::access_token("tok-new", "tenant", &rfc(NOW + Duration::hours(1)), "ref-new", None);
        stub.on(
            "POST",
            "/v1/authentication/refresh",
            StubResponse::ok(fresh).with_delay(std::time::Duration::from_millis(50)),
        );
        let client = Arc::new(client_against(&stub).await);
        client.credentials().store(credential(Some(NOW + Duration::minutes(1)), Some("ref-old"), None));

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.ensure_valid().await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(stub.hits("/v1/authentication/refresh"), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_a_session_error_and_keeps_old_token() {
        let stub = StubBackend::start().await.unwrap();
        stub.on(
            "POST",
            "/v1/authentication/refresh",
            StubResponse::json(401, KapuaFixtures::kapua_error("UNAUTHENTICATED", "refresh token invalid", None)),
        );
        let client = client_against(&stub).await;
        client.credentials().store(credential(Some(NOW - Duration::minutes(1)), Some("ref-old"), None));

        let err = client.ensure_valid().await.unwrap_err();
        assert!(matches!(err, KapuaError::Session(_)));
        assert!(err.is_unauthorized());
        assert_eq!(client.credentials().snapshot().access_token, "tok-old");
    }

    #[tokio::test]
    async fn test_refresh_without_scope_keeps_previous_scope() {
        let stub = StubBackend::start().await.unwrap();
        let token = KapuaFixtures::access_token("tok-new", "", &rfc(NOW + Duration::hours(1)), "ref-new", None);
        stub.on("POST", "/v1/authentication/refresh", StubResponse::ok(token));
        let client = client_against(&stub).await;
        client.credentials().store(credential(Some(NOW - Duration::minutes(1)), Some("ref-old"), None));

        client.ensure_valid().await.unwrap();
        assert_eq!(client.credentials().snapshot().scope, "tenant");
    }

    #[tokio::test]
    async fn test_logout_clears_store() {
        let stub = StubBackend::start().await.unwrap();
        stub.on("POST", "/v1/authentication/logout", StubResponse::ok(serde_json::json!({})));
        let client = client_against(&stub).await;

        assert!(matches!(client.logout().await, Err(KapuaError::NotAuthenticated)));

        client.credentials().store(credential(Some(NOW + Duration::hours(1)), None, None));
        client.logout().await.unwrap();
        assert_eq!(
            stub.last_request("/v1/authentication/logout").unwrap().authorization.as_deref(),
            Some("Bearer tok-old")
        );
        assert_eq!(client.credentials().snapshot(), Credential::default());
    }
}
