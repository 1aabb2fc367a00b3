/**
 * CLIENT KAPUA - Point d'entrée unique vers l'API REST
 *
 * RÔLE : Exécuter un appel backend (`execute`): vérification de session,
 * bearer token, puis classification du résultat HTTP en succès ou erreur
 * structurée. Tout le code qui parle au backend passe par ici.
 */

use crate::clock::SharedClock;
use crate::config::{normalize_base_url, KapuaConf};
use crate::error::KapuaError;
use crate::models::UsernamePasswordCredentials;
use crate::session::CredentialStore;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Réponse brute d'un appel réussi (status < 400)
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub struct KapuaClient {
    http: reqwest::Client,
    base_url: String,
    login: UsernamePasswordCredentials,
    store: CredentialStore,
    clock: SharedClock,
    renewal: tokio::sync::Mutex<()>,
}

pub type SharedKapuaClient = Arc<KapuaClient>;

pub fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, KapuaError> {
    serde_json::to_value(body).map_err(KapuaError::Encode)
}

fn is_authentication_endpoint(path: &str) -> bool {
    path.starts_with("/authentication/")
}

impl KapuaClient {
    pub fn new(conf: &KapuaConf, clock: SharedClock) -> Result<Self, KapuaError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(conf.timeout_secs))
            .build()
            .map_err(|source| KapuaError::Transport { action: "build http client".into(), source })?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&conf.api_endpoint),
            login: UsernamePasswordCredentials {
                username: conf.username.clone(),
                password: conf.password.clone(),
            },
            store: CredentialStore::default(),
            clock,
            renewal: tokio::sync::Mutex::new(()),
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub(crate) fn configured_credentials(&self) -> &UsernamePasswordCredentials {
        &self.login
    }

    pub(crate) fn renewal_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.renewal
    }

    /// Préfixe un chemin avec le scope du credential courant: "/{scope}{suffix}"
    pub fn scoped_path(&self, suffix: &str) -> Result<String, KapuaError> {
        let scope = self.store.snapshot().scope;
        if scope.is_empty() {
            return Err(KapuaError::MissingScope);
        }
        Ok(format!("/{scope}{suffix}"))
    }

    /// Exécute un appel; status >= 400 converti en erreur structurée
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        action: &str,
    ) -> Result<BackendResponse, KapuaError> {
        if !is_authentication_endpoint(path) {
            if let Err(e) = self.ensure_valid().await {
                warn!("token refresh failed, continuing with current token: {e}");
            }
        }
        self.dispatch(method, path, query, body, action).await
    }

    /// `execute` + décodage JSON du corps de réponse
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        action: &str,
    ) -> Result<T, KapuaError> {
        let response = self.execute(method, path, query, body.as_ref(), action).await?;
        decode(&response, action)
    }

    /// Appel d'authentification: jamais de vérification de session
    pub(crate) async fn authentication_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        action: &str,
    ) -> Result<T, KapuaError> {
        let response = self.dispatch(Method::POST, path, &[], Some(&body), action).await?;
        decode(&response, action)
    }

    /// Envoi HTTP et classification du résultat, sans vérification de session
    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        action: &str,
    ) -> Result<BackendResponse, KapuaError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let token = self.store.snapshot().access_token;
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        debug!("{} {}", method, url);
        let transport = |source| KapuaError::Transport { action: action.to_string(), source };
        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(transport)?;
        debug!("{} {} -> {}", method, path, status);

        if status >= 400 {
            return Err(KapuaError::from_status(action, status, &bytes));
        }
        Ok(BackendResponse { status, body: bytes.to_vec() })
    }
}

fn decode<T: DeserializeOwned>(response: &BackendResponse, action: &str) -> Result<T, KapuaError> {
    serde_json::from_slice(&response.body)
        .map_err(|source| KapuaError::MalformedResponse { action: action.to_string(), source })
}
