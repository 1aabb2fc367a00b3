/*!
Stub de l'API REST Kapua pour développement sans backend

Démarre un serveur axum local sur un port éphémère. Chaque route est
configurée par (méthode, chemin) et renvoie une réponse figée, avec un délai
optionnel. Toutes les requêtes reçues sont enregistrées et le nombre maximal
de requêtes simultanées est mesuré.
*/

use anyhow::Result;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::extract::State;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Réponse figée renvoyée par une route du stub
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
    pub delay: Option<Duration>,
}

impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
            delay: None,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "text/plain",
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Requête reçue par le stub (pour assertions de tests)
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    /// Valeur d'un paramètre de query string (sans décodage des %XX)
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then(|| v.to_string())
        })
    }
}

#[derive(Default)]
struct StubInner {
    routes: Mutex<HashMap<(String, String), StubResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serveur stub de l'API Kapua
pub struct StubBackend {
    addr: SocketAddr,
    inner: Arc<StubInner>,
    task: JoinHandle<()>,
}

impl StubBackend {
    /// Démarre le stub sur 127.0.0.1 avec un port choisi par l'OS
    pub async fn start() -> Result<Self> {
        env_logger::try_init().ok();

        let inner = Arc::new(StubInner::default());
        let app = Router::new().fallback(dispatch).with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[STUB] server stopped: {}", e);
            }
        });

        log::info!("[STUB] Kapua backend listening on http://{}", addr);
        Ok(Self { addr, inner, task })
    }

    /// URL de base à donner au client (sans le suffixe /v1)
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Configure la réponse d'une route; remplace une éventuelle réponse existante
    pub fn on(&self, method: &str, path: &str, response: StubResponse) -> &Self {
        self.inner
            .routes
            .lock()
            .insert((method.to_uppercase(), path.to_string()), response);
        self
    }

    /// Nombre de requêtes reçues sur un chemin exact
    pub fn hits(&self, path: &str) -> usize {
        self.inner.requests.lock().iter().filter(|r| r.path == path).count()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().clone()
    }

    /// Dernière requête reçue sur un chemin exact
    pub fn last_request(&self, path: &str) -> Option<RecordedRequest> {
        self.inner
            .requests
            .lock()
            .iter()
            .rev()
            .find(|r| r.path == path)
            .cloned()
    }

    /// Plus grand nombre de requêtes traitées simultanément depuis le démarrage
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Reset des requêtes enregistrées et du compteur de concurrence
    pub fn clear(&self) {
        self.inner.requests.lock().clear();
        self.inner.max_in_flight.store(0, Ordering::SeqCst);
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn dispatch(
    State(inner): State<Arc<StubInner>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    inner.max_in_flight.fetch_max(current, Ordering::SeqCst);
    let _guard = InFlightGuard(&inner.in_flight);

    let path = uri.path().to_string();
    let recorded = RecordedRequest {
        method: method.as_str().to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).ok(),
    };
    inner.requests.lock().push(recorded);

    let route = inner
        .routes
        .lock()
        .get(&(method.as_str().to_string(), path.clone()))
        .cloned();

    let Some(response) = route else {
        log::warn!("[STUB] no route for {} {}", method, path);
        let body = serde_json::json!({
            "code": "ENTITY_NOT_FOUND",
            "message": format!("no stub route for {} {}", method, path),
        });
        return (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();
    };

    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    log::debug!("[STUB] {} {} -> {}", method, path, status);
    (status, [(header::CONTENT_TYPE, response.content_type)], response.body).into_response()
}
