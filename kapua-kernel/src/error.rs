/**
 * ERREURS KAPUA - Taxonomie des échecs côté client
 *
 * RÔLE : Classer chaque échec d'appel backend (transport, HTTP, décodage,
 * session) en conservant l'action qui a échoué pour le diagnostic.
 */

use crate::models::KapuaErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum KapuaError {
    /// DNS, connexion, IO: jamais de retry, remonté tel quel
    #[error("{action} request failed: {source}")]
    Transport {
        action: String,
        #[source]
        source: reqwest::Error,
    },

    /// Status >= 400 avec un payload d'erreur structuré du backend
    #[error("failed to {action}: {}", backend_message(.message, .details))]
    Backend {
        action: String,
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
    },

    /// Status >= 400 dont le corps n'a pas la forme {code, message, details}
    #[error("failed to {action}: API request failed with status {status}: {body}")]
    Http { action: String, status: u16, body: String },

    /// Status < 400 mais corps non décodable
    #[error("failed to {action}: failed to unmarshal response: {source}")]
    MalformedResponse {
        action: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// Refresh ou ré-authentification en échec
    #[error("session renewal failed: {0}")]
    Session(#[source] Box<KapuaError>),

    /// Échec fatal du rapport de santé (liste des devices indisponible)
    #[error("failed to build fleet health: {0}")]
    FleetHealth(#[source] Box<KapuaError>),

    #[error("failed to read devices resource: {0}")]
    DevicesResource(#[source] Box<KapuaError>),

    #[error("no scope available: authenticate first")]
    MissingScope,

    #[error("no authentication token available")]
    NotAuthenticated,

    #[error("invalid resource URI: {0}")]
    InvalidResourceUri(String),

    #[error("unknown resource URI: {0}")]
    UnknownResource(String),

    #[error("failed to serialize resource: {0}")]
    Serialize(#[source] serde_json::Error),
}

fn backend_message(message: &str, details: &Option<String>) -> String {
    match details.as_deref() {
        Some(details) if !details.is_empty() => format!("{message}: {details}"),
        _ => message.to_string(),
    }
}

impl KapuaError {
    /// Classe une réponse >= 400: payload structuré si possible, sinon erreur générique
    pub fn from_status(action: &str, status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<KapuaErrorBody>(body) {
            Ok(parsed) if parsed.code.is_some() || parsed.message.is_some() => KapuaError::Backend {
                action: action.to_string(),
                status,
                message: parsed.message.or_else(|| parsed.code.clone()).unwrap_or_default(),
                code: parsed.code,
                details: parsed.details,
            },
            _ => KapuaError::Http {
                action: action.to_string(),
                status,
                body: String::from_utf8_lossy(body).into_owned(),
            },
        }
    }

    /// Status HTTP associé, si l'erreur vient d'une réponse du backend
    pub fn status(&self) -> Option<u16> {
        match self {
            KapuaError::Backend { status, .. } | KapuaError::Http { status, .. } => Some(*status),
            KapuaError::Session(inner)
            | KapuaError::FleetHealth(inner)
            | KapuaError::DevicesResource(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}
