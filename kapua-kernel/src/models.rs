use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Status de connexion; une valeur non reconnue est conservée telle quelle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Missing,
    Null,
    Other(String),
}

impl From<String> for ConnectionStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "CONNECTED" => ConnectionStatus::Connected,
            "DISCONNECTED" => ConnectionStatus::Disconnected,
            "MISSING" => ConnectionStatus::Missing,
            "NULL" => ConnectionStatus::Null,
            _ => ConnectionStatus::Other(raw),
        }
    }
}

impl From<ConnectionStatus> for String {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connected => "CONNECTED".into(),
            ConnectionStatus::Disconnected => "DISCONNECTED".into(),
            ConnectionStatus::Missing => "MISSING".into(),
            ConnectionStatus::Null => "NULL".into(),
            ConnectionStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectionStatus>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub created_on: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub modified_on: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLastEvent {
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub received_on: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub sent_on: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Device Kapua; les champs non modélisés sont conservés tels quels dans `extra`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<DeviceConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event: Option<DeviceLastEvent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    /// Status de connexion tel que reporté par le backend (None si pas de connexion)
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        self.connection.as_ref().and_then(|c| c.status.clone())
    }

    /// Libellé lisible: clientId si présent, sinon id
    pub fn label(&self) -> &str {
        if self.client_id.is_empty() { &self.id } else { &self.client_id }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListResult {
    #[serde(default)]
    pub items: Vec<Device>,
    /// None quand le backend n'a pas renvoyé de total (askTotalCount absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub limit_exceeded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub response_code: String,
    #[serde(default)]
    pub event_message: String,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub received_on: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub sent_on: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventListResult {
    #[serde(default)]
    pub items: Vec<DeviceEvent>,
}

// Authentification

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernamePasswordCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
    pub token_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub scope_id: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_on: Option<OffsetDateTime>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub refresh_expires_on: Option<OffsetDateTime>,
}

/// Payload d'erreur standard du backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KapuaErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}
