/*!
Builders de fixtures JSON au format de l'API REST Kapua

Les timestamps sont passés en RFC3339 déjà formaté: la devkit ne choisit pas
de bibliothèque de temps à la place du code testé.
*/

use serde_json::{json, Map, Value};

/// Helpers pour créer les payloads renvoyés par le backend Kapua
pub struct KapuaFixtures;

impl KapuaFixtures {
    /// Réponse de /authentication/user ou /authentication/refresh
    pub fn access_token(
        token_id: &str,
        scope_id: &str,
        expires_on: &str,
        refresh_token: &str,
        refresh_expires_on: Option<&str>,
    ) -> Value {
        let mut token = json!({
            "type": "accessToken",
            "scopeId": scope_id,
            "tokenId": token_id,
            "expiresOn": expires_on,
            "refreshToken": refresh_token,
        });
        if let Some(refresh_expiry) = refresh_expires_on {
            token["refreshExpiresOn"] = json!(refresh_expiry);
        }
        token
    }

    /// Liste paginée de devices, avec ou sans totalCount
    pub fn device_list(items: Vec<Value>, total_count: Option<u64>) -> Value {
        let mut list = json!({
            "type": "deviceListResult",
            "limitExceeded": false,
            "size": items.len(),
            "items": items,
        });
        if let Some(total) = total_count {
            list["totalCount"] = json!(total);
        }
        list
    }

    pub fn event(action: &str, response_code: &str, message: &str, received_on: &str) -> Value {
        json!({
            "type": "deviceEvent",
            "resource": "command",
            "action": action,
            "responseCode": response_code,
            "eventMessage": message,
            "receivedOn": received_on,
        })
    }

    pub fn event_list(items: Vec<Value>) -> Value {
        json!({
            "type": "deviceEventListResult",
            "size": items.len(),
            "items": items,
        })
    }

    /// Payload d'erreur structuré du backend
    pub fn kapua_error(code: &str, message: &str, details: Option<&str>) -> Value {
        let mut error = json!({ "code": code, "message": message });
        if let Some(details) = details {
            error["details"] = json!(details);
        }
        error
    }
}

/// Builder de device Kapua (connection et lastEvent optionnels)
#[derive(Debug, Clone, Default)]
pub struct DeviceFixture {
    id: String,
    client_id: Option<String>,
    connection: Option<Map<String, Value>>,
    last_event: Option<Map<String, Value>>,
}

impl DeviceFixture {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), ..Self::default() }
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    pub fn connection_status(self, status: &str) -> Self {
        self.with_connection("status", status)
    }

    pub fn connection_created_on(self, ts: &str) -> Self {
        self.with_connection("createdOn", ts)
    }

    pub fn connection_modified_on(self, ts: &str) -> Self {
        self.with_connection("modifiedOn", ts)
    }

    pub fn last_event_received_on(self, ts: &str) -> Self {
        self.with_last_event("receivedOn", ts)
    }

    pub fn last_event_sent_on(self, ts: &str) -> Self {
        self.with_last_event("sentOn", ts)
    }

    pub fn build(self) -> Value {
        let mut device = Map::new();
        device.insert("type".into(), json!("device"));
        device.insert("id".into(), json!(self.id));
        if let Some(client_id) = self.client_id {
            device.insert("clientId".into(), json!(client_id));
        }
        if let Some(connection) = self.connection {
            device.insert("connection".into(), Value::Object(connection));
        }
        if let Some(last_event) = self.last_event {
            device.insert("lastEvent".into(), Value::Object(last_event));
        }
        Value::Object(device)
    }

    fn with_connection(mut self, key: &str, value: &str) -> Self {
        self.connection
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), json!(value));
        self
    }

    fn with_last_event(mut self, key: &str, value: &str) -> Self {
        self.last_event
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), json!(value));
        self
    }
}
