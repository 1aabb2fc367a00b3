/**
 * RESOURCES - Catalogue des ressources exposées
 *
 * RÔLE : Lister les ressources lisibles et résoudre une URI `kapua://...`
 * vers son contenu JSON. La query string de l'URI porte les paramètres
 * (ex: `kapua://fleet-health?staleMinutes=90`).
 *
 * RESSOURCES :
 * - kapua://devices       : page de devices (100 max), clés snake_case
 * - kapua://fleet-health  : rapport FleetHealthReport, clés camelCase
 */

use crate::client::SharedKapuaClient;
use crate::clock::SharedClock;
use crate::devices::DeviceQuery;
use crate::error::KapuaError;
use crate::fleet_health::{FleetHealthAggregator, FleetHealthConfig};
use crate::models::Device;
use reqwest::Url;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error};

pub const DEVICES_URI: &str = "kapua://devices";
pub const FLEET_HEALTH_URI: &str = "kapua://fleet-health";
pub const JSON_MIME: &str = "application/json";

const DEVICES_RESOURCE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: &'static str,
    pub mime_type: &'static str,
    pub text: String,
}

#[derive(Serialize)]
struct DevicesSnapshot {
    total_count: usize,
    devices: Vec<Device>,
    last_updated: String,
}

#[derive(Clone)]
pub struct KapuaResources {
    client: SharedKapuaClient,
    clock: SharedClock,
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, KapuaError> {
    serde_json::to_string_pretty(value).map_err(KapuaError::Serialize)
}

impl KapuaResources {
    pub fn new(client: SharedKapuaClient, clock: SharedClock) -> Self {
        Self { client, clock }
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        vec![
            ResourceDescriptor {
                uri: DEVICES_URI,
                name: "Kapua Devices",
                description: "Live list of all Kapua IoT devices with current status and metadata",
                mime_type: JSON_MIME,
            },
            ResourceDescriptor {
                uri: FLEET_HEALTH_URI,
                name: "Kapua Fleet Health",
                description: "Aggregated fleet health snapshot including connection status, stale devices, and recent critical events",
                mime_type: JSON_MIME,
            },
        ]
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents, KapuaError> {
        debug!("reading resource {uri}");
        let parsed = Url::parse(uri).map_err(|e| KapuaError::InvalidResourceUri(format!("{uri}: {e}")))?;
        let key = format!("{}://{}{}", parsed.scheme(), parsed.host_str().unwrap_or_default(), parsed.path());
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();

        match key.as_str() {
            DEVICES_URI => self.read_devices().await,
            FLEET_HEALTH_URI => self.read_fleet_health(&params).await,
            _ => Err(KapuaError::UnknownResource(uri.to_string())),
        }
    }

    async fn read_devices(&self) -> Result<ResourceContents, KapuaError> {
        let query = DeviceQuery { limit: Some(DEVICES_RESOURCE_LIMIT), ..DeviceQuery::default() };
        let result = self.client.list_devices(&query).await.map_err(|e| {
            error!("failed to read devices resource: {e}");
            KapuaError::DevicesResource(Box::new(e))
        })?;

        let snapshot = DevicesSnapshot {
            total_count: result.items.len(),
            devices: result.items,
            last_updated: self.clock.now().unix_timestamp().to_string(),
        };
        Ok(ResourceContents { uri: DEVICES_URI, mime_type: JSON_MIME, text: to_pretty_json(&snapshot)? })
    }

    async fn read_fleet_health(&self, params: &HashMap<String, String>) -> Result<ResourceContents, KapuaError> {
        let cfg = FleetHealthConfig::from_params(params);
        let report = FleetHealthAggregator::new(self.client.clone(), self.clock.clone())
            .build(&cfg)
            .await?;
        Ok(ResourceContents { uri: FLEET_HEALTH_URI, mime_type: JSON_MIME, text: to_pretty_json(&report)? })
    }
}
