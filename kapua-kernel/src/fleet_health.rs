/**
 * FLEET HEALTH - Agrégation de l'état de santé de la flotte
 *
 * RÔLE : Construire un rapport unique à partir d'une page de devices et d'un
 * fan-out borné de requêtes d'événements (une par device).
 *
 * FONCTIONNEMENT :
 * 1. Liste des devices (fatal si en échec)
 * 2. Passe séquentielle: buckets online/offline/unknown + devices stale
 * 3. Une task par device avec id, au plus `event_concurrency` requêtes en vol
 *    (sémaphore). Un échec devient un warning, sans impact sur les autres.
 * 4. Attente de toutes les tasks (JoinSet) puis assemblage du rapport
 *
 * ORDRE : staleDevices suit l'ordre de la liste; devicesWithCriticalEvents et
 * warnings suivent l'ordre de complétion des tasks.
 *
 * ANNULATION : abandonner le future de `build` détruit le JoinSet, ce qui
 * annule toutes les tasks encore en cours.
 */

use crate::classifier::{self, HealthBucket};
use crate::client::SharedKapuaClient;
use crate::clock::SharedClock;
use crate::devices::{DeviceQuery, EventQuery, SortDir};
use crate::error::KapuaError;
use crate::models::{ConnectionStatus, Device, DeviceEvent};
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub const DEFAULT_STALE_MINUTES: u32 = 60;
pub const DEFAULT_CRITICAL_MINUTES: u32 = 60;
pub const DEFAULT_DEVICE_LIMIT: u32 = 200;
pub const DEFAULT_EVENT_CONCURRENCY: u32 = 5;
pub const EVENT_FETCH_LIMIT: u32 = 20;
pub const MAX_CRITICAL_EVENTS_PER_DEVICE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetHealthConfig {
    pub stale_minutes: u32,
    pub critical_minutes: u32,
    pub device_limit: u32,
    pub event_concurrency: u32,
}

impl Default for FleetHealthConfig {
    fn default() -> Self {
        Self {
            stale_minutes: DEFAULT_STALE_MINUTES,
            critical_minutes: DEFAULT_CRITICAL_MINUTES,
            device_limit: DEFAULT_DEVICE_LIMIT,
            event_concurrency: DEFAULT_EVENT_CONCURRENCY,
        }
    }
}

impl FleetHealthConfig {
    /// Chaque paramètre absent, invalide ou <= 0 retombe sur sa valeur par défaut
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str, fallback: u32| parse_positive(params.get(key).map(String::as_str), fallback);
        Self {
            stale_minutes: get("staleMinutes", defaults.stale_minutes),
            critical_minutes: get("criticalMinutes", defaults.critical_minutes),
            device_limit: get("limit", defaults.device_limit),
            event_concurrency: get("eventConcurrency", defaults.event_concurrency),
        }
    }
}

fn parse_positive(value: Option<&str>, fallback: u32) -> u32 {
    match value.map(str::trim).and_then(|v| v.parse::<u32>().ok()) {
        Some(parsed) if parsed > 0 => parsed,
        _ => fallback,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaleDevice {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectionStatus>,
    pub last_seen: String,
    pub last_seen_source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalDevice {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectionStatus>,
    pub events: Vec<DeviceEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetHealthReport {
    pub generated_at: String,
    pub total_devices: u64,
    pub online: u64,
    pub offline: u64,
    pub unknown: u64,
    pub stale_since_minutes: u32,
    pub stale_devices: Vec<StaleDevice>,
    pub critical_lookback_minutes: u32,
    pub devices_with_critical_events: Vec<CriticalDevice>,
    pub warnings: Vec<String>,
}

/// Résultats partagés entre les tasks d'événements
#[derive(Debug, Default)]
struct EventFindings {
    critical: Vec<CriticalDevice>,
    warnings: Vec<String>,
}

pub struct FleetHealthAggregator {
    client: SharedKapuaClient,
    clock: SharedClock,
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

/// Total reporté par le serveur s'il existe, sinon le nombre d'items reçus.
/// Un total inférieur à ce qui a été reçu n'est pas crédible.
fn resolve_total(total_count: Option<u64>, fetched: usize) -> u64 {
    let fetched = fetched as u64;
    total_count.map_or(fetched, |total| total.max(fetched))
}

impl FleetHealthAggregator {
    pub fn new(client: SharedKapuaClient, clock: SharedClock) -> Self {
        Self { client, clock }
    }

    pub async fn build(&self, cfg: &FleetHealthConfig) -> Result<FleetHealthReport, KapuaError> {
        info!(
            "building fleet health report (stale>{} min, critical>{} min, limit={}, concurrency={})",
            cfg.stale_minutes, cfg.critical_minutes, cfg.device_limit, cfg.event_concurrency
        );

        let query = DeviceQuery { limit: Some(cfg.device_limit), offset: None, ask_total_count: true };
        let devices = self
            .client
            .list_devices(&query)
            .await
            .map_err(|e| KapuaError::FleetHealth(Box::new(e)))?;
        let total_devices = resolve_total(devices.total_count, devices.items.len());

        let now = self.clock.now();
        let cutoff = now - Duration::minutes(cfg.stale_minutes.into());
        let critical_since = now - Duration::minutes(cfg.critical_minutes.into());

        let (mut online, mut offline, mut unknown) = (0u64, 0u64, 0u64);
        let mut stale_devices = Vec::new();
        let mut targets = Vec::new();

        for device in devices.items {
            match classifier::bucket(&device) {
                HealthBucket::Online => online += 1,
                HealthBucket::Offline => offline += 1,
                HealthBucket::Unknown => unknown += 1,
            }

            if let Some((ts, source)) = classifier::last_seen(&device) {
                if classifier::is_stale(Some(ts), cutoff) {
                    stale_devices.push(StaleDevice {
                        id: device.id.clone(),
                        client_id: device.client_id.clone(),
                        status: device.connection_status(),
                        last_seen: format_ts(ts),
                        last_seen_source: source.as_str(),
                    });
                }
            }

            if !device.id.is_empty() {
                targets.push(device);
            }
        }

        let findings = self.inspect_events(targets, critical_since, cfg.event_concurrency).await;

        let report = FleetHealthReport {
            generated_at: format_ts(now),
            total_devices,
            online,
            offline,
            unknown,
            stale_since_minutes: cfg.stale_minutes,
            stale_devices,
            critical_lookback_minutes: cfg.critical_minutes,
            devices_with_critical_events: findings.critical,
            warnings: findings.warnings,
        };
        info!(
            "fleet health: {} devices ({} online, {} offline, {} unknown), {} stale, {} critical, {} warnings",
            report.total_devices,
            report.online,
            report.offline,
            report.unknown,
            report.stale_devices.len(),
            report.devices_with_critical_events.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    async fn inspect_events(
        &self,
        targets: Vec<Device>,
        critical_since: OffsetDateTime,
        concurrency: u32,
    ) -> EventFindings {
        let findings: Shared<EventFindings> = new_state(EventFindings::default());
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1) as usize));
        let query = Arc::new(EventQuery {
            start_date: Some(critical_since),
            limit: Some(EVENT_FETCH_LIMIT),
            sort_param: Some("receivedOn"),
            sort_dir: Some(SortDir::Descending),
        });

        let mut tasks = JoinSet::new();
        for device in targets {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            let query = query.clone();
            let findings = findings.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                inspect_device(&client, device, &query, &findings).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("event lookup task failed: {e}");
                findings.lock().warnings.push(format!("event lookup task failed: {e}"));
            }
        }

        let collected = std::mem::take(&mut *findings.lock());
        collected
    }
}

async fn inspect_device(
    client: &SharedKapuaClient,
    device: Device,
    query: &EventQuery,
    findings: &Shared<EventFindings>,
) {
    let events = match client.list_device_events(&device.id, query).await {
        Ok(result) => result.items,
        Err(e) => {
            warn!("event lookup failed for device {}: {e}", device.label());
            let warning = format!("device {}: {e}", device.label());
            findings.lock().warnings.push(warning);
            return;
        }
    };

    let critical: Vec<DeviceEvent> = events
        .into_iter()
        .filter(classifier::is_critical)
        .take(MAX_CRITICAL_EVENTS_PER_DEVICE)
        .collect();
    if critical.is_empty() {
        return;
    }

    let entry = CriticalDevice {
        status: device.connection_status(),
        id: device.id,
        client_id: device.client_id,
        events: critical,
    };
    findings.lock().critical.push(entry);
}
