//! Classification santé d'un device: bucket de connexion, dernier signe de vie,
//! staleness et détection d'événements critiques. Fonctions pures.

use crate::models::{ConnectionStatus, Device, DeviceEvent};
use time::OffsetDateTime;

const CRITICAL_KEYWORDS: [&str; 4] = ["CRITICAL", "ERROR", "FAIL", "EXCEPTION"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthBucket {
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastSeenSource {
    LastEventReceivedOn,
    LastEventSentOn,
    ConnectionModifiedOn,
    ConnectionCreatedOn,
}

impl LastSeenSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LastSeenSource::LastEventReceivedOn => "lastEvent.receivedOn",
            LastSeenSource::LastEventSentOn => "lastEvent.sentOn",
            LastSeenSource::ConnectionModifiedOn => "connection.modifiedOn",
            LastSeenSource::ConnectionCreatedOn => "connection.createdOn",
        }
    }
}

pub fn bucket(device: &Device) -> HealthBucket {
    match device.connection_status() {
        Some(ConnectionStatus::Connected) => HealthBucket::Online,
        Some(ConnectionStatus::Disconnected | ConnectionStatus::Missing | ConnectionStatus::Null) => {
            HealthBucket::Offline
        }
        Some(ConnectionStatus::Other(_)) | None => HealthBucket::Unknown,
    }
}

/// Premier timestamp disponible, par priorité:
/// lastEvent.receivedOn > lastEvent.sentOn > connection.modifiedOn > connection.createdOn
pub fn last_seen(device: &Device) -> Option<(OffsetDateTime, LastSeenSource)> {
    let last_event = device.last_event.as_ref();
    let connection = device.connection.as_ref();

    let candidates = [
        (last_event.and_then(|e| e.received_on), LastSeenSource::LastEventReceivedOn),
        (last_event.and_then(|e| e.sent_on), LastSeenSource::LastEventSentOn),
        (connection.and_then(|c| c.modified_on), LastSeenSource::ConnectionModifiedOn),
        (connection.and_then(|c| c.created_on), LastSeenSource::ConnectionCreatedOn),
    ];
    candidates
        .into_iter()
        .find_map(|(ts, source)| ts.map(|ts| (ts, source)))
}

/// Strictement avant le cutoff; égalité = pas stale
pub fn is_stale(last_seen: Option<OffsetDateTime>, cutoff: OffsetDateTime) -> bool {
    last_seen.is_some_and(|ts| ts < cutoff)
}

pub fn is_critical(event: &DeviceEvent) -> bool {
    [&event.action, &event.response_code, &event.event_message]
        .into_iter()
        .filter(|field| !field.is_empty())
        .map(|field| field.to_uppercase())
        .any(|upper| CRITICAL_KEYWORDS.iter().any(|kw| upper.contains(kw)))
}
