use crate::client::KapuaClient;
use crate::error::KapuaError;
use crate::models::{DeviceEventListResult, DeviceListResult};
use reqwest::Method;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct DeviceQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub ask_total_count: bool,
}

impl DeviceQuery {
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        if self.ask_total_count {
            params.push(("askTotalCount", "true".to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Ascending,
    Descending,
}

impl SortDir {
    fn as_str(self) -> &'static str {
        match self {
            SortDir::Ascending => "ASCENDING",
            SortDir::Descending => "DESCENDING",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub start_date: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub sort_param: Option<&'static str>,
    pub sort_dir: Option<SortDir>,
}

impl EventQuery {
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start_date.and_then(|ts| ts.format(&Rfc3339).ok()) {
            params.push(("startDate", start));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(sort_param) = self.sort_param {
            params.push(("sortParam", sort_param.to_string()));
        }
        if let Some(sort_dir) = self.sort_dir {
            params.push(("sortDir", sort_dir.as_str().to_string()));
        }
        params
    }
}

impl KapuaClient {
    /// GET /{scope}/devices
    pub async fn list_devices(&self, query: &DeviceQuery) -> Result<DeviceListResult, KapuaError> {
        let path = self.scoped_path("/devices")?;
        let result: DeviceListResult = self
            .request_json(Method::GET, &path, &query.to_params(), None, "list devices")
            .await?;
        info!("listed {} devices", result.items.len());
        Ok(result)
    }

    /// GET /{scope}/devices/{id}/events
    pub async fn list_device_events(
        &self,
        device_id: &str,
        query: &EventQuery,
    ) -> Result<DeviceEventListResult, KapuaError> {
        let path = self.scoped_path(&format!("/devices/{device_id}/events"))?;
        self.request_json(Method::GET, &path, &query.to_params(), None, "list device events")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::KapuaConf;
    use crate::session::Credential;
    use kapua_devkit::{DeviceFixture, KapuaFixtures, StubBackend, StubResponse};
    use std::sync::Arc;
    use time::macros::datetime;

    async fn client(stub: &StubBackend) -> KapuaClient {
        let conf = KapuaConf { api_endpoint: stub.base_url(), ..KapuaConf::default() };
        let client = KapuaClient::new(&conf, Arc::new(SystemClock)).unwrap();
        client.credentials().store(Credential {
            access_token: "tok".into(),
            scope: "tenant".into(),
            ..Credential::default()
        });
        client
    }

    #[tokio::test]
    async fn test_list_devices_sends_paging_params() {
        let stub = StubBackend::start().await.unwrap();
        let list = KapuaFixtures::device_list(vec![DeviceFixture::new("dev-1").client_id("alpha").build()], Some(12));
        stub.on("GET", "/v1/tenant/devices", StubResponse::ok(list));
        let client = client(&stub).await;

        let query = DeviceQuery { limit: Some(5), offset: Some(10), ask_total_count: true };
        let result = client.list_devices(&query).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.total_count, Some(12));

        let req = stub.last_request("/v1/tenant/devices").unwrap();
        assert_eq!(req.query_param("limit").as_deref(), Some("5"));
        assert_eq!(req.query_param("offset").as_deref(), Some("10"));
        assert_eq!(req.query_param("askTotalCount").as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_list_device_events_params() {
        let stub = StubBackend::start().await.unwrap();
        let events = KapuaFixtures::event_list(vec![KapuaFixtures::event("INFO", "ACCEPTED", "ok", "2024-08-01T11:00:00Z")]);
        stub.on("GET", "/v1/tenant/devices/dev-1/events", StubResponse::ok(events));
        let client = client(&stub).await;

        let query = EventQuery {
            start_date: Some(datetime!(2024-08-01 10:00:00 UTC)),
            limit: Some(20),
            sort_param: Some("receivedOn"),
            sort_dir: Some(SortDir::Descending),
        };
        let result = client.list_device_events("dev-1", &query).await.unwrap();
        assert_eq!(result.items[0].response_code, "ACCEPTED");

        let req = stub.last_request("/v1/tenant/devices/dev-1/events").unwrap();
        assert_eq!(req.query_param("startDate").as_deref(), Some("2024-08-01T10%3A00%3A00Z"));
        assert_eq!(req.query_param("sortDir").as_deref(), Some("DESCENDING"));
        assert_eq!(req.query_param("sortParam").as_deref(), Some("receivedOn"));
    }

    #[test]
    fn test_empty_queries_produce_no_params() {
        assert!(DeviceQuery::default().to_params().is_empty());
        assert!(EventQuery::default().to_params().is_empty());
    }
}
