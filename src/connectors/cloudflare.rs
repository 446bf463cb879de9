use super::errors::ConnectorError;
use crate::configuration::CloudflareSettings;
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::Instrument;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_servers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsRecordType {
    A,
    Cname,
}

impl DnsRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Cname => "CNAME",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordId {
    id: String,
}

/// DNS/CDN provider operations needed to attach a custom domain.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn find_zone(&self, zone_name: &str) -> Result<Option<Zone>, ConnectorError>;

    /// Find the zone for `zone_name`, creating it when the account has none.
    async fn ensure_zone(&self, zone_name: &str) -> Result<Zone, ConnectorError>;

    /// Find a record by type and name, creating it when absent. Returns the record id.
    async fn ensure_record(
        &self,
        zone_id: &str,
        record_type: DnsRecordType,
        name: &str,
        content: &str,
    ) -> Result<String, ConnectorError>;

    async fn set_ssl_mode(&self, zone_id: &str, mode: &str) -> Result<(), ConnectorError>;
}

/// Cloudflare v4 API client.
pub struct CloudflareClient {
    base_url: String,
    account_id: String,
    api_token: String,
    http_client: reqwest::Client,
}

impl CloudflareClient {
    pub fn new(settings: &CloudflareSettings) -> Result<Self, ConnectorError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|err| ConnectorError::Internal(format!("HTTP client error: {}", err)))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            account_id: settings.account_id.clone(),
            api_token: settings.api_token.clone(),
            http_client,
        })
    }

    /// Send a request and unwrap the `{success, errors, result}` envelope.
    async fn send<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, ConnectorError>
    where
        T: DeserializeOwned,
    {
        let mut builder = self
            .http_client
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let span = tracing::info_span!("cloudflare_http_request", path, method = %method);
        let resp = builder.send().instrument(span).await?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| ConnectorError::HttpError(err.to_string()))?;

        if !status.is_success() {
            return Err(ConnectorError::from_status(status, text));
        }

        let envelope: Value = serde_json::from_str(&text)
            .map_err(|_| ConnectorError::InvalidResponse(text.clone()))?;
        if envelope.get("success").and_then(Value::as_bool) != Some(true) {
            let errors = envelope.get("errors").cloned().unwrap_or(Value::Null);
            return Err(ConnectorError::InvalidResponse(errors.to_string()));
        }

        let result = envelope.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|err| ConnectorError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    async fn find_zone(&self, zone_name: &str) -> Result<Option<Zone>, ConnectorError> {
        let zones: Vec<Zone> = self
            .send(Method::GET, "/zones", &[("name", zone_name)], None)
            .await?;
        Ok(zones.into_iter().next())
    }

    #[tracing::instrument(name = "Ensure Cloudflare zone", skip(self))]
    async fn ensure_zone(&self, zone_name: &str) -> Result<Zone, ConnectorError> {
        if let Some(zone) = self.find_zone(zone_name).await? {
            return Ok(zone);
        }

        tracing::info!(zone = zone_name, "Creating zone");
        self.send(
            Method::POST,
            "/zones",
            &[],
            Some(json!({
                "name": zone_name,
                "account": { "id": self.account_id },
                "type": "full",
            })),
        )
        .await
    }

    #[tracing::instrument(name = "Ensure Cloudflare DNS record", skip(self))]
    async fn ensure_record(
        &self,
        zone_id: &str,
        record_type: DnsRecordType,
        name: &str,
        content: &str,
    ) -> Result<String, ConnectorError> {
        let path = format!("/zones/{}/dns_records", zone_id);
        let existing: Vec<RecordId> = self
            .send(
                Method::GET,
                &path,
                &[("type", record_type.as_str()), ("name", name)],
                None,
            )
            .await?;
        if let Some(record) = existing.into_iter().next() {
            return Ok(record.id);
        }

        let created: RecordId = self
            .send(
                Method::POST,
                &path,
                &[],
                Some(json!({
                    "type": record_type.as_str(),
                    "name": name,
                    "content": content,
                    "ttl": 1,
                    "proxied": true,
                })),
            )
            .await?;
        Ok(created.id)
    }

    async fn set_ssl_mode(&self, zone_id: &str, mode: &str) -> Result<(), ConnectorError> {
        let _: Value = self
            .send(
                Method::PATCH,
                &format!("/zones/{}/settings/ssl", zone_id),
                &[],
                Some(json!({ "value": mode })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; hands out predictable ids. `existing` zones are found by name,
    /// any other zone is created on demand.
    #[derive(Default)]
    pub struct MockDnsProvider {
        pub calls: Mutex<Vec<String>>,
        pub existing: Vec<String>,
    }

    impl MockDnsProvider {
        pub fn with_zones(zones: &[&str]) -> Self {
            Self {
                existing: zones.iter().map(|z| z.to_string()).collect(),
                ..Default::default()
            }
        }

        fn zone(name: &str) -> Zone {
            Zone {
                id: "zone-1".into(),
                name: name.to_string(),
                name_servers: vec!["ada.ns.cloudflare.com".into(), "bob.ns.cloudflare.com".into()],
            }
        }
    }

    #[async_trait]
    impl DnsProvider for MockDnsProvider {
        async fn find_zone(&self, zone_name: &str) -> Result<Option<Zone>, ConnectorError> {
            self.calls.lock().unwrap().push(format!("find {}", zone_name));
            Ok(self
                .existing
                .iter()
                .any(|z| z == zone_name)
                .then(|| Self::zone(zone_name)))
        }

        async fn ensure_zone(&self, zone_name: &str) -> Result<Zone, ConnectorError> {
            self.calls.lock().unwrap().push(format!("zone {}", zone_name));
            Ok(Self::zone(zone_name))
        }

        async fn ensure_record(
            &self,
            zone_id: &str,
            record_type: DnsRecordType,
            name: &str,
            _content: &str,
        ) -> Result<String, ConnectorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {} {}", zone_id, record_type.as_str(), name));
            Ok(format!("{}-record", record_type.as_str().to_lowercase()))
        }

        async fn set_ssl_mode(&self, zone_id: &str, mode: &str) -> Result<(), ConnectorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("ssl {} {}", zone_id, mode));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CloudflareClient {
        CloudflareClient::new(&CloudflareSettings {
            base_url: server.uri(),
            account_id: "acc-1".into(),
            api_token: "token".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_existing_zone_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{"id": "z1", "name": "example.com", "name_servers": ["a.ns.cloudflare.com"]}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let zone = client_for(&server).ensure_zone("example.com").await.unwrap();
        assert_eq!(zone.id, "z1");
        assert_eq!(zone.name, "example.com");
        assert_eq!(zone.name_servers, vec!["a.ns.cloudflare.com".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_record_is_created() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "errors": [], "result": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "errors": [], "result": {"id": "rec-9"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server)
            .ensure_record("z1", DnsRecordType::A, "example.com", "203.0.113.7")
            .await
            .unwrap();
        assert_eq!(id, "rec-9");
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/zones/z1/settings/ssl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "errors": [{"code": 1007, "message": "Invalid value"}],
                "result": null
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .set_ssl_mode("z1", "bogus")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidResponse(msg) if msg.contains("1007")));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let err = client_for(&server).ensure_zone("example.com").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Unauthorized(_)));
    }
}
