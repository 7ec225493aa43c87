//! HTTP roster source — `GET {base_url}{path}` with an `api-key` header.

use async_trait::async_trait;
use std::time::Duration;

use remindclaw_core::config::RosterConfig;
use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::RosterSource;
use remindclaw_core::types::RawEnrollee;

pub struct HttpRoster {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpRoster {
    pub fn new(config: &RosterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| RemindClawError::Roster(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.path
            ),
            api_key: config.api_key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// The provider answers with a bare array, or wraps it in `data`/`enrolled`.
fn extract_records(body: serde_json::Value) -> Result<Vec<RawEnrollee>> {
    let list = match body {
        serde_json::Value::Array(items) => serde_json::Value::Array(items),
        serde_json::Value::Object(mut map) => map
            .remove("data")
            .or_else(|| map.remove("enrolled"))
            .ok_or_else(|| RemindClawError::Roster("response has no enrollee list".into()))?,
        other => {
            return Err(RemindClawError::Roster(format!(
                "unexpected response shape: {other}"
            )));
        }
    };
    serde_json::from_value(list).map_err(|e| RemindClawError::Roster(format!("bad enrollee list: {e}")))
}

#[async_trait]
impl RosterSource for HttpRoster {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_enrollees(&self) -> Result<Vec<RawEnrollee>> {
        tracing::debug!("📥 Fetching roster from {}", self.url);
        let resp = self
            .client
            .get(&self.url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| RemindClawError::Roster(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RemindClawError::Roster(format!("HTTP {status}: {text}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RemindClawError::Roster(format!("invalid JSON: {e}")))?;
        let records = extract_records(body)?;
        tracing::info!("📋 Roster fetched: {} enrollees", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> RosterConfig {
        RosterConfig {
            base_url: server.uri(),
            api_key: "secret".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_sends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enrolled"))
            .and(header("api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "status": "Ativo", "cel": "11987654321", "registrationCode": 7 },
                { "status": "Graduated" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let roster = HttpRoster::new(&config_for(&server)).unwrap();
        let records = roster.fetch_enrollees().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].registration_code.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_fetch_wrapped_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enrolled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "status": "Ativo" }]
            })))
            .mount(&server)
            .await;

        let roster = HttpRoster::new(&config_for(&server)).unwrap();
        assert_eq!(roster.fetch_enrollees().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_status_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let roster = HttpRoster::new(&config_for(&server)).unwrap();
        let err = roster.fetch_enrollees().await.unwrap_err();
        assert!(matches!(err, RemindClawError::Roster(msg) if msg.contains("401")));
    }

    #[test]
    fn test_extract_rejects_scalars() {
        assert!(extract_records(serde_json::json!("nope")).is_err());
        assert!(extract_records(serde_json::json!({ "other": [] })).is_err());
    }
}
