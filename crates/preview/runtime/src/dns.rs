//! DNS binders.
//!
//! [`HttpDnsBinder`] speaks a zone-records REST API (list by name, create,
//! delete by id; Cloudflare v4 shaped). Certificates are expected to be
//! wildcard certificates issued outside this system, so binding a name is all
//! that is needed for an environment to become addressable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::DnsBinder;

/// Zone API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpDnsConfig {
    pub api_base: String,
    pub zone_id: String,
    /// Zone the environment labels live under, e.g. `preview.example.com`.
    pub zone_name: String,
    /// Bearer token; usually supplied through the environment.
    pub api_token: String,
    /// `A` or `CNAME`.
    pub record_type: String,
    /// Record content: the host's address or canonical name.
    pub target: String,
    pub ttl: u32,
    pub proxied: bool,
    pub request_timeout_secs: u64,
}

impl Default for HttpDnsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            zone_id: String::new(),
            zone_name: String::new(),
            api_token: String::new(),
            record_type: "A".to_string(),
            target: String::new(),
            ttl: 300,
            proxied: false,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
}

#[derive(Debug, Serialize)]
struct NewRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

/// REST-API backed [`DnsBinder`].
#[derive(Debug, Clone)]
pub struct HttpDnsBinder {
    config: HttpDnsConfig,
    client: reqwest::Client,
}

impl HttpDnsBinder {
    pub fn new(config: HttpDnsConfig) -> Result<Self> {
        if config.zone_id.is_empty() || config.zone_name.is_empty() || config.target.is_empty() {
            return Err(RuntimeError::Dns(
                "zone_id, zone_name and target must be set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn records_url(&self) -> String {
        format!(
            "{}/zones/{}/dns_records",
            self.config.api_base.trim_end_matches('/'),
            self.config.zone_id
        )
    }

    async fn find_records(&self, fqdn: &str) -> Result<Vec<DnsRecord>> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.config.api_token)
            .query(&[("name", fqdn)])
            .send()
            .await?;
        let envelope: ApiEnvelope<Vec<DnsRecord>> = response.json().await?;
        check(&envelope)?;
        Ok(envelope.result.unwrap_or_default())
    }
}

fn check<T>(envelope: &ApiEnvelope<T>) -> Result<()> {
    if envelope.success {
        return Ok(());
    }
    let detail = envelope
        .errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(RuntimeError::Dns(detail))
}

#[async_trait]
impl DnsBinder for HttpDnsBinder {
    async fn create_record(&self, label: &str) -> Result<()> {
        let fqdn = self.host_name(label);
        if !self.find_records(&fqdn).await?.is_empty() {
            debug!(%fqdn, "record already present");
            return Ok(());
        }
        let body = NewRecord {
            record_type: &self.config.record_type,
            name: &fqdn,
            content: &self.config.target,
            ttl: self.config.ttl,
            proxied: self.config.proxied,
        };
        let response = self
            .client
            .post(self.records_url())
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await?;
        let envelope: ApiEnvelope<serde_json::Value> = response.json().await?;
        check(&envelope)?;
        info!(%fqdn, "DNS record created");
        Ok(())
    }

    async fn delete_record(&self, label: &str) -> Result<()> {
        let fqdn = self.host_name(label);
        for record in self.find_records(&fqdn).await? {
            let response = self
                .client
                .delete(format!("{}/{}", self.records_url(), record.id))
                .bearer_auth(&self.config.api_token)
                .send()
                .await?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            let envelope: ApiEnvelope<serde_json::Value> = response.json().await?;
            check(&envelope)?;
            info!(%fqdn, id = %record.id, "DNS record deleted");
        }
        Ok(())
    }

    async fn record_exists(&self, label: &str) -> Result<bool> {
        Ok(!self.find_records(&self.host_name(label)).await?.is_empty())
    }

    fn host_name(&self, label: &str) -> String {
        format!("{label}.{}", self.config.zone_name)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Binder used when DNS management is disabled.
#[derive(Debug, Clone, Default)]
pub struct NoopDnsBinder {
    zone_name: String,
}

impl NoopDnsBinder {
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
        }
    }
}

#[async_trait]
impl DnsBinder for NoopDnsBinder {
    async fn create_record(&self, _label: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_record(&self, _label: &str) -> Result<()> {
        Ok(())
    }

    async fn record_exists(&self, _label: &str) -> Result<bool> {
        Ok(true)
    }

    fn host_name(&self, label: &str) -> String {
        if self.zone_name.is_empty() {
            label.to_string()
        } else {
            format!("{label}.{}", self.zone_name)
        }
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_zone_settings() {
        assert!(HttpDnsBinder::new(HttpDnsConfig::default()).is_err());

        let binder = HttpDnsBinder::new(HttpDnsConfig {
            zone_id: "z".into(),
            zone_name: "preview.example.com".into(),
            target: "203.0.113.7".into(),
            api_base: "https://dns.example.com/v4/".into(),
            ..HttpDnsConfig::default()
        })
        .unwrap();
        assert_eq!(binder.host_name("pr-1"), "pr-1.preview.example.com");
        assert_eq!(
            binder.records_url(),
            "https://dns.example.com/v4/zones/z/dns_records"
        );
    }

    #[test]
    fn api_errors_are_reported() {
        let envelope: ApiEnvelope<Vec<DnsRecord>> = serde_json::from_str(
            r#"{"success":false,"errors":[{"code":9109,"message":"Invalid access token"}],"result":null}"#,
        )
        .unwrap();
        let err = check(&envelope).unwrap_err();
        assert!(err.to_string().contains("9109: Invalid access token"));
    }

    #[tokio::test]
    async fn noop_binder_never_fails() {
        let binder = NoopDnsBinder::new("");
        binder.create_record("pr-1").await.unwrap();
        binder.delete_record("pr-1").await.unwrap();
        assert_eq!(binder.host_name("pr-1"), "pr-1");
    }
}
