//! IP intelligence capability used to enrich target addresses and
//! traceroute hops.

mod geolite;

pub use geolite::*;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::db::IpDetails;

/// IP intelligence error types.
#[derive(Error, Debug)]
pub enum IntelError {
    #[error("lookup failed: {0}")]
    RemoteFetch(String),
    #[error("lookup rejected with status {status}: {body}")]
    Request { status: u16, body: String },
    #[error("invalid client configuration: {0}")]
    Client(String),
}

impl From<reqwest::Error> for IntelError {
    fn from(e: reqwest::Error) -> Self {
        IntelError::RemoteFetch(e.to_string())
    }
}

/// Looks up ownership and location for an address.
#[async_trait]
pub trait IpIntelligence: Send + Sync {
    /// `Ok(None)` when the provider has nothing for `ip`.
    async fn lookup(&self, ip: &str) -> Result<Option<IpDetails>, IntelError>;
}

#[derive(Debug, Default, Deserialize)]
struct LiteResponse {
    #[serde(default)]
    asn: Option<String>,
    #[serde(default)]
    as_name: Option<String>,
    #[serde(default)]
    as_domain: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    continent: Option<String>,
    #[serde(default)]
    continent_code: Option<String>,
}

impl LiteResponse {
    fn into_details(self, ip: &str) -> Option<IpDetails> {
        if self.asn.is_none() && self.country_code.is_none() {
            return None;
        }
        Some(IpDetails {
            ip_address: ip.to_string(),
            asn: self.asn,
            as_name: self.as_name,
            as_domain: self.as_domain,
            country_code: self.country_code,
            country: self.country,
            continent: self.continent,
            continent_code: self.continent_code,
        })
    }
}

/// HTTPS client for the ipinfo "lite" API with bearer auth.
#[derive(Debug, Clone)]
pub struct IpInfoClient {
    http: reqwest::Client,
    base_url: String,
}

impl IpInfoClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, IntelError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| IntelError::Client(format!("token is not a valid header value: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| IntelError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IpIntelligence for IpInfoClient {
    async fn lookup(&self, ip: &str) -> Result<Option<IpDetails>, IntelError> {
        let response = self
            .http
            .get(format!("{}/lite/{}", self.base_url, ip))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IntelError::Request {
                status: status.as_u16(),
                body,
            });
        }

        let body: LiteResponse = response
            .json()
            .await
            .map_err(|e| IntelError::RemoteFetch(format!("invalid response body: {}", e)))?;
        Ok(body.into_details(ip))
    }
}
