//! REST client for the measurement platform.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{
    classify_failure, decode_each, AtlasError, Connector, CreatedMeasurement, Credential,
    MeasurementMeta, MeasurementRequest, ProbePage, RawPingResult, RawTracerouteResult,
    RemotePlatform,
};

/// Probes requested per inventory page.
const PROBE_PAGE_SIZE: u32 = 1000;

/// HTTPS client bound to a single API key.
#[derive(Debug, Clone)]
pub struct AtlasClient {
    http: reqwest::Client,
    base_url: String,
}

impl AtlasClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, AtlasError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Key {}", api_key))
            .map_err(|e| AtlasError::Client(format!("API key is not a valid header value: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AtlasError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AtlasError> {
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }

    async fn result_values(&self, job_id: u64) -> Result<Vec<Value>, AtlasError> {
        self.get_json(&self.url(&format!("/measurements/{}/results/", job_id)))
            .await
    }
}

/// Decode a successful reply, or classify a failed one.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AtlasError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_failure(status.as_u16(), &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AtlasError::RemoteFetch(format!("invalid response body: {}", e)))
}

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
}

#[async_trait]
impl RemotePlatform for AtlasClient {
    async fn probe_page(&self, cursor: Option<&str>) -> Result<ProbePage, AtlasError> {
        let url = match cursor {
            Some(next) if next.starts_with("http://") || next.starts_with("https://") => {
                next.to_string()
            }
            Some(next) => self.url(next),
            None => self.url(&format!("/probes/?status=1&page_size={}", PROBE_PAGE_SIZE)),
        };

        let page: PageBody = self.get_json(&url).await?;
        Ok(ProbePage {
            probes: decode_each(page.results, "probe"),
            next: page.next.filter(|n| !n.is_empty()),
        })
    }

    async fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> Result<CreatedMeasurement, AtlasError> {
        let response = self
            .http
            .post(self.url("/measurements/"))
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn results(&self, job_id: u64) -> Result<Vec<RawPingResult>, AtlasError> {
        let values = self.result_values(job_id).await?;
        Ok(decode_each(values, "ping result"))
    }

    async fn traceroute_results(&self, job_id: u64) -> Result<Vec<RawTracerouteResult>, AtlasError> {
        let values = self.result_values(job_id).await?;
        Ok(decode_each(values, "traceroute result"))
    }

    async fn measurement(&self, job_id: u64) -> Result<MeasurementMeta, AtlasError> {
        self.get_json(&self.url(&format!("/measurements/{}/", job_id)))
            .await
    }
}

/// Creates one [`AtlasClient`] per credential.
#[derive(Debug, Clone)]
pub struct AtlasConnector {
    base_url: String,
    timeout: Duration,
}

impl AtlasConnector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

impl Connector for AtlasConnector {
    type Platform = AtlasClient;

    fn connect(&self, credential: &Credential) -> Result<AtlasClient, AtlasError> {
        tracing::debug!("Connecting to {} with {}", self.base_url, credential.label());
        AtlasClient::new(&self.base_url, credential.secret(), self.timeout)
    }
}
