//! Measurement platform capability.
//!
//! The orchestrator only talks to the platform through [`RemotePlatform`];
//! [`AtlasClient`] is the REST implementation and [`Connector`] builds one
//! client per API credential so that credentials can be rotated.

mod client;
mod models;
mod quota;

pub use client::*;
pub use models::*;
pub use quota::*;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Measurement platform error types.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// Transport failure or undecodable response.
    #[error("remote fetch failed: {0}")]
    RemoteFetch(String),
    /// The account's request or credit quota is spent.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Any other rejection by the platform.
    #[error("request rejected with status {status}: {body}")]
    Request { status: u16, body: String },
    #[error("invalid client configuration: {0}")]
    Client(String),
}

impl AtlasError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, AtlasError::QuotaExceeded(_))
    }
}

impl From<reqwest::Error> for AtlasError {
    fn from(e: reqwest::Error) -> Self {
        AtlasError::RemoteFetch(e.to_string())
    }
}

/// Operations the orchestrator needs from the measurement platform.
#[async_trait]
pub trait RemotePlatform: Send + Sync {
    /// Fetch one page of the probe inventory. `None` requests the first page.
    async fn probe_page(&self, cursor: Option<&str>) -> Result<ProbePage, AtlasError>;

    /// Submit a measurement and return the platform's reply.
    async fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> Result<CreatedMeasurement, AtlasError>;

    /// Results for a job. An empty list means none are available yet.
    async fn results(&self, job_id: u64) -> Result<Vec<RawPingResult>, AtlasError>;

    /// Traceroute results for a job, from the same endpoint as `results`.
    async fn traceroute_results(&self, job_id: u64) -> Result<Vec<RawTracerouteResult>, AtlasError>;

    /// Metadata for a job.
    async fn measurement(&self, job_id: u64) -> Result<MeasurementMeta, AtlasError>;
}

/// An API key with a printable label that never reveals the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    label: String,
    secret: String,
}

impl Credential {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: secret.into(),
        }
    }

    /// Label credentials `key#0`, `key#1`, ... in configuration order.
    pub fn from_keys(keys: &[String]) -> Vec<Self> {
        keys.iter()
            .enumerate()
            .map(|(i, key)| Self::new(format!("key#{}", i), key.clone()))
            .collect()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Builds a platform connection bound to one credential.
pub trait Connector: Send + Sync {
    type Platform: RemotePlatform;

    fn connect(&self, credential: &Credential) -> Result<Self::Platform, AtlasError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("key#0", "s3cr3t");
        let printed = format!("{:?}", cred);
        assert!(printed.contains("key#0"));
        assert!(!printed.contains("s3cr3t"));
    }

    #[test]
    fn test_credentials_from_keys() {
        let creds = Credential::from_keys(&["a".to_string(), "b".to_string()]);
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[1].label(), "key#1");
        assert_eq!(creds[1].secret(), "b");
    }
}
