//! GeoLite city web service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::Deserialize;

use super::IntelError;
use crate::db::GeoLocation;

/// Resolves an address to a city-level location.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// `Ok(None)` when the service has no record for `ip`.
    async fn city(&self, ip: &str) -> Result<Option<GeoLocation>, IntelError>;
}

#[derive(Debug, Default, Deserialize)]
struct Names {
    #[serde(default)]
    en: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Continent {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    names: Names,
}

#[derive(Debug, Default, Deserialize)]
struct Country {
    #[serde(default)]
    iso_code: Option<String>,
    #[serde(default)]
    names: Names,
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    accuracy_radius: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct Traits {
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    autonomous_system_number: Option<u32>,
    #[serde(default)]
    autonomous_system_organization: Option<String>,
    #[serde(default)]
    network: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CityResponse {
    #[serde(default)]
    traits: Traits,
    #[serde(default)]
    continent: Continent,
    #[serde(default)]
    country: Country,
    #[serde(default)]
    registered_country: Country,
    #[serde(default)]
    location: Location,
}

impl CityResponse {
    fn into_location(self, ip: &str) -> GeoLocation {
        GeoLocation {
            ip_address: self.traits.ip_address.unwrap_or_else(|| ip.to_string()),
            as_num: self.traits.autonomous_system_number,
            as_org: self.traits.autonomous_system_organization,
            network: self.traits.network,
            continent: self.continent.names.en,
            continent_code: self.continent.code,
            country: self.country.names.en,
            country_iso: self.country.iso_code,
            registered_country: self.registered_country.names.en,
            registered_country_iso: self.registered_country.iso_code,
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            time_zone: self.location.time_zone,
            accuracy_radius_km: self.location.accuracy_radius,
        }
    }
}

/// HTTPS client for the GeoLite city endpoint with basic auth.
#[derive(Debug, Clone)]
pub struct GeoLiteClient {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    license_key: String,
}

impl GeoLiteClient {
    pub fn new(base_url: &str, account_id: &str, license_key: &str, timeout: Duration) -> Result<Self, IntelError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| IntelError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            license_key: license_key.to_string(),
        })
    }
}

#[async_trait]
impl GeoLookup for GeoLiteClient {
    async fn city(&self, ip: &str) -> Result<Option<GeoLocation>, IntelError> {
        let response = self
            .http
            .get(format!("{}/geoip/v2.1/city/{}", self.base_url, ip))
            .basic_auth(&self.account_id, Some(&self.license_key))
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

        let body: CityResponse = response
            .json()
            .await
            .map_err(|e| IntelError::RemoteFetch(format!("invalid response body: {}", e)))?;
        Ok(Some(body.into_location(ip)))
    }
}
