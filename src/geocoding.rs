//! Address lookup
//!
//! `HttpGeocoder` queries a Nominatim-compatible search endpoint:
//! `GET {base_url}/search?q=<address>&format=json&limit=1`. Single shot,
//! no retries. `FixedGeocoder` answers every lookup with the same point
//! and is used when geocoding is disabled.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GeocodingConfig;

/// A point on the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// Address lookup port
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn coordinates(&self, address: &str) -> Result<Location, GeocodeError>;
}

/// Geocoder over HTTP
pub struct HttpGeocoder {
    client: Client,
    base_url: String,
}

/// One search hit. Coordinates arrive as strings.
#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

impl HttpGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(GeocodeError::Request)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn coordinates(&self, address: &str) -> Result<Location, GeocodeError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }

        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocodeError::Timeout
                } else if e.is_connect() {
                    GeocodeError::Unavailable
                } else {
                    GeocodeError::Request(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(GeocodeError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let hits: Vec<SearchHit> = response.json().await.map_err(GeocodeError::Request)?;
        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NoResults(address.to_string()))?;

        let parse = |value: &str| {
            value
                .parse::<f64>()
                .map_err(|_| GeocodeError::InvalidResponse(format!("bad coordinate '{}'", value)))
        };
        let location = Location {
            lat: parse(&hit.lat)?,
            lng: parse(&hit.lon)?,
        };

        tracing::debug!(address, lat = location.lat, lng = location.lng, "Address resolved");
        Ok(location)
    }
}

/// Answers every lookup with one location
#[derive(Debug, Clone, Copy)]
pub struct FixedGeocoder {
    pub location: Location,
}

impl Default for FixedGeocoder {
    /// Trondheim city centre
    fn default() -> Self {
        Self {
            location: Location {
                lat: 63.430515,
                lng: 10.395053,
            },
        }
    }
}

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn coordinates(&self, address: &str) -> Result<Location, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }
        Ok(self.location)
    }
}

// ============================================
// Errors
// ============================================

/// Errors that can occur during address lookup
#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("Geocoding service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("No location found for '{0}'")]
    NoResults(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Address is empty")]
    EmptyAddress,

    #[error("Request timed out")]
    Timeout,

    #[error("Geocoding service unavailable")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn spawn_search_server() -> String {
        async fn search(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
            match params.get("q").map(String::as_str) {
                Some("Korsvika") => Json(serde_json::json!([
                    {"lat": "63.4441", "lon": "10.4310", "display_name": "Korsvika"}
                ])),
                _ => Json(serde_json::json!([])),
            }
        }

        let app = Router::new().route("/search", get(search));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base_url: String) -> GeocodingConfig {
        GeocodingConfig {
            enabled: true,
            base_url,
            ..GeocodingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_http_geocoder_resolves_address() {
        let base = spawn_search_server().await;
        let geocoder = HttpGeocoder::new(&config(base)).unwrap();

        let location = geocoder.coordinates("Korsvika").await.unwrap();
        assert_eq!(location.lat, 63.4441);
        assert_eq!(location.lng, 10.4310);
    }

    #[tokio::test]
    async fn test_http_geocoder_no_results() {
        let base = spawn_search_server().await;
        let geocoder = HttpGeocoder::new(&config(base)).unwrap();

        let err = geocoder.coordinates("Atlantis").await.unwrap_err();
        assert!(matches!(err, GeocodeError::NoResults(ref a) if a == "Atlantis"));
    }

    #[tokio::test]
    async fn test_http_geocoder_status_error() {
        let base = spawn_search_server().await;
        let geocoder = HttpGeocoder::new(&config(format!("{}/missing", base))).unwrap();

        let err = geocoder.coordinates("Korsvika").await.unwrap_err();
        assert!(matches!(err, GeocodeError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fixed_geocoder() {
        let geocoder = FixedGeocoder::default();
        let location = geocoder.coordinates("Hvor som helst").await.unwrap();
        assert_eq!(location.lat, 63.430515);
        assert!(matches!(
            geocoder.coordinates("  ").await,
            Err(GeocodeError::EmptyAddress)
        ));
    }
}
