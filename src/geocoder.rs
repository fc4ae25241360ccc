//! Free-text address resolution through the Dadata suggestions API.
//!
//! Resolution never fails the caller: any error yields an [`AddressData`]
//! with every field unset.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SUGGEST_PATH: &str = "/suggestions/api/4_1/rs/suggest/address";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressData {
    pub country: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("request to geocoding API failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no suggestions for address")]
    NoMatch,
    #[error("suggestion has no coordinates")]
    MissingCoordinates,
    #[error("invalid coordinate value: {0}")]
    InvalidCoordinate(String),
}

#[derive(Serialize)]
struct SuggestRequest<'a> {
    query: &'a str,
    count: u8,
}

#[derive(Deserialize)]
struct SuggestResponse {
    suggestions: Vec<Suggestion>,
}

#[derive(Deserialize)]
struct Suggestion {
    data: SuggestionData,
}

#[derive(Deserialize)]
struct SuggestionData {
    geo_lat: Option<String>,
    geo_lon: Option<String>,
    country: Option<String>,
}

#[derive(Clone)]
pub enum Geocoder {
    Dadata(DadataClient),
    Disabled,
}

impl Geocoder {
    pub async fn resolve(&self, address: &str) -> AddressData {
        match self {
            Geocoder::Dadata(client) => match client.suggest(address).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Address resolution failed for {:?}: {}", address, e);
                    AddressData::default()
                }
            },
            Geocoder::Disabled => {
                debug!("Geocoder disabled, address {:?} left unresolved", address);
                AddressData::default()
            }
        }
    }
}

#[derive(Clone)]
pub struct DadataClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl DadataClient {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self, GeocodeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn suggest(&self, address: &str) -> Result<AddressData, GeocodeError> {
        let response: SuggestResponse = self
            .http
            .post(format!("{}{}", self.api_url, SUGGEST_PATH))
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Accept", "application/json")
            .json(&SuggestRequest { query: address, count: 1 })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let data = response
            .suggestions
            .into_iter()
            .next()
            .ok_or(GeocodeError::NoMatch)?
            .data;

        let lat = parse_coordinate(data.geo_lat)?;
        let lon = parse_coordinate(data.geo_lon)?;
        Ok(AddressData {
            country: data.country,
            lon: Some(lon),
            lat: Some(lat),
        })
    }
}

fn parse_coordinate(raw: Option<String>) -> Result<f64, GeocodeError> {
    let raw = raw.ok_or(GeocodeError::MissingCoordinates)?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| GeocodeError::InvalidCoordinate(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn geocoder_for(server: &mockito::ServerGuard) -> Geocoder {
        Geocoder::Dadata(DadataClient::new(&server.url(), "KEY").unwrap())
    }

    #[tokio::test]
    async fn resolves_first_suggestion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", SUGGEST_PATH)
            .match_header("authorization", "Token KEY")
            .match_body(Matcher::PartialJson(serde_json::json!({ "query": "Moscow, Tverskaya 1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"suggestions":[{"value":"Moscow","data":{"geo_lat":"55.757","geo_lon":"37.615","country":"Russia"}}]}"#,
            )
            .create_async()
            .await;

        let data = geocoder_for(&server).await.resolve("Moscow, Tverskaya 1").await;
        mock.assert_async().await;
        assert_eq!(
            data,
            AddressData { country: Some("Russia".into()), lon: Some(37.615), lat: Some(55.757) }
        );
    }

    #[tokio::test]
    async fn upstream_error_degrades_to_nulls() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", SUGGEST_PATH)
            .with_status(503)
            .create_async()
            .await;

        let data = geocoder_for(&server).await.resolve("anywhere").await;
        assert_eq!(data, AddressData::default());
    }

    #[tokio::test]
    async fn empty_suggestions_degrade_to_nulls() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", SUGGEST_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"suggestions":[]}"#)
            .create_async()
            .await;

        let data = geocoder_for(&server).await.resolve("nowhere").await;
        assert_eq!(data, AddressData::default());
    }

    #[tokio::test]
    async fn missing_coordinates_drop_country_too() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", SUGGEST_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"suggestions":[{"data":{"geo_lat":null,"geo_lon":null,"country":"Russia"}}]}"#)
            .create_async()
            .await;

        let data = geocoder_for(&server).await.resolve("Russia").await;
        assert_eq!(data, AddressData::default());
    }

    #[tokio::test]
    async fn disabled_geocoder_returns_nulls() {
        assert_eq!(Geocoder::Disabled.resolve("Moscow").await, AddressData::default());
    }
}
