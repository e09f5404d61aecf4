//! # OV API Departures Client
//!
//! Wire types and HTTP client for the OV API `tpc/{codes}/departures`
//! endpoint, which returns live arrival predictions per timing point (stop).
//!
//! ## Snapshot Shape
//! ```json
//! {
//!   "32009203": {
//!     "Stop": { "TimingPointCode": "32009203", "TimingPointName": "..." },
//!     "Passes": {
//!       "HTM_20240616_2_1234_0": { "LinePlanningNumber": "2", ... }
//!     }
//!   }
//! }
//! ```
//!
//! Pass records stay as raw JSON values until a board extracts them, so one
//! malformed pass only costs that pass rather than the whole snapshot.
//! `serde_json`'s `preserve_order` keeps passes in document order.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

const USER_AGENT: &str = "AWTRIX 3 Departure Board";

/// One full response: stop code → departures at that stop.
pub type Snapshot = HashMap<String, StopDepartures>;

/// Errors while fetching a snapshot. Any of these is fatal to the feed.
#[derive(Error, Debug)]
pub enum FeedError {
    /// HTTP request failed (network, server, or protocol error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Body was not a departures document
    #[error("undecodable departures response (HTTP {status}): {source}")]
    Decode {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    /// Configured base URL cannot carry a path
    #[error("invalid API base URL {0:?}")]
    InvalidUrl(String),

    /// A fetch task panicked or was cancelled
    #[error("fetch task failed: {0}")]
    Task(String),
}

/// Departures at a single stop.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StopDepartures {
    #[serde(rename = "Stop", default)]
    pub stop: Option<Stop>,
    /// Pass id → raw pass record
    #[serde(rename = "Passes", default)]
    pub passes: Map<String, Value>,
}

/// Stop metadata; informational only.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Stop {
    pub timing_point_code: String,
    pub timing_point_name: String,
    pub timing_point_town: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One predicted arrival of one line at one stop, as reported by the API.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPass {
    pub timing_point_code: String,
    pub line_planning_number: String,
    pub expected_arrival_time: String,
    pub target_arrival_time: String,
    #[serde(default)]
    pub line_public_number: Option<String>,
    #[serde(rename = "DestinationName50", default)]
    pub destination_name: Option<String>,
    #[serde(default)]
    pub transport_type: Option<String>,
    #[serde(default)]
    pub journey_number: Option<u64>,
    #[serde(default)]
    pub trip_stop_status: Option<String>,
}

/// Anything that can produce a departures snapshot for a set of stop codes.
pub trait DepartureSource: Send + Sync + 'static {
    fn fetch(
        &self,
        stop_codes: &[String],
    ) -> impl Future<Output = Result<Snapshot, FeedError>> + Send;
}

/// reqwest-backed client for the OV API.
pub struct OvApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl OvApiClient {
    /// Build a client for `base_url`, e.g. `http://v0.ovapi.nl`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FeedError> {
        let base_url = Url::parse(base_url).map_err(|_| FeedError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(FeedError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(OvApiClient { http, base_url })
    }

    /// URL of the departures document for `stop_codes`.
    pub fn departures_url(&self, stop_codes: &[String]) -> Result<Url, FeedError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FeedError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("tpc")
            .push(&stop_codes.join(","))
            .push("departures");
        Ok(url)
    }
}

impl DepartureSource for OvApiClient {
    async fn fetch(&self, stop_codes: &[String]) -> Result<Snapshot, FeedError> {
        if stop_codes.is_empty() {
            return Ok(Snapshot::new());
        }

        let started = Instant::now();
        let url = self.departures_url(stop_codes)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let snapshot = serde_json::from_str::<Snapshot>(&body).map_err(|source| {
            log::warn!("departures response {status} did not decode: {body}");
            FeedError::Decode { status, source }
        })?;

        log::debug!(
            "fetched departures for {} stops in {:?}",
            stop_codes.len(),
            started.elapsed()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "32009203": {
            "Stop": { "TimingPointCode": "32009203", "TimingPointName": "Elandstraat" },
            "Passes": {
                "b": {
                    "TimingPointCode": "32009203",
                    "LinePlanningNumber": "3",
                    "ExpectedArrivalTime": "2024-06-16T12:10:00",
                    "TargetArrivalTime": "2024-06-16T12:09:00",
                    "DestinationName50": "Centraal Station",
                    "JourneyNumber": 1234
                },
                "a": { "LinePlanningNumber": "2" }
            },
            "GeneralMessages": {}
        }
    }"#;

    #[test]
    fn snapshot_keeps_pass_document_order() {
        let snapshot: Snapshot = serde_json::from_str(SNAPSHOT).unwrap();
        let stop = &snapshot["32009203"];
        let ids: Vec<&String> = stop.passes.keys().collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(stop.stop.as_ref().unwrap().timing_point_name, "Elandstraat");
    }

    #[test]
    fn raw_pass_decodes_known_fields() {
        let snapshot: Snapshot = serde_json::from_str(SNAPSHOT).unwrap();
        let pass = RawPass::deserialize(&snapshot["32009203"].passes["b"]).unwrap();
        assert_eq!(pass.line_planning_number, "3");
        assert_eq!(pass.destination_name.as_deref(), Some("Centraal Station"));
        assert_eq!(pass.journey_number, Some(1234));

        // Missing timestamps make the record unusable
        assert!(RawPass::deserialize(&snapshot["32009203"].passes["a"]).is_err());
    }

    #[test]
    fn departures_url_joins_codes() {
        let client = OvApiClient::new("http://v0.ovapi.nl/", Duration::from_secs(5)).unwrap();
        let url = client
            .departures_url(&["32009203".to_string(), "32009204".to_string()])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://v0.ovapi.nl/tpc/32009203,32009204/departures"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            OvApiClient::new("not a url", Duration::from_secs(5)),
            Err(FeedError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn empty_code_list_skips_the_network() {
        // Unroutable address: any request would fail
        let client = OvApiClient::new("http://127.0.0.1:9/", Duration::from_millis(50)).unwrap();
        let snapshot = client.fetch(&[]).await.unwrap();
        assert!(snapshot.is_empty());
    }
}
