//! Typed contracts for the downstream processing endpoints.
//!
//! Parsing is lenient by policy: unknown fields are ignored and
//! missing metadata defaults to zero, so a downstream field addition
//! never breaks the proxy. Requests are validated locally against the
//! patterns the downstream enforces, before any network call.

use crate::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

fn matches_pattern(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|re| re.is_match(value))
}

fn valid_timestamp(value: &str) -> bool {
    // ISO 8601 / RFC 3339, e.g. 2022-03-10T13:53:00Z
    matches_pattern(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}", value)
}

/// Aggregation request forwarded to `/process/batched_stream`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingRequest {
    /// Facility identifier (uoa/istic/museum)
    pub facility: String,
    /// Start of the time range, ISO 8601
    pub start: String,
    /// End of the time range, ISO 8601
    pub end: String,
    pub sensor_type: String,
    pub agent_serial: Vec<String>,
    /// minute, hourly, daily, monthly or yearly
    pub aggregation_level: String,
    /// Statistical metric, e.g. average, max, skewness
    pub metric: String,
}

impl ProcessingRequest {
    /// # Errors
    /// Returns `Error::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if !matches_pattern(r"^(uoa|istic|museum)$", &self.facility) {
            return Err(Error::Validation(
                "facility must be one of uoa, istic, museum".to_string(),
            ));
        }
        if !valid_timestamp(&self.start) || !valid_timestamp(&self.end) {
            return Err(Error::Validation(
                "start and end must be ISO 8601 timestamps".to_string(),
            ));
        }
        if !matches_pattern(
            r"^(humidity|luminance|microphone|motion|presence|radio|temperature|thermalmap|thermography)$",
            &self.sensor_type,
        ) {
            return Err(Error::Validation("unknown sensor type".to_string()));
        }
        if self.agent_serial.is_empty() {
            return Err(Error::Validation(
                "at least one agent serial must be provided".to_string(),
            ));
        }
        if !matches_pattern(
            r"^(minute|hourly|daily|monthly|yearly)$",
            &self.aggregation_level,
        ) {
            return Err(Error::Validation("unknown aggregation level".to_string()));
        }
        if !matches_pattern(
            r"^(average|sum|median|min|max|skewness|event_count|activity_percent|event_duration_avg|event_duration_max)$",
            &self.metric,
        ) {
            return Err(Error::Validation("unknown metric".to_string()));
        }
        Ok(())
    }
}

/// One aggregated value in a time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregatedPoint {
    pub time: String,
    pub value: f64,
}

/// Processing metadata shared by every chunk of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Meta {
    #[serde(default)]
    pub total_buckets: u64,
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub raw_hits: u64,
    #[serde(default)]
    pub empty_buckets: u64,
}

/// One stream chunk, and also the merged end result: the merge is the
/// union of every chunk's `aggregated_results` under the first chunk's
/// shared metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProcessingResponse {
    #[serde(default)]
    pub facility: String,
    #[serde(default)]
    pub agent_serial: Vec<String>,
    #[serde(default)]
    pub sensor_type: String,
    #[serde(default)]
    pub aggregation_level: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub aggregated_results: BTreeMap<String, Vec<AggregatedPoint>>,
    #[serde(default)]
    pub meta: Meta,
}

/// Point-lookup request for `/radio/devices_at_time`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RadioDevicesAtTimeRequest {
    pub facility: String,
    pub agent_serial: String,
    pub timestamp: String,
}

impl RadioDevicesAtTimeRequest {
    /// # Errors
    /// Returns `Error::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        validate_lookup(&self.facility, &self.agent_serial, &self.timestamp)
    }
}

/// Devices observed by a radio agent at one instant. Device entries
/// are passed through verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RadioDevicesAtTimeResponse {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub devices: Vec<serde_json::Value>,
}

/// Point-lookup request for `/thermalmap/reading_at_time`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThermalmapAtTimeRequest {
    pub facility: String,
    pub agent_serial: String,
    pub timestamp: String,
}

impl ThermalmapAtTimeRequest {
    /// # Errors
    /// Returns `Error::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        validate_lookup(&self.facility, &self.agent_serial, &self.timestamp)
    }
}

/// A thermal camera frame at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ThermalmapAtTimeResponse {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub reading: Vec<Vec<f64>>,
}

fn validate_lookup(facility: &str, agent_serial: &str, timestamp: &str) -> Result<(), Error> {
    if !matches_pattern(r"^(uoa|istic|museum)$", facility) {
        return Err(Error::Validation(
            "facility must be one of uoa, istic, museum".to_string(),
        ));
    }
    if agent_serial.is_empty() {
        return Err(Error::Validation("agent serial must not be empty".to_string()));
    }
    if !valid_timestamp(timestamp) {
        return Err(Error::Validation(
            "timestamp must be an ISO 8601 timestamp".to_string(),
        ));
    }
    Ok(())
}

/// Export request for `/export`; the response is raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExportRequest {
    pub facility: String,
    pub sensor_type: String,
    pub agent_serial: Vec<String>,
    pub start: String,
    pub end: String,
    /// csv or json
    #[serde(default = "default_export_format")]
    pub format: String,
}

fn default_export_format() -> String {
    "json".to_string()
}

impl ExportRequest {
    /// # Errors
    /// Returns `Error::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if !matches_pattern(r"^(uoa|istic|museum)$", &self.facility) {
            return Err(Error::Validation(
                "facility must be one of uoa, istic, museum".to_string(),
            ));
        }
        if self.agent_serial.is_empty() {
            return Err(Error::Validation(
                "at least one agent serial must be provided".to_string(),
            ));
        }
        if !valid_timestamp(&self.start) || !valid_timestamp(&self.end) {
            return Err(Error::Validation(
                "start and end must be ISO 8601 timestamps".to_string(),
            ));
        }
        if !matches_pattern(r"^(csv|json)$", &self.format) {
            return Err(Error::Validation(
                "format must be csv or json".to_string(),
            ));
        }
        Ok(())
    }

    /// Content type requested from downstream for this format.
    #[must_use]
    pub fn accept_content_type(&self) -> &'static str {
        if self.format == "csv" {
            "text/csv"
        } else {
            "application/json"
        }
    }
}

/// Raw export bytes plus the content type they were served with.
#[derive(Debug, Clone)]
pub struct ExportPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}
