//! Resilient proxy in front of the processing microservice.
//!
//! Every call attaches the brokered bearer token. The aggregation
//! endpoint streams NDJSON chunks which are merged into one result;
//! one end-to-end timeout covers the whole stream and the entire
//! stream is retried, never individual chunks. Point lookups and
//! exports are single-shot calls under the same timeout policy.

pub mod types;

use crate::{Error, broker::TokenBroker};
use futures_util::StreamExt;
use reqwest::{Client, Response, header::ACCEPT};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{Instrument, debug, info_span, instrument, warn};
use types::{
    ExportPayload, ExportRequest, ProcessingRequest, ProcessingResponse,
    RadioDevicesAtTimeRequest, RadioDevicesAtTimeResponse, ThermalmapAtTimeRequest,
    ThermalmapAtTimeResponse,
};

const NDJSON: &str = "application/x-ndjson";

/// Timeout/retry knobs shared by all proxy calls.
#[derive(Debug, Clone, Copy)]
pub struct ProxyPolicy {
    /// End-to-end budget for one attempt, stream consumption included.
    pub timeout: Duration,
    /// Full-stream retries after the first attempt.
    pub stream_retries: u32,
    /// Base for the exponential retry backoff.
    pub backoff_base: Duration,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            stream_retries: 2,
            backoff_base: Duration::from_millis(100),
        }
    }
}

#[derive(Clone)]
pub struct ProcessingProxy {
    client: Client,
    broker: TokenBroker,
    base_url: String,
    policy: ProxyPolicy,
}

impl ProcessingProxy {
    #[must_use]
    pub fn new(client: Client, broker: TokenBroker, base_url: String) -> Self {
        Self {
            client,
            broker,
            base_url,
            policy: ProxyPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ProxyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Streams `/process/batched_stream` and merges all chunks.
    ///
    /// # Errors
    /// `Error::AuthRequired` without a current token, `Error::NoData`
    /// if the stream closes without a chunk, `Error::Timeout` past the
    /// end-to-end budget, `Error::UpstreamClient`/`Error::UpstreamServer`
    /// mirroring downstream statuses. Only 5xx and transport causes are
    /// retried, and always the whole stream.
    #[instrument(skip(self, request))]
    pub async fn aggregate(
        &self,
        request: &ProcessingRequest,
        principal: &str,
    ) -> Result<ProcessingResponse, Error> {
        request.validate()?;
        let token = self.require_token(principal)?;

        let mut attempt: u32 = 0;
        loop {
            let result = match timeout(self.policy.timeout, self.stream_once(request, &token)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };

            match result {
                Ok(merged) => return Ok(merged),
                Err(error) if error.is_retriable() && attempt < self.policy.stream_retries => {
                    attempt += 1;
                    let backoff = self.policy.backoff_base * 2u32.pow(attempt - 1);
                    warn!(%error, attempt, "Retrying aggregation stream in {:?}", backoff);
                    sleep(backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn stream_once(
        &self,
        request: &ProcessingRequest,
        token: &str,
    ) -> Result<ProcessingResponse, Error> {
        let url = self.endpoint("/process/batched_stream");
        let span = info_span!("processing.stream", http.method = "POST", url = %url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(ACCEPT, NDJSON)
            .json(request)
            .send()
            .instrument(span)
            .await?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut merged: Option<ProcessingResponse> = None;
        let mut chunks = 0usize;

        while let Some(piece) = stream.next().await {
            buffer.extend_from_slice(&piece?);
            // NDJSON: one JSON object per line.
            while let Some(pos) = buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                merge_line(&line, &mut merged, &mut chunks)?;
            }
        }
        if !buffer.is_empty() {
            merge_line(&buffer, &mut merged, &mut chunks)?;
        }

        debug!(chunks, "Aggregation stream complete");
        merged.ok_or(Error::NoData)
    }

    /// Single-shot lookup of `/radio/devices_at_time`.
    ///
    /// # Errors
    /// Same policy as [`Self::aggregate`], minus `Error::NoData`.
    #[instrument(skip(self, request))]
    pub async fn radio_devices_at_time(
        &self,
        request: &RadioDevicesAtTimeRequest,
        principal: &str,
    ) -> Result<RadioDevicesAtTimeResponse, Error> {
        request.validate()?;
        self.single_shot("/radio/devices_at_time", request, principal)
            .await
    }

    /// Single-shot lookup of `/thermalmap/reading_at_time`.
    ///
    /// # Errors
    /// Same policy as [`Self::aggregate`], minus `Error::NoData`.
    #[instrument(skip(self, request))]
    pub async fn thermalmap_reading_at_time(
        &self,
        request: &ThermalmapAtTimeRequest,
        principal: &str,
    ) -> Result<ThermalmapAtTimeResponse, Error> {
        request.validate()?;
        self.single_shot("/thermalmap/reading_at_time", request, principal)
            .await
    }

    async fn single_shot<Req, Resp>(
        &self,
        path: &str,
        request: &Req,
        principal: &str,
    ) -> Result<Resp, Error>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let token = self.require_token(principal)?;

        let mut attempt: u32 = 0;
        loop {
            let result = match timeout(self.policy.timeout, self.call_once(path, request, &token))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retriable() && attempt < self.policy.stream_retries => {
                    attempt += 1;
                    let backoff = self.policy.backoff_base * 2u32.pow(attempt - 1);
                    warn!(%error, attempt, "Retrying lookup in {:?}", backoff);
                    sleep(backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn call_once<Req, Resp>(&self, path: &str, request: &Req, token: &str) -> Result<Resp, Error>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let span = info_span!("processing.lookup", http.method = "POST", url = %url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .instrument(span)
            .await?;
        let response = check_status(response).await?;

        response.json().await.map_err(|error| {
            if error.is_decode() {
                Error::Validation("malformed payload from processing service".to_string())
            } else {
                error.into()
            }
        })
    }

    /// Single-shot `/export` returning raw bytes.
    ///
    /// No application-level retry beyond one transport reconnection.
    ///
    /// # Errors
    /// `Error::AuthRequired` without a token, `Error::NoData` on an
    /// empty body, upstream/timeout errors otherwise.
    #[instrument(skip(self, request))]
    pub async fn export(
        &self,
        request: &ExportRequest,
        principal: &str,
    ) -> Result<ExportPayload, Error> {
        request.validate()?;
        let token = self.require_token(principal)?;

        let result = match timeout(self.policy.timeout, self.export_once(request, &token)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        match result {
            // A transport fault carries no HTTP status; reconnect once.
            Err(Error::UpstreamServer { status: None, .. }) => {
                debug!("Transport failure during export, reconnecting");
                match timeout(self.policy.timeout, self.export_once(request, &token)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout),
                }
            }
            other => other,
        }
    }

    async fn export_once(
        &self,
        request: &ExportRequest,
        token: &str,
    ) -> Result<ExportPayload, Error> {
        let url = self.endpoint("/export");
        let span = info_span!("processing.export", http.method = "POST", url = %url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(ACCEPT, request.accept_content_type())
            .json(request)
            .send()
            .instrument(span)
            .await?;
        let response = check_status(response).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_else(|| request.accept_content_type())
            .to_string();
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::NoData);
        }

        Ok(ExportPayload {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    fn require_token(&self, principal: &str) -> Result<String, Error> {
        self.broker
            .current_token(principal)?
            .ok_or(Error::AuthRequired)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

async fn check_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(Error::UpstreamClient {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(Error::UpstreamServer {
            status: Some(status.as_u16()),
            body,
        })
    }
}

fn merge_line(
    line: &[u8],
    merged: &mut Option<ProcessingResponse>,
    chunks: &mut usize,
) -> Result<(), Error> {
    let line = trim_ascii(line);
    if line.is_empty() {
        return Ok(());
    }

    let chunk: ProcessingResponse = serde_json::from_slice(line)
        .map_err(|_| Error::Validation("malformed stream chunk".to_string()))?;
    *chunks += 1;

    match merged {
        // The first chunk carries the shared metadata for the call.
        None => *merged = Some(chunk),
        Some(result) => {
            for (label, series) in chunk.aggregated_results {
                if result.aggregated_results.contains_key(&label) {
                    debug!(%label, "Duplicate bucket label, last chunk wins");
                }
                result.aggregated_results.insert(label, series);
            }
        }
    }
    Ok(())
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}
