//! Forwarding handlers for the processing endpoints.

use super::{ApiError, require_principal};
use crate::{
    Error,
    api::AppState,
    proxy::types::{
        ExportRequest, ProcessingRequest, ProcessingResponse, RadioDevicesAtTimeRequest,
        RadioDevicesAtTimeResponse, ThermalmapAtTimeRequest, ThermalmapAtTimeResponse,
    },
};
use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/v1/process",
    request_body = ProcessingRequest,
    responses(
        (status = 200, description = "Merged aggregation result", body = ProcessingResponse),
        (status = 401, description = "No current token for the principal"),
        (status = 404, description = "Stream closed without data"),
        (status = 422, description = "Request failed local validation"),
        (status = 502, description = "Downstream failure after retries"),
        (status = 504, description = "Stream exceeded the end-to-end budget")
    ),
    tag = "processing"
)]
#[instrument(skip(state, headers, payload))]
pub async fn process(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Json<ProcessingRequest>,
) -> Result<Json<ProcessingResponse>, ApiError> {
    let principal = require_principal(&headers)?;
    let merged = state.proxy.aggregate(&payload.0, &principal).await?;
    Ok(Json(merged))
}

#[utoipa::path(
    post,
    path = "/v1/radio/devices_at_time",
    request_body = RadioDevicesAtTimeRequest,
    responses(
        (status = 200, description = "Devices observed at the requested instant", body = RadioDevicesAtTimeResponse),
        (status = 401, description = "No current token for the principal")
    ),
    tag = "processing"
)]
#[instrument(skip(state, headers, payload))]
pub async fn radio_devices_at_time(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Json<RadioDevicesAtTimeRequest>,
) -> Result<Json<RadioDevicesAtTimeResponse>, ApiError> {
    let principal = require_principal(&headers)?;
    let response = state
        .proxy
        .radio_devices_at_time(&payload.0, &principal)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/thermalmap/reading_at_time",
    request_body = ThermalmapAtTimeRequest,
    responses(
        (status = 200, description = "Thermal frame at the requested instant", body = ThermalmapAtTimeResponse),
        (status = 401, description = "No current token for the principal")
    ),
    tag = "processing"
)]
#[instrument(skip(state, headers, payload))]
pub async fn thermalmap_reading_at_time(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Json<ThermalmapAtTimeRequest>,
) -> Result<Json<ThermalmapAtTimeResponse>, ApiError> {
    let principal = require_principal(&headers)?;
    let response = state
        .proxy
        .thermalmap_reading_at_time(&payload.0, &principal)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/export",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Raw export bytes, CSV or JSON per requested format"),
        (status = 401, description = "No current token for the principal"),
        (status = 404, description = "Export produced no data")
    ),
    tag = "processing"
)]
#[instrument(skip(state, headers, payload))]
pub async fn export(
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let principal = require_principal(&headers)?;
    let export = state.proxy.export(&payload.0, &principal).await?;

    let filename = format!("export.{}", payload.0.format);
    let disposition = format!("attachment; filename=\"{filename}\"");
    let content_type = export.content_type.clone();
    let mut response_headers = HeaderMap::new();
    if let (Ok(ct), Ok(cd)) = (content_type.parse(), disposition.parse()) {
        response_headers.insert(CONTENT_TYPE, ct);
        response_headers.insert(CONTENT_DISPOSITION, cd);
    } else {
        return Err(ApiError(Error::Validation(
            "downstream returned an invalid content type".to_string(),
        )));
    }

    Ok((response_headers, export.bytes))
}
