use super::handlers::{health, process, session};
use crate::proxy::types::{
    AggregatedPoint, ExportRequest, Meta, ProcessingRequest, ProcessingResponse,
    RadioDevicesAtTimeRequest, RadioDevicesAtTimeResponse, ThermalmapAtTimeRequest,
    ThermalmapAtTimeResponse,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "sensegate",
        description = "Credential custodian, token broker and streaming proxy for the Sense processing API"
    ),
    paths(
        health::health,
        session::login,
        session::logout,
        process::process,
        process::radio_devices_at_time,
        process::thermalmap_reading_at_time,
        process::export,
    ),
    components(schemas(
        session::LoginRequest,
        ProcessingRequest,
        ProcessingResponse,
        AggregatedPoint,
        Meta,
        RadioDevicesAtTimeRequest,
        RadioDevicesAtTimeResponse,
        ThermalmapAtTimeRequest,
        ThermalmapAtTimeResponse,
        ExportRequest,
    )),
    tags(
        (name = "session", description = "Credential custody hooks"),
        (name = "processing", description = "Forwarded processing calls"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_all_routes() {
        let doc = openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/health"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/session/login"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/process"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/export"));
        assert_eq!(paths.len(), 7);
    }
}
