//! Firmware update and update-status handlers.

use crate::state::GatewayState;
use egw_protocol::{RequestEnvelope, Response};
use std::sync::Arc;
use tracing::info;

use super::RouteHandler;

// ---------------------------------------------------------------------------
// Update (POST)
// ---------------------------------------------------------------------------

pub struct OtaUpdateHandler {
    state: Arc<GatewayState>,
}

impl OtaUpdateHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        OtaUpdateHandler {
            state: state.clone(),
        }
    }
}

#[derive(serde::Deserialize)]
struct OtaUpdateBody {
    url: Option<String>,
    version: Option<String>,
}

impl RouteHandler for OtaUpdateHandler {
    fn handle(&self, request: &RequestEnvelope) -> Response {
        let Ok(body) = serde_json::from_str::<OtaUpdateBody>(&request.body) else {
            return Response::error(400, "Invalid JSON");
        };
        let (Some(url), Some(version)) = (body.url, body.version) else {
            return Response::error(400, "Missing firmware URL or version");
        };

        if self.state.ota.in_progress() {
            return Response::error(409, "Update already in progress");
        }

        if self.state.ota.request_update(&url, &version) {
            info!(version = %version, "ota update accepted");
            Response::status(
                202,
                serde_json::json!({"status": "accepted", "version": version}).to_string(),
            )
        } else {
            Response::error(409, "Update already in progress")
        }
    }
}

// ---------------------------------------------------------------------------
// Status (GET)
// ---------------------------------------------------------------------------

pub struct OtaStatusHandler {
    state: Arc<GatewayState>,
}

impl OtaStatusHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        OtaStatusHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for OtaStatusHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        let ota = &self.state.ota;
        let mut body = serde_json::json!({
            "in_progress": ota.in_progress(),
            "progress": ota.progress_pct(),
        });
        if let Some(result) = ota.last_result() {
            body["result"] = serde_json::json!({
                "success": result.success,
                "message": result.message,
                "version": result.version,
            });
        }
        Response::ok(body.to_string())
    }
}
