//! Wi-Fi configuration, reset, status and scan handlers.

use crate::actions::ActionKind;
use crate::state::GatewayState;
use crate::util::boot_millis;
use egw_protocol::{RequestEnvelope, Response};
use std::sync::Arc;
use tracing::info;

use super::RouteHandler;

const WIFI_DISCONNECT_DELAY_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Config (POST)
// ---------------------------------------------------------------------------

pub struct WifiConfigHandler {
    state: Arc<GatewayState>,
}

impl WifiConfigHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        WifiConfigHandler {
            state: state.clone(),
        }
    }
}

#[derive(serde::Deserialize)]
struct WifiConfigBody {
    ssid: Option<String>,
    psk: Option<String>,
}

impl RouteHandler for WifiConfigHandler {
    fn handle(&self, request: &RequestEnvelope) -> Response {
        let Ok(body) = serde_json::from_str::<WifiConfigBody>(&request.body) else {
            return Response::error(400, "Invalid JSON");
        };
        let (Some(ssid), Some(psk)) = (body.ssid, body.psk) else {
            return Response::error(400, "Missing credentials");
        };

        info!(ssid = %ssid, "wifi config request");
        if self.state.wifi.connect(&ssid, &psk, true) {
            Response::ok(
                r#"{"status":"success","message":"WiFi credentials updated and connected"}"#,
            )
        } else {
            Response::error(500, "Failed to connect with provided credentials")
        }
    }
}

// ---------------------------------------------------------------------------
// Reset (DELETE)
// ---------------------------------------------------------------------------

pub struct WifiResetHandler {
    state: Arc<GatewayState>,
}

impl WifiResetHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        WifiResetHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for WifiResetHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        self.state.creds.clear();
        // Deferred so the response still goes out over the link being torn
        // down.
        self.state
            .actions
            .trigger(ActionKind::WifiDisconnect, WIFI_DISCONNECT_DELAY_MS, boot_millis());
        Response::ok(r#"{"status":"success","message":"WiFi reset"}"#)
    }
}

// ---------------------------------------------------------------------------
// Status (GET)
// ---------------------------------------------------------------------------

pub struct WifiStatusHandler {
    state: Arc<GatewayState>,
}

impl WifiStatusHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        WifiStatusHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for WifiStatusHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        let body = serde_json::json!({
            "ssids": self.state.wifi.last_scan_results(),
            "connected": self.state.wifi.connected_ssid(),
        });
        Response::ok(body.to_string())
    }
}

// ---------------------------------------------------------------------------
// Scan (GET)
// ---------------------------------------------------------------------------

pub struct WifiScanHandler {
    state: Arc<GatewayState>,
}

impl WifiScanHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        WifiScanHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for WifiScanHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        // The scan itself runs on the supervisor tick; handlers only flag it.
        self.state.wifi.request_scan();
        Response::ok(r#"{"status":"success","message":"scan initiated"}"#)
    }
}
