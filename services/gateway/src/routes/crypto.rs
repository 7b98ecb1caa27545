//! Crypto info, crypto sign and gateway-name handlers.

use crate::graphql::gateway_name_blocking;
use crate::state::GatewayState;
use chrono::Utc;
use egw_protocol::{RequestEnvelope, Response};
use rand::Rng;
use std::sync::Arc;
use tracing::warn;

use super::RouteHandler;

pub const DEVICE_NAME: &str = "software_zap";

// ---------------------------------------------------------------------------
// Info (GET)
// ---------------------------------------------------------------------------

pub struct CryptoInfoHandler {
    state: Arc<GatewayState>,
}

impl CryptoInfoHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        CryptoInfoHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for CryptoInfoHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        let body = serde_json::json!({
            "deviceName": DEVICE_NAME,
            "serialNumber": self.state.device_id(),
            "publicKey": self.state.config.identity.public_key_hex,
        });
        Response::ok(body.to_string())
    }
}

// ---------------------------------------------------------------------------
// Sign (POST)
// ---------------------------------------------------------------------------

pub struct CryptoSignHandler {
    state: Arc<GatewayState>,
}

impl CryptoSignHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        CryptoSignHandler {
            state: state.clone(),
        }
    }
}

#[derive(serde::Deserialize, Default)]
struct SignBody {
    message: Option<String>,
    timestamp: Option<String>,
}

impl RouteHandler for CryptoSignHandler {
    fn handle(&self, request: &RequestEnvelope) -> Response {
        let body: SignBody = if request.body.is_empty() {
            SignBody::default()
        } else {
            match serde_json::from_str(&request.body) {
                Ok(b) => b,
                Err(_) => return Response::error(400, "Invalid JSON"),
            }
        };

        // The pipe is the field separator of the combined message.
        let message = body.message.unwrap_or_default();
        if message.contains('|') {
            return Response::error(400, "Message cannot contain | characters");
        }
        let timestamp = match body.timestamp {
            Some(t) if t.contains('|') => {
                return Response::error(400, "Timestamp cannot contain | characters");
            }
            Some(t) => t,
            None => Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };

        let nonce = rand::thread_rng().gen_range(100_000..1_000_000).to_string();
        let serial = self.state.device_id();
        let combined = if message.is_empty() {
            format!("{nonce}|{timestamp}|{serial}")
        } else {
            format!("{message}|{nonce}|{timestamp}|{serial}")
        };

        let Ok(signature) = self.state.signer.sign_hex(&combined) else {
            return Response::error(500, "Signing failed");
        };

        // Signature field first: short-packet callers read the signature
        // from the first frame even when the message is truncated.
        let body = format!(
            r#"{{"sign":{},"message":{}}}"#,
            serde_json::Value::String(signature),
            serde_json::Value::String(combined),
        );
        Response::ok(body)
    }
}

// ---------------------------------------------------------------------------
// Name info (GET)
// ---------------------------------------------------------------------------

pub struct NameInfoHandler {
    state: Arc<GatewayState>,
}

impl NameInfoHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        NameInfoHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for NameInfoHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        match gateway_name_blocking(&self.state.config.backend.api_url, self.state.device_id()) {
            Ok(name) => Response::ok(serde_json::json!({"name": name}).to_string()),
            Err(e) => {
                warn!(error = %e, "gateway name lookup failed");
                Response::status(
                    500,
                    serde_json::json!({
                        "name": "Unknown",
                        "error": e.to_string(),
                        "status": "error",
                    })
                    .to_string(),
                )
            }
        }
    }
}
