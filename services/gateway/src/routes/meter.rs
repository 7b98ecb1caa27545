//! Latest-reading handler.

use crate::state::GatewayState;
use egw_protocol::{RequestEnvelope, Response};
use std::sync::Arc;

use super::RouteHandler;

pub struct MeterDataHandler {
    state: Arc<GatewayState>,
}

impl MeterDataHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        MeterDataHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for MeterDataHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        match self.state.latest_reading() {
            Some(reading) => {
                let body = serde_json::json!({
                    "deviceId": reading.device_id(),
                    "timestamp": reading.timestamp(),
                    "obis": reading.obis(),
                });
                Response::ok(body.to_string())
            }
            None => Response::error(404, "No meter data"),
        }
    }
}
