//! Uplink task: signed readings to the backend ingest endpoint.
//!
//! Drains the readings queue one package at a time, wraps each payload in
//! a signed compact token, and POSTs it as `text/plain`. HTTP errors are
//! logged and the reading is dropped — there is no retry; the next telegram
//! is at most ten seconds away.

use crate::state::GatewayState;
use crate::util::epoch_secs;
use chrono::{DateTime, Utc};
use meter_core::Reading;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const POP_TIMEOUT: Duration = Duration::from_millis(500);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the token payload for one reading: an object keyed by the reading
/// timestamp in milliseconds, carrying the meter serial, the OBIS rows
/// (ending with the checksum placeholder) and the checksum field.
pub fn build_uplink_payload(reading: &Reading, meter_sn: &str) -> String {
    let ts_secs = reading.timestamp().unwrap_or_else(epoch_secs);
    let ts_key = format!("{}000", ts_secs);

    let mut rows: Vec<String> = reading.obis().to_vec();
    // The timestamp row is regenerated from the structured field so ASCII
    // and binary telegrams serialize identically.
    if !rows.iter().any(|r| r.starts_with("0-0:1.0.0")) {
        if let Some(dt) = DateTime::<Utc>::from_timestamp(ts_secs, 0) {
            rows.push(dt.format("0-0:1.0.0(%y%m%d%H%M%SW)").to_string());
        }
    }
    rows.push("!DEAD".to_owned());

    serde_json::json!({
        ts_key: {
            "serial_number": meter_sn,
            "rows": rows,
            "checksum": "DEAD",
        }
    })
    .to_string()
}

/// The fixed token header for data uplinks.
fn uplink_header(state: &GatewayState) -> String {
    serde_json::json!({
        "alg": "ES256",
        "typ": "JWT",
        "device": state.device_id(),
        "opr": "production",
        "model": state.config.meter.model,
        "dtype": "p1_telnet_json",
        "sn": state.config.meter.serial_number,
    })
    .to_string()
}

/// Run the uplink loop until shutdown.
pub async fn run_uplink(state: Arc<GatewayState>, mut shutdown: watch::Receiver<bool>) {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("reqwest client");

    info!(url = %state.config.backend.data_url, "uplink task started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            package = state.queue.pop_timeout(POP_TIMEOUT) => {
                let Some(package) = package else { continue };
                send_package(&client, &state, &package.payload).await;
            }
        }
    }

    info!("uplink task stopped");
}

async fn send_package(client: &reqwest::Client, state: &GatewayState, payload: &str) {
    let jwt = match state.signer.sign_jwt(&uplink_header(state), payload) {
        Ok(jwt) => jwt,
        Err(e) => {
            warn!(error = %e, "failed to sign uplink payload");
            return;
        }
    };

    let result = client
        .post(&state.config.backend.data_url)
        .header("Content-Type", "text/plain")
        .body(jwt)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!(status = response.status().as_u16(), "reading delivered");
        }
        Ok(response) => {
            // Dropped; the backend deduplicates on timestamp anyway.
            warn!(status = response.status().as_u16(), "backend refused reading");
        }
        Err(e) => {
            warn!(error = %e, "uplink POST failed");
        }
    }
}
