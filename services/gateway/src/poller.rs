//! Periodic background publishers.
//!
//! The state poller pushes a signed device-state document to the backend
//! (immediately on first connect, then every five minutes, retrying after
//! one minute on failure). The OTA poller asks the firmware endpoint for
//! the latest released version (first check after one minute so boot-time
//! work settles, then every thirty minutes).

use crate::state::GatewayState;
use crate::util::{boot_millis, epoch_millis, uptime_secs};
use crate::version::VERSION_STRING;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const STATE_UPDATE_INTERVAL_MS: u64 = 5 * 60 * 1000;
const STATE_RETRY_MS: u64 = 60 * 1000;
const OTA_FIRST_CHECK_MS: u64 = 60 * 1000;
const OTA_CHECK_INTERVAL_MS: u64 = 30 * 60 * 1000;

// ---------------------------------------------------------------------------
// State poller
// ---------------------------------------------------------------------------

pub struct StatePoller {
    state: Arc<GatewayState>,
    last_update_ms: u64,
    interval_ms: u64,
    initial_done: bool,
}

impl StatePoller {
    pub fn new(state: Arc<GatewayState>) -> Self {
        StatePoller {
            state,
            last_update_ms: 0,
            interval_ms: 0, // immediate first publish
            initial_done: false,
        }
    }

    /// Force a publish on the next tick (SendState action executor).
    pub fn trigger(&mut self) {
        self.last_update_ms = 0;
        self.interval_ms = 0;
        self.initial_done = false;
        info!("immediate state update triggered");
    }

    pub async fn tick(&mut self) {
        if !self.state.wifi.is_connected() {
            return;
        }
        let now = boot_millis();
        if now.saturating_sub(self.last_update_ms) < self.interval_ms {
            return;
        }
        if !self.initial_done {
            self.interval_ms = STATE_UPDATE_INTERVAL_MS;
            self.initial_done = true;
        }
        self.last_update_ms = now;

        if let Err(e) = self.send_state_update().await {
            error!(error = %e, "state update failed");
            // Retry sooner than the regular cadence.
            self.last_update_ms = now.saturating_sub(self.interval_ms.saturating_sub(STATE_RETRY_MS));
        }
    }

    async fn send_state_update(&self) -> Result<(), String> {
        let state = &self.state;
        let header = serde_json::json!({
            "alg": "ES256",
            "typ": "JWT",
            "device": state.device_id(),
            "subKey": "state",
        })
        .to_string();

        let ip = state.wifi.local_ip().unwrap_or_default();
        let payload = serde_json::json!({
            "status": {
                "uptime": uptime_secs(),
                "version": VERSION_STRING,
            },
            "network": {
                "wifi": {
                    "connected": state.wifi.connected_ssid().unwrap_or_default(),
                    "ssids": state.wifi.last_scan_results(),
                },
                "address": {
                    "ip": ip,
                    "port": 80,
                    "wlan0_mac": state.wifi.mac_address(),
                    "interfaces": { "wlan0": ip },
                },
            },
            "timestamp": epoch_millis(),
        })
        .to_string();

        let jwt = state
            .signer
            .sign_jwt(&header, &payload)
            .map_err(|e| e.to_string())?;

        state
            .gql
            .set_configuration(&jwt)
            .await
            .map_err(|e| e.to_string())?;
        info!("state update sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OTA version poller
// ---------------------------------------------------------------------------

pub struct OtaPoller {
    state: Arc<GatewayState>,
    http: reqwest::Client,
    last_check_ms: u64,
    interval_ms: u64,
    initial_done: bool,
}

impl OtaPoller {
    pub fn new(state: Arc<GatewayState>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        OtaPoller {
            state,
            http,
            last_check_ms: 0,
            interval_ms: OTA_FIRST_CHECK_MS,
            initial_done: false,
        }
    }

    pub async fn tick(&mut self) {
        if !self.state.wifi.is_connected() {
            return;
        }
        let now = boot_millis();
        if now.saturating_sub(self.last_check_ms) < self.interval_ms {
            return;
        }
        if !self.initial_done {
            self.interval_ms = OTA_CHECK_INTERVAL_MS;
            self.initial_done = true;
        }
        self.last_check_ms = now;
        self.check_for_update().await;
    }

    async fn check_for_update(&self) {
        let url = format!(
            "{}{}/firmwares/latest",
            self.state.config.backend.firmware_url,
            self.state.device_id()
        );
        debug!(url = %url, "checking for firmware update");

        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "firmware check failed");
                return;
            }
        };
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "firmware check refused");
            return;
        }
        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "undecodable firmware response");
                return;
            }
        };

        let Some(version) = value.get("version").and_then(|v| v.as_str()) else {
            warn!("firmware response missing version");
            return;
        };
        if version == VERSION_STRING {
            debug!(version, "firmware up to date");
            return;
        }

        let Some(download_url) = value.pointer("/binary/downloadUrl").and_then(|v| v.as_str())
        else {
            warn!("firmware response missing download url");
            return;
        };

        info!(current = VERSION_STRING, available = version, "new firmware available");
        if !self.state.ota.request_update(download_url, version) {
            debug!("update already in progress, skipping");
        }
    }
}
