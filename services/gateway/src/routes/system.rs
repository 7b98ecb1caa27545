//! System, debug, echo and provisioning-shutdown handlers.

use crate::actions::ActionKind;
use crate::state::GatewayState;
use crate::util::{boot_millis, epoch_secs, uptime_secs};
use crate::version::VERSION_STRING;
use egw_protocol::{RequestEnvelope, Response};
use std::sync::Arc;

use super::RouteHandler;

// ---------------------------------------------------------------------------
// System info
// ---------------------------------------------------------------------------

pub struct SystemInfoHandler {
    state: Arc<GatewayState>,
}

impl SystemInfoHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        SystemInfoHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for SystemInfoHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        let state = &self.state;
        let mem = memory_mib();
        let used = mem.total - mem.available;
        let percent_used = if mem.total > 0.0 {
            used / mem.total * 100.0
        } else {
            0.0
        };

        let mut network = serde_json::Map::new();
        if state.wifi.is_connected() {
            network.insert("wifiStatus".into(), "connected".into());
            if let Some(ip) = state.wifi.local_ip() {
                network.insert("localIP".into(), ip.into());
            }
            if let Some(ssid) = state.wifi.connected_ssid() {
                network.insert("ssid".into(), ssid.into());
            }
            if let Some(rssi) = state.wifi.rssi() {
                network.insert("rssi".into(), rssi.into());
            }
        } else {
            network.insert("wifiStatus".into(), "disconnected".into());
        }

        let body = serde_json::json!({
            "time_utc_sec": epoch_secs(),
            "uptime_seconds": uptime_secs(),
            "temperature_celsius": cpu_temperature_celsius(),
            "memory_MB": {
                "total": mem.total,
                "available": mem.available,
                "free": mem.available,
                "used": used,
                "percent_used": percent_used,
            },
            "processes_average": {
                "last_1min": 0,
                "last_5min": 0,
                "last_15min": 0,
            },
            "zap": {
                "deviceId": state.device_id(),
                "cpuFreqMHz": cpu_freq_mhz(),
                "flashSizeMB": 0.0,
                "sdkVersion": sdk_version(),
                "firmwareVersion": VERSION_STRING,
                "publicKey": state.config.identity.public_key_hex,
                "network": network,
            },
        });
        Response::ok(body.to_string())
    }
}

/// Best-effort CPU temperature from the platform thermal zone.
fn cpu_temperature_celsius() -> f64 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map_or(0.0, |millideg| millideg / 1000.0)
}

struct MemoryMib {
    total: f64,
    available: f64,
}

/// Best-effort memory totals in MiB.
fn memory_mib() -> MemoryMib {
    let mut total = 0.0;
    let mut available = 0.0;
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        for line in meminfo.lines() {
            let kib = |l: &str| {
                l.split_whitespace()
                    .nth(1)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            if line.starts_with("MemTotal:") {
                total = kib(line) / 1024.0;
            } else if line.starts_with("MemAvailable:") {
                available = kib(line) / 1024.0;
            }
        }
    }
    MemoryMib { total, available }
}

fn cpu_freq_mhz() -> u32 {
    std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|info| {
            info.lines()
                .find(|l| l.starts_with("cpu MHz"))
                .and_then(|l| l.split(':').nth(1))
                .and_then(|v| v.trim().parse::<f64>().ok())
        })
        .map_or(0, |mhz| mhz as u32)
}

fn sdk_version() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

// ---------------------------------------------------------------------------
// System reboot
// ---------------------------------------------------------------------------

pub struct SystemRebootHandler {
    state: Arc<GatewayState>,
}

impl SystemRebootHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        SystemRebootHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for SystemRebootHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        // Immediate, but through the scheduler so the response can flush.
        self.state
            .actions
            .trigger(ActionKind::Reboot, 0, boot_millis());
        Response::ok(r#"{"status":"success","message":"Rebooting"}"#)
    }
}

// ---------------------------------------------------------------------------
// Debug
// ---------------------------------------------------------------------------

pub struct DebugHandler {
    state: Arc<GatewayState>,
}

impl DebugHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        DebugHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for DebugHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        let diag = &self.state.diag;
        let mut report = serde_json::json!({
            "uptime_sek": uptime_secs(),
            "failedFrames": diag.failed_frames(),
            "successFrames": diag.frames(),
            "totalFrames": diag.failed_frames() + diag.frames(),
            "deviceId": diag.device_id(),
            "resetReason": diag.reset_reason(),
        });
        let faulty = diag.faulty_frame_hex();
        if !faulty.is_empty() {
            report["faultyFrameData"] = faulty.into();
        }
        let buffer = diag.meter_buffer_hex();
        if !buffer.is_empty() {
            report["meterDataBuffer"] = buffer.into();
        }

        let body = serde_json::json!({"status": "success", "report": report});
        Response::ok(body.to_string())
    }
}

// ---------------------------------------------------------------------------
// Echo
// ---------------------------------------------------------------------------

pub struct EchoHandler;

impl RouteHandler for EchoHandler {
    fn handle(&self, request: &RequestEnvelope) -> Response {
        Response::ok(serde_json::json!({"echo": request.body}).to_string())
    }
}

// ---------------------------------------------------------------------------
// Provisioning shutdown
// ---------------------------------------------------------------------------

pub struct BleStopHandler {
    state: Arc<GatewayState>,
}

impl BleStopHandler {
    pub fn new(state: &Arc<GatewayState>) -> Self {
        BleStopHandler {
            state: state.clone(),
        }
    }
}

impl RouteHandler for BleStopHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        self.state
            .actions
            .trigger(ActionKind::BleDisconnect, 1_000, boot_millis());
        Response::ok(r#"{"status":"success","message":"BLE stopping..."}"#)
    }
}
