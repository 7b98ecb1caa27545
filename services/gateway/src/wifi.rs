//! Wi-Fi supervision.
//!
//! The radio itself lives outside this repo; [`Station`] is the seam the
//! platform driver plugs into. The supervisor owns scan scheduling,
//! connect-and-persist, auto-connect on boot, and the status snapshots the
//! handlers and the state poller read.

use crate::creds::CredStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Errors from the station driver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WifiError {
    #[error("association failed: {0}")]
    Association(String),
    #[error("scan failed: {0}")]
    Scan(String),
}

/// The external station-mode radio driver.
///
/// `connect` blocks for the driver's own association window (the platform
/// retries association for up to 15 s); callers are expected to be on a
/// blocking-capable thread.
pub trait Station: Send + Sync {
    fn connect(&self, ssid: &str, password: &str) -> Result<(), WifiError>;
    fn disconnect(&self);
    fn scan(&self) -> Result<Vec<String>, WifiError>;
    fn is_connected(&self) -> bool;
    fn local_ip(&self) -> Option<String>;
    fn rssi(&self) -> Option<i32>;
    fn mac_address(&self) -> String;
}

/// Station stand-in for wired deployments and tests: associates with any
/// credentials and reports a fixed address.
#[derive(Debug, Default)]
pub struct FixedStation {
    connected: AtomicBool,
    ssid: Mutex<Option<String>>,
    /// SSIDs a scan should report.
    pub visible: Mutex<Vec<String>>,
}

impl Station for FixedStation {
    fn connect(&self, ssid: &str, _password: &str) -> Result<(), WifiError> {
        self.connected.store(true, Ordering::SeqCst);
        *self.ssid.lock().unwrap() = Some(ssid.to_owned());
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.ssid.lock().unwrap() = None;
    }

    fn scan(&self) -> Result<Vec<String>, WifiError> {
        Ok(self.visible.lock().unwrap().clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_ip(&self) -> Option<String> {
        self.is_connected().then(|| "192.168.1.2".to_owned())
    }

    fn rssi(&self) -> Option<i32> {
        self.is_connected().then_some(-55)
    }

    fn mac_address(&self) -> String {
        "DE:AD:BE:EF:00:01".to_owned()
    }
}

/// The one status indicator the device carries.
pub trait StatusLed: Send + Sync {
    fn blink(&self, times: u8);
}

/// Default indicator: a log line where a GPIO would toggle.
pub struct LogLed;

impl StatusLed for LogLed {
    fn blink(&self, times: u8) {
        info!(times, "status led blink");
    }
}

/// Wi-Fi supervisor state shared between handlers and the main loop.
pub struct WifiSupervisor {
    station: Arc<dyn Station>,
    creds: Arc<CredStore>,
    led: Arc<dyn StatusLed>,
    configured_ssid: Mutex<Option<String>>,
    last_scan: Mutex<Vec<String>>,
    scan_requested: AtomicBool,
}

impl WifiSupervisor {
    pub fn new(station: Arc<dyn Station>, creds: Arc<CredStore>, led: Arc<dyn StatusLed>) -> Self {
        WifiSupervisor {
            station,
            creds,
            led,
            configured_ssid: Mutex::new(None),
            last_scan: Mutex::new(Vec::new()),
            scan_requested: AtomicBool::new(true), // scan once on boot
        }
    }

    /// Attempt association and, when `persist` is set, save the credentials
    /// on success. Blocking; call from a blocking-capable thread.
    pub fn connect(&self, ssid: &str, password: &str, persist: bool) -> bool {
        if ssid.is_empty() || password.is_empty() {
            warn!("refusing connect with empty credentials");
            return false;
        }

        match self.station.connect(ssid, password) {
            Ok(()) => {
                info!(ssid, "wifi connected");
                *self.configured_ssid.lock().unwrap() = Some(ssid.to_owned());
                if persist && !self.creds.save(ssid, password) {
                    warn!("connected but credentials were not persisted");
                }
                true
            }
            Err(e) => {
                warn!(ssid, error = %e, "wifi connect failed");
                false
            }
        }
    }

    /// Auto-connect with stored credentials on boot. A short blink pattern
    /// signals success.
    pub fn auto_connect(&self) -> bool {
        let Some(creds) = self.creds.load() else {
            info!("not provisioned, skipping auto-connect");
            return false;
        };
        let ok = self.connect(&creds.ssid, &creds.password, false);
        if ok {
            self.led.blink(2);
        }
        ok
    }

    pub fn disconnect(&self) {
        self.station.disconnect();
        *self.configured_ssid.lock().unwrap() = None;
        info!("wifi disconnected");
    }

    /// Flag a scan to run on the next supervisor tick.
    pub fn request_scan(&self) {
        self.scan_requested.store(true, Ordering::SeqCst);
    }

    pub fn scan_requested(&self) -> bool {
        self.scan_requested.load(Ordering::SeqCst)
    }

    /// Run a scan if one was requested, deduplicating and sorting SSIDs.
    /// Clears the request flag in all cases.
    pub fn scan_if_requested(&self) {
        if !self.scan_requested.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.station.scan() {
            Ok(mut ssids) => {
                ssids.sort();
                ssids.dedup();
                info!(networks = ssids.len(), "wifi scan completed");
                *self.last_scan.lock().unwrap() = ssids;
            }
            Err(e) => warn!(error = %e, "wifi scan failed"),
        }
    }

    /// SSIDs from the most recent completed scan.
    pub fn last_scan_results(&self) -> Vec<String> {
        self.last_scan.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.station.is_connected()
    }

    /// The SSID of the current association, when connected.
    pub fn connected_ssid(&self) -> Option<String> {
        if self.station.is_connected() {
            self.configured_ssid.lock().unwrap().clone()
        } else {
            None
        }
    }

    pub fn local_ip(&self) -> Option<String> {
        self.station.local_ip()
    }

    pub fn rssi(&self) -> Option<i32> {
        self.station.rssi()
    }

    pub fn mac_address(&self) -> String {
        self.station.mac_address()
    }
}
