//! Runtime diagnostics exposed by the debug endpoint.
//!
//! Frame counters, the last decoded device id, the raw bytes of the last
//! frame that failed to decode, and a hex snapshot of the meter buffer.
//! Writers are the ingestion task; readers are request handlers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

const MAX_FAULTY_FRAME_BYTES: usize = 1024;

/// Shared diagnostic counters and captures.
#[derive(Debug, Default)]
pub struct DiagStats {
    frames: AtomicU32,
    failed_frames: AtomicU32,
    device_id: Mutex<String>,
    faulty_frame: Mutex<Vec<u8>>,
    meter_buffer_hex: Mutex<String>,
    reset_reason: Mutex<String>,
}

impl DiagStats {
    pub fn new() -> Self {
        DiagStats::default()
    }

    pub fn add_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed_frame(&self) {
        self.failed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u32 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn failed_frames(&self) -> u32 {
        self.failed_frames.load(Ordering::Relaxed)
    }

    pub fn set_device_id(&self, id: &str) {
        *self.device_id.lock().unwrap() = id.to_owned();
    }

    pub fn device_id(&self) -> String {
        self.device_id.lock().unwrap().clone()
    }

    /// Replace the captured faulty-frame bytes, bounded at 1 KiB.
    pub fn set_faulty_frame(&self, bytes: &[u8]) {
        let mut frame = self.faulty_frame.lock().unwrap();
        frame.clear();
        frame.extend_from_slice(&bytes[..bytes.len().min(MAX_FAULTY_FRAME_BYTES)]);
    }

    pub fn faulty_frame_hex(&self) -> String {
        hex::encode(&*self.faulty_frame.lock().unwrap())
    }

    /// Snapshot of the unread meter buffer, stored as hex.
    pub fn set_meter_buffer(&self, bytes: &[u8]) {
        *self.meter_buffer_hex.lock().unwrap() = hex::encode(bytes);
    }

    pub fn meter_buffer_hex(&self) -> String {
        self.meter_buffer_hex.lock().unwrap().clone()
    }

    pub fn set_reset_reason(&self, reason: &str) {
        *self.reset_reason.lock().unwrap() = reason.to_owned();
    }

    pub fn reset_reason(&self) -> String {
        self.reset_reason.lock().unwrap().clone()
    }
}
