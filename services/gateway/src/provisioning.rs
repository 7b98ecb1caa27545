//! Provisioning transport (short-packet wireless).
//!
//! The radio stack delivers raw characteristic writes through
//! [`ProvisioningChannel::enqueue_write`]; the supervisor drains one
//! request per tick, routes it, and leaves the MTU-bounded response frame
//! for the radio glue to notify out. Responses longer than the MTU are
//! fetched by the caller re-issuing the request with an `Offset` header.

use crate::routes::RouteTable;
use egw_protocol::egwttp::{self, EgwttpRequest};
use egw_protocol::{RequestEnvelope, Verb};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Inbound queue depth; writes beyond this are dropped.
const REQUEST_QUEUE_CAPACITY: usize = 5;

const ERROR_INVALID_REQUEST: &str = r#"{"status":"error","message":"Invalid request format"}"#;

/// Reason phrase for the EGWTP status line.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// Shared state of the provisioning transport.
pub struct ProvisioningChannel {
    inbound: Mutex<VecDeque<String>>,
    outbound: Mutex<Option<String>>,
    active: AtomicBool,
    mtu: usize,
}

impl ProvisioningChannel {
    pub fn new(mtu: usize) -> Self {
        ProvisioningChannel {
            inbound: Mutex::new(VecDeque::with_capacity(REQUEST_QUEUE_CAPACITY)),
            outbound: Mutex::new(None),
            active: AtomicBool::new(true),
            mtu: mtu.min(egwttp::MAX_PACKET_SIZE),
        }
    }

    /// Queue one raw characteristic write. Each accepted write is a heap
    /// copy owned by the queue until the supervisor consumes it.
    ///
    /// Returns `false` when the transport is stopped or the queue is full
    /// (the write is dropped).
    pub fn enqueue_write(&self, raw: &str) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            debug!("provisioning stopped, ignoring write");
            return false;
        }
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.len() >= REQUEST_QUEUE_CAPACITY {
            warn!("provisioning request queue full, write dropped");
            return false;
        }
        inbound.push_back(raw.to_owned());
        true
    }

    /// Whether a request is waiting.
    pub fn has_pending(&self) -> bool {
        !self.inbound.lock().unwrap().is_empty()
    }

    /// Dequeue and serve one request. Returns `true` when a request was
    /// processed. Synchronous; the supervisor calls this off the async
    /// loop.
    pub fn process_one(&self, table: &RouteTable) -> bool {
        let Some(raw) = self.inbound.lock().unwrap().pop_front() else {
            return false;
        };

        let frame = match egwttp::parse_request(&raw) {
            Ok(request) => self.serve(&request, table),
            Err(e) => {
                warn!(error = %e, "unparseable provisioning request");
                egwttp::build_response(
                    400,
                    reason_phrase(400),
                    "",
                    Verb::Unknown,
                    ERROR_INVALID_REQUEST,
                    0,
                    self.mtu,
                )
            }
        };

        *self.outbound.lock().unwrap() = Some(frame);
        true
    }

    fn serve(&self, request: &EgwttpRequest, table: &RouteTable) -> String {
        debug!(
            method = %request.method,
            path = %request.path,
            offset = request.offset,
            "provisioning request"
        );

        let mut envelope =
            RequestEnvelope::new(request.path.clone(), request.method, request.body.clone());
        envelope.offset = request.offset;
        let response = table.route(&envelope);

        egwttp::build_response(
            response.status,
            reason_phrase(response.status),
            &request.path,
            request.method,
            &response.body,
            request.offset,
            self.mtu,
        )
    }

    /// Current response characteristic value.
    pub fn take_response(&self) -> Option<String> {
        self.outbound.lock().unwrap().take()
    }

    /// Stop the transport (BleDisconnect executor): drop queued requests
    /// and refuse new writes.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.inbound.lock().unwrap().clear();
        *self.outbound.lock().unwrap() = None;
        info!("provisioning transport stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_table;

    #[test]
    fn request_is_routed_and_framed() {
        let table = test_table();
        let channel = ProvisioningChannel::new(512);

        assert!(channel.enqueue_write("POST /api/echo EGWTTP/1.1\r\n\r\nhello"));
        assert!(channel.process_one(&table));

        let frame = channel.take_response().expect("response frame");
        assert!(frame.starts_with("EGWTP/1.1 200 OK\r\n"));
        assert!(frame.contains("Location: /api/echo\r\n"));
        assert!(frame.contains("Method: POST\r\n"));
        assert!(frame.ends_with("\r\n\r\n{\"echo\":\"hello\"}"));
        // Consumed.
        assert!(channel.take_response().is_none());
    }

    #[test]
    fn queue_is_bounded_at_five() {
        let channel = ProvisioningChannel::new(512);
        for _ in 0..REQUEST_QUEUE_CAPACITY {
            assert!(channel.enqueue_write("GET /api/system EGWTTP/1.1\r\n\r\n"));
        }
        assert!(!channel.enqueue_write("GET /api/system EGWTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn malformed_request_yields_error_frame() {
        let table = test_table();
        let channel = ProvisioningChannel::new(512);
        channel.enqueue_write("GET /api/system HTTP/1.1\r\n\r\n");
        channel.process_one(&table);

        let frame = channel.take_response().unwrap();
        assert!(frame.starts_with("EGWTP/1.1 400 Bad Request\r\n"));
        assert!(frame.contains("Invalid request format"));
    }

    #[test]
    fn unknown_path_maps_to_404_frame() {
        let table = test_table();
        let channel = ProvisioningChannel::new(512);
        channel.enqueue_write("GET /api/missing EGWTTP/1.1\r\n\r\n");
        channel.process_one(&table);

        let frame = channel.take_response().unwrap();
        assert!(frame.starts_with("EGWTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn oversize_response_is_fetched_with_offsets() {
        let table = test_table();
        let mtu = 160;
        let channel = ProvisioningChannel::new(mtu);

        // A body comfortably larger than the MTU.
        let long_body = "z".repeat(400);
        let write = format!("POST /api/echo EGWTTP/1.1\r\n\r\n{long_body}");
        let expected = format!("{{\"echo\":\"{long_body}\"}}");

        let mut assembled = String::new();
        while assembled.len() < expected.len() {
            let offset = assembled.len();
            let raw = if offset == 0 {
                write.clone()
            } else {
                format!("POST /api/echo EGWTTP/1.1\r\nOffset: {offset}\r\n\r\n{long_body}")
            };
            channel.enqueue_write(&raw);
            channel.process_one(&table);
            let frame = channel.take_response().unwrap();
            assert!(frame.len() <= mtu);
            let chunk = &frame[frame.find("\r\n\r\n").unwrap() + 4..];
            assert!(!chunk.is_empty());
            assembled.push_str(chunk);
        }
        assert_eq!(assembled, expected);
    }

    #[test]
    fn multibyte_echo_body_is_served_without_splitting_codepoints() {
        let table = test_table();
        let mtu = 200;
        let channel = ProvisioningChannel::new(mtu);

        let long_body = "åäö".repeat(120);
        let expected = format!("{{\"echo\":\"{long_body}\"}}");

        let mut assembled = String::new();
        while assembled.len() < expected.len() {
            let offset = assembled.len();
            let raw = if offset == 0 {
                format!("POST /api/echo EGWTTP/1.1\r\n\r\n{long_body}")
            } else {
                format!("POST /api/echo EGWTTP/1.1\r\nOffset: {offset}\r\n\r\n{long_body}")
            };
            channel.enqueue_write(&raw);
            channel.process_one(&table);

            let frame = channel.take_response().unwrap();
            assert!(frame.len() <= mtu);
            assert!(std::str::from_utf8(frame.as_bytes()).is_ok());
            let chunk = &frame[frame.find("\r\n\r\n").unwrap() + 4..];
            assert!(!chunk.is_empty(), "offset {offset} must make progress");
            assembled.push_str(chunk);
        }
        assert_eq!(assembled, expected);
    }

    #[test]
    fn stop_clears_and_refuses() {
        let channel = ProvisioningChannel::new(512);
        channel.enqueue_write("GET /api/system EGWTTP/1.1\r\n\r\n");
        channel.stop();
        assert!(!channel.has_pending());
        assert!(!channel.enqueue_write("GET /api/system EGWTTP/1.1\r\n\r\n"));
        assert!(!channel.is_active());
    }
}
