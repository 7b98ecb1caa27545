//! egw-protocol: the request/response contract shared by every caller.
//!
//! Remote requests (over the backend control channel), local HTTP requests
//! and provisioning requests (over the short-packet wireless transport) all
//! normalize into the same [`RequestEnvelope`] and produce the same
//! [`Response`], so one route table serves all three surfaces.

pub mod egwttp;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Verb
// ---------------------------------------------------------------------------

/// Request verb. The closed set the route table dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Get,
    Post,
    Delete,
    Unknown,
}

impl Verb {
    pub fn parse(s: &str) -> Verb {
        match s {
            "GET" => Verb::Get,
            "POST" => Verb::Post,
            "DELETE" => Verb::Delete,
            _ => Verb::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
            Verb::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request / response envelopes
// ---------------------------------------------------------------------------

/// Normalized request from any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub path: String,
    pub verb: Verb,
    /// Body text; JSON object bodies are re-serialized to a string before
    /// they reach a handler.
    pub body: String,
    /// Byte offset for chunked responses on the short-packet transport.
    pub offset: usize,
}

impl RequestEnvelope {
    pub fn new(path: impl Into<String>, verb: Verb, body: impl Into<String>) -> Self {
        RequestEnvelope {
            path: path.into(),
            verb,
            body: body.into(),
            offset: 0,
        }
    }
}

/// Handler response: HTTP-style status, content type, body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    /// 200 with a JSON body.
    pub fn ok(body: impl Into<String>) -> Response {
        Response {
            status: 200,
            content_type: "application/json",
            body: body.into(),
        }
    }

    /// Arbitrary status with a JSON body.
    pub fn status(status: u16, body: impl Into<String>) -> Response {
        Response {
            status,
            content_type: "application/json",
            body: body.into(),
        }
    }

    /// `{"status":"error","message":...}` with the given status code.
    pub fn error(status: u16, message: &str) -> Response {
        Response::status(
            status,
            serde_json::json!({"status": "error", "message": message}).to_string(),
        )
    }
}

/// A remote request as carried on the control channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRequest {
    pub id: String,
    pub path: String,
    pub method: String,
    /// Milliseconds since epoch, stamped by the backend. Missing
    /// timestamps default to 0 and fail the freshness check.
    #[serde(default)]
    pub timestamp: u64,
    /// String or embedded JSON object.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl RemoteRequest {
    /// Coerce the body to the string form handlers expect: strings pass
    /// through, objects are re-serialized, absent bodies become empty.
    pub fn body_as_string(&self) -> String {
        match &self.body {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Route-entry kinds
// ---------------------------------------------------------------------------

/// Endpoint type tags for route-table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    WifiConfig,
    WifiReset,
    WifiStatus,
    WifiScan,
    SystemInfo,
    SystemReboot,
    CryptoInfo,
    CryptoSign,
    NameInfo,
    Debug,
    Echo,
    BleStop,
    OtaUpdate,
    OtaStatus,
    MeterData,
    ModbusTcp,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_round_trips_known_strings() {
        for v in ["GET", "POST", "DELETE"] {
            assert_eq!(Verb::parse(v).as_str(), v);
        }
        assert_eq!(Verb::parse("PATCH"), Verb::Unknown);
        assert_eq!(Verb::parse("get"), Verb::Unknown);
    }

    #[test]
    fn remote_request_body_coercion() {
        let req: RemoteRequest = serde_json::from_str(
            r#"{"id":"1","path":"/api/echo","method":"POST","timestamp":1,"body":{"k":1}}"#,
        )
        .unwrap();
        assert_eq!(req.body_as_string(), r#"{"k":1}"#);

        let req: RemoteRequest = serde_json::from_str(
            r#"{"id":"1","path":"/api/echo","method":"POST","timestamp":1,"body":"plain"}"#,
        )
        .unwrap();
        assert_eq!(req.body_as_string(), "plain");

        let req: RemoteRequest =
            serde_json::from_str(r#"{"id":"1","path":"/api/echo","method":"POST","timestamp":1}"#)
                .unwrap();
        assert_eq!(req.body_as_string(), "");
    }

    #[test]
    fn error_response_shape() {
        let r = Response::error(400, "Missing credentials");
        assert_eq!(r.status, 400);
        assert_eq!(r.content_type, "application/json");
        assert_eq!(
            r.body,
            r#"{"message":"Missing credentials","status":"error"}"#
        );
    }
}
