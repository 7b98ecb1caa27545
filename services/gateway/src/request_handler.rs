//! Remote request handling.
//!
//! The subscription task hands `request` payloads here. The request is
//! validated (shape, freshness), routed through the route table, and the
//! handler's response is wrapped in a signed `subKey=response` token posted
//! back through the `setConfiguration` mutation.
//!
//! The pure evaluation step is separated from the signing/posting step so
//! the rejection rules are testable without a backend.

use crate::routes::RouteTable;
use crate::state::GatewayState;
use crate::util::epoch_millis;
use egw_protocol::{EndpointKind, RemoteRequest, RequestEnvelope, Response, Verb};
use egw_signer::Signer;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Requests older than this are rejected outright.
const MAX_REQUEST_AGE_MS: u64 = 60_000;

/// What evaluation decided to do with an inbound payload.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The payload carries no id/path/method: configuration data, not a
    /// request.
    NotARequest,
    /// Validated and routed (or rejected with an error response); the
    /// response must be signed and posted back under the request id.
    Respond { id: String, response: Response },
}

/// Validate and route one decoded request payload.
///
/// `data` is the raw JSON string found under `configurationDataChanges.data`.
pub fn evaluate_request(data: &str, now_ms: u64, table: &RouteTable) -> RequestOutcome {
    let Ok(request) = serde_json::from_str::<RemoteRequest>(data) else {
        return RequestOutcome::NotARequest;
    };

    // Replay guard: reject anything older than a minute.
    if request.timestamp < now_ms.saturating_sub(MAX_REQUEST_AGE_MS) {
        warn!(
            id = %request.id,
            timestamp = request.timestamp,
            now = now_ms,
            "request too old"
        );
        return RequestOutcome::Respond {
            id: request.id,
            response: Response::status(400, r#"{"error":"Request too old"}"#),
        };
    }

    let verb = Verb::parse(&request.method);
    let endpoint = table.to_endpoint(&request.path, verb);
    if endpoint.kind == EndpointKind::Unknown {
        warn!(path = %request.path, method = %request.method, "endpoint not found");
        return RequestOutcome::Respond {
            id: request.id,
            response: Response::status(400, r#"{"error":"Endpoint not found"}"#),
        };
    }

    let envelope = RequestEnvelope::new(request.path.clone(), verb, request.body_as_string());
    info!(id = %request.id, path = %request.path, method = %request.method, "routing request");
    let response = table.route(&envelope);

    RequestOutcome::Respond {
        id: request.id,
        response,
    }
}

/// Wrap a handler response in the signed response token.
pub fn build_response_jwt(
    signer: &Signer,
    device_id: &str,
    request_id: &str,
    response: &Response,
) -> Result<String, egw_signer::SignError> {
    let header = serde_json::json!({
        "alg": "ES256",
        "typ": "JWT",
        "device": device_id,
        "subKey": "response",
    })
    .to_string();

    let payload = serde_json::json!({
        "id": request_id,
        "timestamp": epoch_millis(),
        "code": response.status,
        "response": response.body,
    })
    .to_string();

    signer.sign_jwt(&header, &payload)
}

/// Full path for the subscription task: evaluate on a blocking thread
/// (handlers are synchronous), then sign and post the response.
pub async fn handle_request_data(state: &Arc<GatewayState>, table: &Arc<RouteTable>, data: String) {
    let eval_table = table.clone();
    let outcome =
        tokio::task::spawn_blocking(move || evaluate_request(&data, epoch_millis(), &eval_table))
            .await
            .unwrap_or(RequestOutcome::NotARequest);

    let RequestOutcome::Respond { id, response } = outcome else {
        info!("received non-request configuration data");
        return;
    };

    let jwt = match build_response_jwt(&state.signer, state.device_id(), &id, &response) {
        Ok(jwt) => jwt,
        Err(e) => {
            error!(id = %id, error = %e, "failed to sign response");
            return;
        }
    };

    match state.gql.set_configuration(&jwt).await {
        Ok(()) => info!(id = %id, code = response.status, "response delivered"),
        Err(e) => error!(id = %id, error = %e, "failed to deliver response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_signer, test_table};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn request_json(id: &str, path: &str, method: &str, timestamp: u64, body: &str) -> String {
        serde_json::json!({
            "id": id,
            "path": path,
            "method": method,
            "timestamp": timestamp,
            "body": body,
        })
        .to_string()
    }

    #[test]
    fn fresh_request_is_routed() {
        let table = test_table();
        let now: u64 = 1_000_000;
        let data = request_json("r1", "/api/echo", "POST", now - 59_000, "Hello World!");

        match evaluate_request(&data, now, &table) {
            RequestOutcome::Respond { id, response } => {
                assert_eq!(id, "r1");
                assert_eq!(response.status, 200);
                assert_eq!(response.body, r#"{"echo":"Hello World!"}"#);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn stale_request_is_rejected() {
        let table = test_table();
        let now: u64 = 1_000_000;
        let data = request_json("r2", "/api/echo", "POST", now - 61_000, "late");

        match evaluate_request(&data, now, &table) {
            RequestOutcome::Respond { id, response } => {
                assert_eq!(id, "r2");
                assert_eq!(response.status, 400);
                assert!(response.body.contains("Request too old"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_route_is_rejected() {
        let table = test_table();
        let data = request_json("r3", "/api/nope", "GET", 1_000, "");

        match evaluate_request(&data, 1_000, &table) {
            RequestOutcome::Respond { id, response } => {
                assert_eq!(id, "r3");
                assert_eq!(response.status, 400);
                assert!(response.body.contains("Endpoint not found"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn object_bodies_are_coerced_to_strings() {
        let table = test_table();
        let data = serde_json::json!({
            "id": "r4",
            "path": "/api/echo",
            "method": "POST",
            "timestamp": 5_000u64,
            "body": {"nested": true},
        })
        .to_string();

        match evaluate_request(&data, 5_000, &table) {
            RequestOutcome::Respond { response, .. } => {
                assert_eq!(response.body, r#"{"echo":"{\"nested\":true}"}"#);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn non_request_payload_is_ignored() {
        let table = test_table();
        assert_eq!(
            evaluate_request(r#"{"setting":"value"}"#, 0, &table),
            RequestOutcome::NotARequest
        );
        assert_eq!(
            evaluate_request("not json", 0, &table),
            RequestOutcome::NotARequest
        );
    }

    #[test]
    fn response_jwt_carries_id_code_and_body() {
        let signer = test_signer();
        let response = Response::ok(r#"{"echo":"x"}"#);
        let jwt = build_response_jwt(&signer, "egw-test-001", "req-9", &response).unwrap();

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["device"], "egw-test-001");
        assert_eq!(header["subKey"], "response");

        let payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(payload["id"], "req-9");
        assert_eq!(payload["code"], 200);
        assert_eq!(payload["response"], r#"{"echo":"x"}"#);
    }
}
