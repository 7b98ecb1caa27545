//! Backend configuration subscription.
//!
//! One persistent `graphql-ws` channel carries configuration updates and
//! remote requests.
//!
//! # Protocol
//! 1. Connect to `ws_url` with `Sec-WebSocket-Protocol: graphql-ws`
//! 2. Send `{"type":"connection_init","payload":{}}`
//! 3. On `connection_ack`, send `start` (id "1") with the subscription
//!    query carrying the device id, a UTC timestamp in seconds, and a hex
//!    signature of `"<id>:<timestamp>"`
//! 4. `data` frames dispatch on `payload.data.configurationDataChanges.subKey`:
//!    `settings` → settings update, `request` → request handler
//! 5. Ping every 45 s; more than two outstanding pings kills the session
//! 6. On any failure, wait 5 s and reconnect

use crate::request_handler::handle_request_data;
use crate::routes::RouteTable;
use crate::state::GatewayState;
use crate::util::{boot_millis, epoch_secs};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(45);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_OUTSTANDING_PINGS: u32 = 2;

const SETTINGS_SUBKEY: &str = "settings";
const REQUEST_SUBKEY: &str = "request";

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("WS: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("keepalive timeout, {0} pings outstanding")]
    KeepaliveTimeout(u32),
    #[error("connection closed")]
    Disconnected,
}

/// Session counters for keepalive accounting.
#[derive(Debug, Default)]
struct SessionState {
    outstanding_pings: u32,
    last_ping_ms: u64,
    last_pong_ms: u64,
    subscribed: bool,
}

/// Run the subscription with automatic reconnect until shutdown.
pub async fn run_subscription(
    state: Arc<GatewayState>,
    table: Arc<RouteTable>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(url = %state.config.backend.ws_url, "subscription task started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_and_run(&state, &table, &mut shutdown).await {
            Ok(()) => break, // clean shutdown
            Err(e) => warn!(error = %e, "subscription dropped, reconnecting"),
        }

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    info!("subscription task stopped");
}

async fn connect_and_run(
    state: &Arc<GatewayState>,
    table: &Arc<RouteTable>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SubscriptionError> {
    let mut request = state
        .config
        .backend
        .ws_url
        .as_str()
        .into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        "graphql-ws".parse().expect("static header value"),
    );

    let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
    info!("control channel connected");

    run_session(ws, state, table, shutdown).await
}

/// Drive one connected session. Generic over the socket so tests can run
/// the state machine against an in-process server.
pub async fn run_session<S>(
    mut ws: S,
    state: &Arc<GatewayState>,
    table: &Arc<RouteTable>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SubscriptionError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let mut session = SessionState::default();

    ws.send(Message::Text(
        r#"{"type":"connection_init","payload":{}}"#.into(),
    ))
    .await?;
    debug!("sent connection_init");

    // The server must ack within the handshake window.
    let ack_deadline = tokio::time::Instant::now() + HANDSHAKE_TIMEOUT;
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = ws.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
            () = tokio::time::sleep_until(ack_deadline), if !session.subscribed => {
                return Err(SubscriptionError::HandshakeTimeout);
            }
            _ = ping_timer.tick() => {
                session.outstanding_pings += 1;
                session.last_ping_ms = boot_millis();
                if session.outstanding_pings > MAX_OUTSTANDING_PINGS {
                    warn!("keepalive lost, closing connection");
                    let _ = ws.send(Message::Close(None)).await;
                    return Err(SubscriptionError::KeepaliveTimeout(session.outstanding_pings));
                }
                ws.send(Message::Ping(Vec::new().into())).await?;
                debug!("sent ping");
            }
            msg = ws.next() => {
                match msg {
                    None => return Err(SubscriptionError::Disconnected),
                    Some(Err(e)) => return Err(SubscriptionError::Ws(e)),
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text_frame(&text, &mut session, state, table).await {
                            ws.send(Message::Text(reply.into())).await?;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if session.outstanding_pings > 0 {
                            session.outstanding_pings -= 1;
                            session.last_pong_ms = boot_millis();
                            debug!("received pong");
                        } else {
                            warn!("unsolicited pong");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(f) => info!(code = %f.code, reason = %f.reason, "close frame received"),
                            None => info!("close frame received"),
                        }
                        return Err(SubscriptionError::Disconnected);
                    }
                    Some(Ok(other)) => {
                        warn!(?other, "unexpected frame, resetting connection");
                        return Err(SubscriptionError::Disconnected);
                    }
                }
            }
        }
    }
}

/// Process one text frame; returns an outbound frame when one is due.
async fn handle_text_frame(
    text: &str,
    session: &mut SessionState,
    state: &Arc<GatewayState>,
    table: &Arc<RouteTable>,
) -> Option<String> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "undecodable text frame");
            return None;
        }
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("connection_ack") => {
            info!("connection acknowledged, subscribing");
            session.subscribed = true;
            Some(subscribe_frame(state))
        }
        Some("data") => {
            let changes = value.pointer("/payload/data/configurationDataChanges")?;
            let sub_key = changes.get("subKey").and_then(|k| k.as_str())?;
            match sub_key {
                SETTINGS_SUBKEY => {
                    let size = changes
                        .get("data")
                        .and_then(|d| d.as_str())
                        .map_or(0, str::len);
                    info!(size, "settings update received");
                }
                REQUEST_SUBKEY => {
                    let data = changes.get("data").and_then(|d| d.as_str())?;
                    handle_request_data(state, table, data.to_owned()).await;
                }
                other => debug!(sub_key = other, "unhandled subKey"),
            }
            None
        }
        Some("ka") => None, // server keepalive
        Some(other) => {
            debug!(frame_type = other, "ignoring frame");
            None
        }
        None => None,
    }
}

/// The `start` frame carrying the authenticated subscription query.
fn subscribe_frame(state: &Arc<GatewayState>) -> String {
    let timestamp = epoch_secs().to_string();
    let serial = state.device_id();
    let signature = state
        .signer
        .sign_hex(&format!("{serial}:{timestamp}"))
        .unwrap_or_default();

    let query = format!(
        "subscription {{\n  configurationDataChanges(deviceAuth: {{\n    id: \"{serial}\",\n    timestamp: \"{timestamp}\",\n    signedIdAndTimestamp: \"{signature}\"\n  }}) {{\n    data\n    subKey\n  }}\n}}"
    );

    serde_json::json!({
        "id": "1",
        "type": "start",
        "payload": { "query": query },
    })
    .to_string()
}
