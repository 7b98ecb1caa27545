//! Route table and handler registry.
//!
//! One append-only table maps `(path, verb)` pairs to handler objects; the
//! remote request handler, the local HTTP server and the provisioning
//! transport all dispatch through it. Handlers complete synchronously
//! (anything slow becomes a deferred action or a task message); async
//! surfaces call them through `spawn_blocking`.

pub mod crypto;
pub mod meter;
pub mod modbus;
pub mod ota;
pub mod system;
pub mod wifi;

use crate::state::GatewayState;
use egw_protocol::{EndpointKind, RequestEnvelope, Response, Verb};
use std::sync::Arc;

// Path constants. DO NOT RENAME: these are the deployed API surface.
pub const WIFI_CONFIG_PATH: &str = "/api/wifi";
pub const WIFI_RESET_PATH: &str = "/api/wifi";
pub const WIFI_STATUS_PATH: &str = "/api/wifi";
pub const WIFI_SCAN_PATH: &str = "/api/wifi/scan";
pub const SYSTEM_INFO_PATH: &str = "/api/system";
pub const SYSTEM_REBOOT_PATH: &str = "/api/system/reboot";
pub const CRYPTO_INFO_PATH: &str = "/api/crypto";
pub const CRYPTO_SIGN_PATH: &str = "/api/crypto/sign";
pub const NAME_INFO_PATH: &str = "/api/name";
pub const DEBUG_PATH: &str = "/api/debug";
pub const ECHO_PATH: &str = "/api/echo";
pub const BLE_STOP_PATH: &str = "/api/ble/stop";
pub const OTA_UPDATE_PATH: &str = "/api/ota/update";
pub const OTA_STATUS_PATH: &str = "/api/ota/status";
pub const METER_DATA_PATH: &str = "/api/data/p1/obis";
pub const MODBUS_TCP_PATH: &str = "/api/modbus/tcp";

/// A request handler. Implementations are synchronous and must not block
/// beyond their own fixed I/O timeouts.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, request: &RequestEnvelope) -> Response;
}

/// One route-table entry.
#[derive(Clone)]
pub struct Route {
    pub kind: EndpointKind,
    pub verb: Verb,
    pub path: &'static str,
    pub handler: Arc<dyn RouteHandler>,
}

/// The append-only route table plus the unknown-endpoint sentinel.
pub struct RouteTable {
    routes: Vec<Route>,
    unknown: Route,
}

struct UnknownHandler;

impl RouteHandler for UnknownHandler {
    fn handle(&self, _request: &RequestEnvelope) -> Response {
        Response::error(404, "Endpoint not found")
    }
}

impl RouteTable {
    /// Build the full handler set against the shared state.
    pub fn new(state: &Arc<GatewayState>) -> Self {
        let routes = vec![
            Route {
                kind: EndpointKind::WifiConfig,
                verb: Verb::Post,
                path: WIFI_CONFIG_PATH,
                handler: Arc::new(wifi::WifiConfigHandler::new(state)),
            },
            Route {
                kind: EndpointKind::SystemInfo,
                verb: Verb::Get,
                path: SYSTEM_INFO_PATH,
                handler: Arc::new(system::SystemInfoHandler::new(state)),
            },
            Route {
                kind: EndpointKind::SystemReboot,
                verb: Verb::Post,
                path: SYSTEM_REBOOT_PATH,
                handler: Arc::new(system::SystemRebootHandler::new(state)),
            },
            Route {
                kind: EndpointKind::WifiReset,
                verb: Verb::Delete,
                path: WIFI_RESET_PATH,
                handler: Arc::new(wifi::WifiResetHandler::new(state)),
            },
            Route {
                kind: EndpointKind::CryptoInfo,
                verb: Verb::Get,
                path: CRYPTO_INFO_PATH,
                handler: Arc::new(crypto::CryptoInfoHandler::new(state)),
            },
            Route {
                kind: EndpointKind::NameInfo,
                verb: Verb::Get,
                path: NAME_INFO_PATH,
                handler: Arc::new(crypto::NameInfoHandler::new(state)),
            },
            Route {
                kind: EndpointKind::WifiStatus,
                verb: Verb::Get,
                path: WIFI_STATUS_PATH,
                handler: Arc::new(wifi::WifiStatusHandler::new(state)),
            },
            Route {
                kind: EndpointKind::WifiScan,
                verb: Verb::Get,
                path: WIFI_SCAN_PATH,
                handler: Arc::new(wifi::WifiScanHandler::new(state)),
            },
            Route {
                kind: EndpointKind::Debug,
                verb: Verb::Get,
                path: DEBUG_PATH,
                handler: Arc::new(system::DebugHandler::new(state)),
            },
            Route {
                kind: EndpointKind::BleStop,
                verb: Verb::Post,
                path: BLE_STOP_PATH,
                handler: Arc::new(system::BleStopHandler::new(state)),
            },
            Route {
                kind: EndpointKind::CryptoSign,
                verb: Verb::Post,
                path: CRYPTO_SIGN_PATH,
                handler: Arc::new(crypto::CryptoSignHandler::new(state)),
            },
            Route {
                kind: EndpointKind::Echo,
                verb: Verb::Post,
                path: ECHO_PATH,
                handler: Arc::new(system::EchoHandler),
            },
            Route {
                kind: EndpointKind::OtaUpdate,
                verb: Verb::Post,
                path: OTA_UPDATE_PATH,
                handler: Arc::new(ota::OtaUpdateHandler::new(state)),
            },
            Route {
                kind: EndpointKind::OtaStatus,
                verb: Verb::Get,
                path: OTA_STATUS_PATH,
                handler: Arc::new(ota::OtaStatusHandler::new(state)),
            },
            Route {
                kind: EndpointKind::MeterData,
                verb: Verb::Get,
                path: METER_DATA_PATH,
                handler: Arc::new(meter::MeterDataHandler::new(state)),
            },
            Route {
                kind: EndpointKind::ModbusTcp,
                verb: Verb::Post,
                path: MODBUS_TCP_PATH,
                handler: Arc::new(modbus::ModbusTcpHandler),
            },
        ];

        RouteTable {
            routes,
            unknown: Route {
                kind: EndpointKind::Unknown,
                verb: Verb::Unknown,
                path: "",
                handler: Arc::new(UnknownHandler),
            },
        }
    }

    /// First entry matching `(path, verb)`, or the unknown sentinel.
    pub fn to_endpoint(&self, path: &str, verb: Verb) -> &Route {
        self.routes
            .iter()
            .find(|r| r.path == path && r.verb == verb)
            .unwrap_or(&self.unknown)
    }

    /// Dispatch a request to its handler.
    pub fn route(&self, request: &RequestEnvelope) -> Response {
        self.to_endpoint(&request.path, request.verb)
            .handler
            .handle(request)
    }

    pub fn entries(&self) -> &[Route] {
        &self.routes
    }
}
