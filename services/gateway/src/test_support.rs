//! Shared fixtures for unit tests.

use crate::actions::ActionScheduler;
use crate::config::{
    BackendConfig, GatewayConfig, IdentityConfig, LocalHttpConfig, MeterConfig, ProvisioningConfig,
    StorageConfig,
};
use crate::creds::CredStore;
use crate::diag::DiagStats;
use crate::ota::OtaHandle;
use crate::queue::ReadingQueue;
use crate::routes::RouteTable;
use crate::state::GatewayState;
use crate::wifi::{FixedStation, LogLed, WifiSupervisor};
use egw_signer::{CurveSigner, RAW_SIGNATURE_LEN, SignError, Signer};
use std::sync::Arc;

pub const TEST_KEY: &str = "4cc43b88635b9eaf81655ed51e062fab4a46296d72f01fc6fd853b08f0c2383a";

/// Deterministic curve stand-in: digest repeated twice.
pub struct EchoCurve;

impl CurveSigner for EchoCurve {
    fn sign(&self, _key: &[u8; 32], digest: &[u8; 32]) -> Result<[u8; RAW_SIGNATURE_LEN], SignError> {
        let mut out = [0u8; RAW_SIGNATURE_LEN];
        out[..32].copy_from_slice(digest);
        out[32..].copy_from_slice(digest);
        Ok(out)
    }
}

pub fn test_signer() -> Signer {
    Signer::new(TEST_KEY, Arc::new(EchoCurve)).unwrap()
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        schema_version: 1,
        identity: IdentityConfig {
            device_id: "egw-test-001".to_owned(),
            private_key_hex: TEST_KEY.to_owned(),
            public_key_hex: "ab".repeat(64),
        },
        backend: BackendConfig {
            // Unroutable: tests never reach a live backend.
            api_url: "http://127.0.0.1:1/".to_owned(),
            data_url: "http://127.0.0.1:1/gw/data/".to_owned(),
            ws_url: "ws://127.0.0.1:1/".to_owned(),
            firmware_url: "http://127.0.0.1:1/api/devices/sn/".to_owned(),
        },
        meter: MeterConfig {
            device: None,
            serial_number: "zap".to_owned(),
            model: "p1zap".to_owned(),
            buffer_size: 2048,
            frame_timeout_ms: 500,
        },
        local_http: LocalHttpConfig {
            bind: "127.0.0.1:0".to_owned(),
        },
        provisioning: ProvisioningConfig { mtu: 512 },
        storage: StorageConfig {
            sqlite_path: ":memory:".to_owned(),
        },
    }
}

pub fn test_state() -> Arc<GatewayState> {
    let creds = Arc::new(CredStore::open_in_memory().unwrap());
    let wifi = Arc::new(WifiSupervisor::new(
        Arc::new(FixedStation::default()),
        creds.clone(),
        Arc::new(LogLed),
    ));
    Arc::new(GatewayState::new(
        test_config(),
        test_signer(),
        Arc::new(ReadingQueue::new()),
        Arc::new(DiagStats::new()),
        wifi,
        Arc::new(ActionScheduler::new()),
        OtaHandle::detached(),
        creds,
    ))
}

pub fn test_table() -> RouteTable {
    RouteTable::new(&test_state())
}
