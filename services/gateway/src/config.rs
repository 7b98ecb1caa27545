//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/egw/gateway.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `identity.device_id`
//! - `identity.key_file`
//!
//! # Key file format
//! The device private key as 64 hex characters on a single line; trimmed on
//! read. Provisioned at manufacture, never generated here.

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types (deserialized from TOML)
// ---------------------------------------------------------------------------

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub schema_version: u32,
    pub identity: IdentityConfig,
    pub backend: BackendConfig,
    pub meter: MeterConfig,
    pub local_http: LocalHttpConfig,
    pub provisioning: ProvisioningConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Device serial / identifier used in every signed header.
    pub device_id: String,
    /// The private key hex (read from the key file, not the file path).
    pub private_key_hex: String,
    /// The provisioned public key, exposed by the crypto endpoints.
    pub public_key_hex: String,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// GraphQL API endpoint for mutations and queries.
    pub api_url: String,
    /// Data-ingest endpoint for signed readings.
    pub data_url: String,
    /// WebSocket URL for the configuration subscription.
    pub ws_url: String,
    /// Base URL for the firmware-version poll; the device id and
    /// `/firmwares/latest` are appended.
    pub firmware_url: String,
}

#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Serial character device carrying the meter stream. None disables
    /// the ingestion task (e.g. bench units with no meter attached).
    pub device: Option<String>,
    /// Meter serial number stamped into uplink payloads.
    pub serial_number: String,
    /// Meter model stamped into the uplink token header.
    pub model: String,
    /// Ring capacity in bytes.
    pub buffer_size: usize,
    /// Inter-frame timeout in milliseconds.
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LocalHttpConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Maximum frame size on the short-packet transport.
    pub mtu: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite file backing the credential store.
    pub sqlite_path: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    identity: Option<RawIdentity>,
    backend: Option<RawBackend>,
    meter: Option<RawMeter>,
    local_http: Option<RawLocalHttp>,
    provisioning: Option<RawProvisioning>,
    storage: Option<RawStorage>,
}

#[derive(Debug, Deserialize)]
struct RawIdentity {
    device_id: Option<String>,
    key_file: Option<String>,
    public_key_hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    api_url: Option<String>,
    data_url: Option<String>,
    ws_url: Option<String>,
    firmware_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMeter {
    device: Option<String>,
    serial_number: Option<String>,
    model: Option<String>,
    buffer_size: Option<usize>,
    frame_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawLocalHttp {
    bind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProvisioning {
    mtu: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    sqlite_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load gateway config from the default path `/etc/egw/gateway.toml`.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/egw/gateway.toml"))
}

/// Load gateway config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load gateway config from a TOML string. The key file named by
/// `identity.key_file` is read here.
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_identity = raw
        .identity
        .ok_or_else(|| ConfigError::MissingField("identity".to_owned()))?;
    let device_id = raw_identity
        .device_id
        .ok_or_else(|| ConfigError::MissingField("identity.device_id".to_owned()))?;
    let key_file = raw_identity
        .key_file
        .ok_or_else(|| ConfigError::MissingField("identity.key_file".to_owned()))?;
    let private_key_hex = read_key_file(&key_file)?;
    let identity = IdentityConfig {
        device_id,
        private_key_hex,
        public_key_hex: raw_identity.public_key_hex.unwrap_or_default(),
    };

    let backend = {
        let b = raw.backend;
        let get = |v: Option<String>, default: &str| v.unwrap_or_else(|| default.to_owned());
        match b {
            Some(b) => BackendConfig {
                api_url: get(b.api_url, "https://api.srcful.dev/"),
                data_url: get(b.data_url, "https://mainnet.srcful.dev/gw/data/"),
                ws_url: get(b.ws_url, "wss://api.srcful.dev/"),
                firmware_url: get(b.firmware_url, "https://sleipner.srcful.dev/api/devices/sn/"),
            },
            None => BackendConfig {
                api_url: "https://api.srcful.dev/".to_owned(),
                data_url: "https://mainnet.srcful.dev/gw/data/".to_owned(),
                ws_url: "wss://api.srcful.dev/".to_owned(),
                firmware_url: "https://sleipner.srcful.dev/api/devices/sn/".to_owned(),
            },
        }
    };

    let meter = match raw.meter {
        Some(m) => MeterConfig {
            device: m.device,
            serial_number: m.serial_number.unwrap_or_else(|| "zap".to_owned()),
            model: m.model.unwrap_or_else(|| "p1zap".to_owned()),
            buffer_size: m.buffer_size.unwrap_or(2048),
            frame_timeout_ms: m.frame_timeout_ms.unwrap_or(500),
        },
        None => MeterConfig {
            device: None,
            serial_number: "zap".to_owned(),
            model: "p1zap".to_owned(),
            buffer_size: 2048,
            frame_timeout_ms: 500,
        },
    };
    if meter.buffer_size == 0 {
        return Err(ConfigError::InvalidValue(
            "meter.buffer_size must be at least 1".to_owned(),
        ));
    }

    let local_http = LocalHttpConfig {
        bind: raw
            .local_http
            .and_then(|h| h.bind)
            .unwrap_or_else(|| "0.0.0.0:80".to_owned()),
    };

    let provisioning = ProvisioningConfig {
        mtu: raw
            .provisioning
            .and_then(|p| p.mtu)
            .unwrap_or(egw_protocol::egwttp::MAX_PACKET_SIZE),
    };
    if provisioning.mtu == 0 {
        return Err(ConfigError::InvalidValue(
            "provisioning.mtu must be at least 1".to_owned(),
        ));
    }

    let storage = StorageConfig {
        sqlite_path: raw
            .storage
            .and_then(|s| s.sqlite_path)
            .unwrap_or_else(|| "/var/lib/egw/gateway.sqlite3".to_owned()),
    };

    Ok(GatewayConfig {
        schema_version,
        identity,
        backend,
        meter,
        local_http,
        provisioning,
        storage,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Key file reader
// ---------------------------------------------------------------------------

fn read_key_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading key file '{path}': {e}")))?;
    Ok(content.trim().to_owned())
}
