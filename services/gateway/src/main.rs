// gateway: Energy-meter gateway daemon.
//
// Reads meter telegrams from the serial diagnostic port, signs and uplinks
// readings, and stays remotely manageable over the backend subscription,
// local HTTP and the provisioning transport.

use gateway::actions::ActionScheduler;
use gateway::config;
use gateway::creds::CredStore;
use gateway::curve::{P256Curve, derive_public_key_hex};
use gateway::diag::DiagStats;
use gateway::ota::{self, FileSink, FirmwareSink};
use gateway::provisioning::ProvisioningChannel;
use gateway::queue::ReadingQueue;
use gateway::routes::RouteTable;
use gateway::state::GatewayState;
use gateway::supervisor::Supervisor;
use gateway::util::boot_millis;
use gateway::wifi::{FixedStation, LogLed, WifiSupervisor};
use gateway::{ingest, local_http, subscription, uplink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    boot_millis(); // pin the boot clock

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let mut cfg = {
        let loaded = match std::env::args().nth(1) {
            Some(path) => config::load_config_from_path(Path::new(&path)),
            None => config::load_config(),
        };
        match loaded {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        }
    };

    if cfg.identity.public_key_hex.is_empty() {
        match derive_public_key_hex(&cfg.identity.private_key_hex) {
            Some(pk) => cfg.identity.public_key_hex = pk,
            None => warn!("could not derive public key from provisioned key"),
        }
    }

    let signer = match egw_signer::Signer::new(&cfg.identity.private_key_hex, Arc::new(P256Curve)) {
        Ok(signer) => signer,
        Err(e) => {
            eprintln!("FATAL: invalid device key: {e}");
            std::process::exit(1);
        }
    };

    // Credential store failures are never fatal; fall back to memory.
    let creds = match CredStore::open(Path::new(&cfg.storage.sqlite_path)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, path = %cfg.storage.sqlite_path, "credential store unavailable, using memory");
            Arc::new(CredStore::open_in_memory().expect("in-memory store"))
        }
    };

    // The radio driver is platform glue; the fixed station stands in on
    // wired builds.
    let wifi = Arc::new(WifiSupervisor::new(
        Arc::new(FixedStation::default()),
        creds.clone(),
        Arc::new(LogLed),
    ));

    let diag = Arc::new(DiagStats::new());
    diag.set_reset_reason("poweron");

    let actions = Arc::new(ActionScheduler::new());
    let staged_path = staged_firmware_path(&cfg.storage.sqlite_path);
    let sink_path = staged_path.clone();
    let ota_handle = ota::spawn_ota_task(
        Arc::new(move || Box::new(FileSink::new(sink_path.clone())) as Box<dyn FirmwareSink>),
        actions.clone(),
    );
    info!(path = %staged_path.display(), "ota staging path");

    let state = Arc::new(GatewayState::new(
        cfg.clone(),
        signer,
        Arc::new(ReadingQueue::new()),
        diag,
        wifi.clone(),
        actions,
        ota_handle,
        creds,
    ));

    let table = Arc::new(RouteTable::new(&state));
    let provisioning = Arc::new(ProvisioningChannel::new(cfg.provisioning.mtu));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Auto-connect with provisioned credentials before the tasks spin up.
    {
        let wifi = wifi.clone();
        let _ = tokio::task::spawn_blocking(move || wifi.auto_connect()).await;
    }

    // Meter ingestion, when a serial device is configured.
    if let Some(device) = cfg.meter.device.clone() {
        match tokio::fs::File::open(&device).await {
            Ok(file) => {
                let state = state.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    ingest::run_ingestion(file, state, shutdown).await;
                });
            }
            Err(e) => error!(device = %device, error = %e, "cannot open meter device"),
        }
    } else {
        info!("no meter device configured, ingestion disabled");
    }

    tokio::spawn(uplink::run_uplink(state.clone(), shutdown_rx.clone()));
    tokio::spawn(subscription::run_subscription(
        state.clone(),
        table.clone(),
        shutdown_rx.clone(),
    ));

    if let Err(e) = local_http::start(&cfg.local_http.bind, table.clone()).await {
        error!(error = %e, bind = %cfg.local_http.bind, "local http server failed to start");
    }

    let supervisor = Supervisor::new(state, table, provisioning);
    let supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), supervisor_handle).await;
    info!("gateway stopped");
}

/// Stage firmware images next to the credential database.
fn staged_firmware_path(sqlite_path: &str) -> PathBuf {
    let base = Path::new(sqlite_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join("firmware.staged")
}
