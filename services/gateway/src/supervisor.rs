//! Supervisor: the cooperative main loop.
//!
//! Each ~100 ms tick services the passive per-tick work — one provisioning
//! request, the Wi-Fi scan flag, the state and OTA pollers — and executes
//! any deferred actions that have come due. The reboot executor is the one
//! deliberate process exit in the gateway; the service manager brings the
//! process back up.

use crate::actions::ActionKind;
use crate::poller::{OtaPoller, StatePoller};
use crate::provisioning::ProvisioningChannel;
use crate::routes::RouteTable;
use crate::state::GatewayState;
use crate::util::boot_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const TICK: Duration = Duration::from_millis(100);

pub struct Supervisor {
    state: Arc<GatewayState>,
    table: Arc<RouteTable>,
    provisioning: Arc<ProvisioningChannel>,
    state_poller: StatePoller,
    ota_poller: OtaPoller,
}

impl Supervisor {
    pub fn new(
        state: Arc<GatewayState>,
        table: Arc<RouteTable>,
        provisioning: Arc<ProvisioningChannel>,
    ) -> Self {
        let state_poller = StatePoller::new(state.clone());
        let ota_poller = OtaPoller::new(state.clone());
        Supervisor {
            state,
            table,
            provisioning,
            state_poller,
            ota_poller,
        }
    }

    /// Run the main loop until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("supervisor started");
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
        info!("supervisor stopped");
    }

    async fn tick(&mut self) {
        // One provisioning request per tick, routed off the async loop.
        if self.provisioning.has_pending() {
            let provisioning = self.provisioning.clone();
            let table = self.table.clone();
            let joined =
                tokio::task::spawn_blocking(move || provisioning.process_one(&table)).await;
            if joined.is_err() {
                warn!("provisioning dispatch failed");
            }
        }

        // Scan runs on the blocking pool; the radio driver may stall.
        if self.state.wifi.scan_requested() {
            let wifi = self.state.wifi.clone();
            let _ = tokio::task::spawn_blocking(move || wifi.scan_if_requested()).await;
        }

        self.state_poller.tick().await;
        self.ota_poller.tick().await;

        for action in self.state.actions.take_due(boot_millis()) {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: ActionKind) {
        info!(?action, "executing deferred action");
        match action {
            ActionKind::Reboot => execute_reboot().await,
            ActionKind::WifiDisconnect => {
                let wifi = self.state.wifi.clone();
                let _ = tokio::task::spawn_blocking(move || wifi.disconnect()).await;
            }
            ActionKind::SendState => self.state_poller.trigger(),
            ActionKind::BleDisconnect => self.provisioning.stop(),
        }
    }
}

/// Exit so the service manager restarts the gateway. A short pause lets
/// log output and in-flight responses flush.
async fn execute_reboot() {
    warn!("rebooting");
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::process::exit(0);
}
