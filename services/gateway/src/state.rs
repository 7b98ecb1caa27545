//! Shared gateway state.
//!
//! One `Arc<GatewayState>` is threaded through every task and handler. The
//! pieces with their own synchronization (queue, diagnostics, action table,
//! credential store) are aggregated here rather than wrapped again.

use crate::actions::ActionScheduler;
use crate::config::GatewayConfig;
use crate::creds::CredStore;
use crate::diag::DiagStats;
use crate::graphql::GraphQlClient;
use crate::ota::OtaHandle;
use crate::queue::ReadingQueue;
use crate::wifi::WifiSupervisor;
use egw_signer::Signer;
use meter_core::Reading;
use std::sync::{Arc, Mutex};

pub struct GatewayState {
    pub config: GatewayConfig,
    pub signer: Signer,
    pub queue: Arc<ReadingQueue>,
    pub diag: Arc<DiagStats>,
    pub wifi: Arc<WifiSupervisor>,
    pub actions: Arc<ActionScheduler>,
    pub ota: OtaHandle,
    pub creds: Arc<CredStore>,
    pub gql: GraphQlClient,
    latest_reading: Mutex<Option<Reading>>,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GatewayConfig,
        signer: Signer,
        queue: Arc<ReadingQueue>,
        diag: Arc<DiagStats>,
        wifi: Arc<WifiSupervisor>,
        actions: Arc<ActionScheduler>,
        ota: OtaHandle,
        creds: Arc<CredStore>,
    ) -> Self {
        let gql = GraphQlClient::new(&config.backend.api_url);
        GatewayState {
            config,
            signer,
            queue,
            diag,
            wifi,
            actions,
            ota,
            creds,
            gql,
            latest_reading: Mutex::new(None),
        }
    }

    /// The device serial used in every signed header.
    pub fn device_id(&self) -> &str {
        &self.config.identity.device_id
    }

    /// Publish the most recent successfully decoded reading.
    pub fn set_latest_reading(&self, reading: Reading) {
        *self.latest_reading.lock().unwrap() = Some(reading);
    }

    pub fn latest_reading(&self) -> Option<Reading> {
        self.latest_reading.lock().unwrap().clone()
    }
}
