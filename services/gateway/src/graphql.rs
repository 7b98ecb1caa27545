//! Backend GraphQL mutations and queries.
//!
//! Two operations: `setConfiguration(jwt)` used by the request handler and
//! the state poller, and `gatewayConfiguration.gatewayName(id)` used by the
//! name-info endpoint. Error kinds are kept distinct so callers can log
//! network failures, protocol errors, GraphQL errors and operation-failed
//! responses differently.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// GraphQL request outcome classes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GqlError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: status {0}")]
    Http(u16),
    #[error("GraphQL returned errors: {0}")]
    Gql(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("server reported operation failure")]
    OperationFailed,
}

/// Async client for the task-side callers (request handler, state poller).
#[derive(Clone)]
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GraphQlClient {
    pub fn new(endpoint: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        GraphQlClient {
            http,
            endpoint: endpoint.to_owned(),
        }
    }

    async fn request(&self, query: &str) -> Result<Value, GqlError> {
        let body = serde_json::json!({ "query": query });
        debug!(endpoint = %self.endpoint, "sending GraphQL request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| GqlError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GqlError::Http(status.as_u16()));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| GqlError::InvalidResponse(e.to_string()))?;

        if let Some(errors) = value.get("errors") {
            return Err(GqlError::Gql(errors.to_string()));
        }
        Ok(value)
    }

    /// `setConfiguration(deviceConfigurationInputType: {jwt})` — returns
    /// `Ok(())` only when the server reports `success: true`.
    pub async fn set_configuration(&self, jwt: &str) -> Result<(), GqlError> {
        let query = format!(
            "mutation SetGatewayConfigurationWithDeviceJWT {{\n  setConfiguration(deviceConfigurationInputType: {{\n    jwt: \"{jwt}\"\n  }}) {{\n    success\n  }}\n}}"
        );
        let value = self.request(&query).await?;

        match value.pointer("/data/setConfiguration/success") {
            Some(Value::Bool(true)) => Ok(()),
            Some(Value::Bool(false)) => Err(GqlError::OperationFailed),
            _ => Err(GqlError::InvalidResponse(
                "no success field in response".to_owned(),
            )),
        }
    }

    /// `gatewayConfiguration.gatewayName(id)` — the display name assigned
    /// to this device.
    pub async fn gateway_name(&self, serial: &str) -> Result<String, GqlError> {
        let query = format!(
            "{{\n  gatewayConfiguration {{\n    gatewayName(id: \"{serial}\") {{\n      name\n    }}\n  }}\n}}"
        );
        let value = self.request(&query).await?;

        value
            .pointer("/data/gatewayConfiguration/gatewayName/name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| GqlError::InvalidResponse("name field not found".to_owned()))
    }
}

/// Blocking twin of [`GraphQlClient::gateway_name`] for synchronous
/// handlers (always invoked from a blocking-capable thread).
pub fn gateway_name_blocking(endpoint: &str, serial: &str) -> Result<String, GqlError> {
    let query = format!(
        "{{\n  gatewayConfiguration {{\n    gatewayName(id: \"{serial}\") {{\n      name\n    }}\n  }}\n}}"
    );
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| GqlError::Network(e.to_string()))?;

    let response = client
        .post(endpoint)
        .json(&serde_json::json!({ "query": query }))
        .send()
        .map_err(|e| GqlError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GqlError::Http(status.as_u16()));
    }
    let value: Value = response
        .json()
        .map_err(|e| GqlError::InvalidResponse(e.to_string()))?;

    if let Some(errors) = value.get("errors") {
        return Err(GqlError::Gql(errors.to_string()));
    }
    value
        .pointer("/data/gatewayConfiguration/gatewayName/name")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| GqlError::InvalidResponse("name field not found".to_owned()))
}
