//! REST gateway to the greenhouse data store: settings, actuator list,
//! sensor readings, actuator state persistence and the liveness ping.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::config::RestConfig;
use crate::model::{Actuator, Reading, ReadingKind, Settings};

/// Bound on every data-store request. Calls are never retried within a
/// cycle; the next cycle is the retry.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on the general internet reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The request never produced a response (refused, timed out, DNS…).
    #[error("request failed: {0}")]
    Transport(String),
    #[error("Status code: {status}\nResponse body: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response body: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn settings(&self) -> Result<Settings, GatewayError>;

    async fn actuators(&self) -> Result<Vec<Actuator>, GatewayError>;

    /// Readings of one kind recorded at or after `since`.
    async fn readings(
        &self,
        kind: ReadingKind,
        since: OffsetDateTime,
    ) -> Result<Vec<Reading>, GatewayError>;

    /// Persist an actuator's commanded state.
    async fn set_actuator_state(&self, name: &str, on: bool) -> Result<(), GatewayError>;

    /// Tell the data store the control loop is alive.
    async fn report_alive(&self) -> Result<(), GatewayError>;
}

/// Chooses an endpoint for each cycle and hands out gateways bound to it.
#[async_trait]
pub trait Uplink: Send + Sync {
    async fn is_online(&self) -> bool;

    fn gateway(&self, base_url: &str) -> Arc<dyn Gateway>;
}

/// Primary endpoint when online or when no fallback exists, else the local one.
pub fn select_endpoint(online: bool, rest: &RestConfig) -> &str {
    match (&rest.local_base_url, online) {
        (Some(local), false) => local,
        _ => &rest.base_url,
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpUplink {
    client: Client,
    probe_url: String,
}

impl HttpUplink {
    pub fn new(rest: &RestConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            probe_url: rest.probe_url.clone(),
        })
    }
}

#[async_trait]
impl Uplink for HttpUplink {
    async fn is_online(&self) -> bool {
        self.client
            .head(&self.probe_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }

    fn gateway(&self, base_url: &str) -> Arc<dyn Gateway> {
        Arc::new(HttpGateway::new(self.client.clone(), base_url))
    }
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;
        let body = ok_response(response).await?.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

async fn ok_response(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn settings(&self) -> Result<Settings, GatewayError> {
        self.get_json("/settings", &[]).await
    }

    async fn actuators(&self) -> Result<Vec<Actuator>, GatewayError> {
        self.get_json("/actuators", &[]).await
    }

    async fn readings(
        &self,
        kind: ReadingKind,
        since: OffsetDateTime,
    ) -> Result<Vec<Reading>, GatewayError> {
        let start_ms = since.unix_timestamp() * 1000;
        self.get_json(
            "/data_readings",
            &[
                ("type", kind.as_param().to_string()),
                ("start_time", start_ms.to_string()),
            ],
        )
        .await
    }

    async fn set_actuator_state(&self, name: &str, on: bool) -> Result<(), GatewayError> {
        let url = self.url(&format!("/actuators/{name}/state"));
        let request = if on {
            self.client.put(url).body("")
        } else {
            self.client.delete(url)
        };
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;
        ok_response(response).await.map(|_| ())
    }

    async fn report_alive(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url("/greenhouse_server_state"))
            .json(&serde_json::Value::Null)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport)?;
        ok_response(response).await.map(|_| ())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
