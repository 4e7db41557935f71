//! Health probes.
//!
//! A probe answers one question about one backend: should it receive
//! traffic right now? The monitor owns timing (interval and timeout); probes
//! only do the check.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::{HealthCheckConfig, ProbeKind};
use crate::load_balancer::connector::host_of;

/// Galera status fields that must read `ON` for a node to take writes.
const SYNC_FIELDS: [&str; 2] = ["wsrep_connected", "wsrep_ready"];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    Connect(#[from] io::Error),

    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("status endpoint returned {0}")]
    Status(u16),

    #[error("{field} is {value}")]
    NotSynced { field: &'static str, value: String },

    #[error("malformed status body: {0}")]
    Malformed(String),
}

/// Checks whether a backend is fit for traffic.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<(), ProbeError>;
}

/// Build the probe selected in the configuration.
pub fn from_config(config: &HealthCheckConfig) -> Result<Arc<dyn HealthProbe>, ProbeError> {
    Ok(match config.probe {
        ProbeKind::Tcp => Arc::new(TcpConnectProbe),
        ProbeKind::Http => Arc::new(HttpStatusProbe::new(config.status_port, &config.path, config.timeout())?),
    })
}

/// Up if a TCP connection to the backend address can be established.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnectProbe;

#[async_trait]
impl HealthProbe for TcpConnectProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        let _stream = TcpStream::connect(address).await?;
        Ok(())
    }
}

/// Queries an HTTP status endpoint next to the backend.
///
/// The request goes to `http://<backend host>:<port><path>`. A 2xx answer is
/// Up unless the body is a JSON object whose cluster status fields say the
/// node is not synced. A plain-text 200 (clustercheck style) is Up.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
}

impl HttpStatusProbe {
    pub fn new(port: u16, path: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tcp-balancer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Ok(Self { client, port, path })
    }

    pub fn url_for(&self, address: &str) -> String {
        format!("http://{}:{}{}", host_of(address), self.port, self.path)
    }
}

#[async_trait]
impl HealthProbe for HttpStatusProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        let response = self.client.get(self.url_for(address)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        evaluate_status_body(&body)
    }
}

/// Judge a successful status response body.
pub fn evaluate_status_body(body: &str) -> Result<(), ProbeError> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('{') {
        return Ok(());
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| ProbeError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(ProbeError::Malformed("expected a JSON object".to_string()));
    };

    for field in SYNC_FIELDS {
        match fields.get(field) {
            None => {}
            Some(Value::String(s)) if s.eq_ignore_ascii_case("on") => {}
            Some(Value::Bool(true)) => {}
            Some(Value::String(s)) => {
                return Err(ProbeError::NotSynced {
                    field,
                    value: s.clone(),
                })
            }
            Some(other) => {
                return Err(ProbeError::NotSynced {
                    field,
                    value: other.to_string(),
                })
            }
        }
    }
    Ok(())
}
