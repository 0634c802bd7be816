//! Prometheus exporter for alarm metrics

use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{ConditionError, Result};
use crate::metrics::{AlarmMetrics, AlarmMetricsAggregator};

/// Metrics server configuration
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the metrics server to
    pub bind_address: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ([127, 0, 0, 1], 9090).into(),
        }
    }
}

#[derive(Clone)]
struct ServerState {
    handle: PrometheusHandle,
    aggregator: Arc<AlarmMetricsAggregator>,
}

/// Serves `/metrics` (Prometheus text) and `/alarms/metrics` (JSON per scope)
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: ServerState,
}

impl MetricsServer {
    /// Install the global Prometheus recorder
    pub fn new(config: MetricsServerConfig, aggregator: Arc<AlarmMetricsAggregator>) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ConditionError::Metrics(e.to_string()))?;

        Ok(Self {
            config,
            state: ServerState { handle, aggregator },
        })
    }

    /// Serve until the listener fails
    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(render_prometheus))
            .route("/alarms/metrics", get(render_alarm_metrics))
            .with_state(self.state);

        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!("Metrics server listening on {}", self.config.bind_address);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn render_prometheus(State(state): State<ServerState>) -> String {
    state.handle.render()
}

async fn render_alarm_metrics(State(state): State<ServerState>) -> Json<Vec<AlarmMetrics>> {
    Json(state.aggregator.snapshots())
}
