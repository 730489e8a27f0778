//! # Kubernetes Operator Manager
//!
//! Process lifecycle for the operator: client, health server, controller
//! task and shutdown handling.

use crate::cluster::KubeClusterApi;
use crate::controller::{install_crd, ControllerMetrics, HotStandbyController, MetricsSnapshot};
use crate::error::Result;
use crate::probe::ReqwestProber;
use crate::reconciler::HotStandbyReconciler;
use crate::OperatorConfig;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main operator manager
pub struct OperatorManager {
    config: OperatorConfig,
    client: Client,
    reconciler: Arc<HotStandbyReconciler>,
    metrics: Arc<ControllerMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl OperatorManager {
    /// Create a new operator manager. Credentials come from the in-cluster
    /// service account when present, otherwise from the local kubeconfig.
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        let metrics = Arc::new(ControllerMetrics::default());
        let reconciler = Arc::new(HotStandbyReconciler::with_metrics(
            Arc::new(KubeClusterApi::new(client.clone())),
            Arc::new(ReqwestProber::default()),
            Arc::clone(&metrics),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            client,
            reconciler,
            metrics,
            shutdown_tx,
        })
    }

    /// Start the operator and block until shutdown
    pub async fn run(self) -> Result<()> {
        info!("Starting hot-standby operator v{}", env!("CARGO_PKG_VERSION"));
        info!("Configuration: {:?}", self.config);

        if self.config.install_crd {
            install_crd(self.client.clone()).await?;
        }

        let health_handle = self.start_health_server().await?;

        let controller = HotStandbyController::new(
            self.client.clone(),
            Arc::clone(&self.reconciler),
            self.config.controller_config(),
        );
        let controller_handle = tokio::spawn(async move {
            if let Err(e) = controller.run().await {
                error!("Controller failed: {}", e);
            }
        });

        self.wait_for_shutdown().await?;

        info!("Shutdown signal received, stopping operator...");
        controller_handle.abort();
        health_handle.abort();

        info!("Hot-standby operator stopped");
        Ok(())
    }

    /// Bind and serve `/health`, `/ready` and `/metrics`
    async fn start_health_server(&self) -> Result<JoinHandle<()>> {
        let addr: SocketAddr = self.config.health_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Starting health server on {}", addr);

        let app = health_routes(Arc::clone(&self.metrics));
        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Health server failed: {}", e);
            }
        }))
    }

    /// Wait for SIGINT, SIGTERM or an internal shutdown request
    async fn wait_for_shutdown(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = shutdown_rx.recv() => {
                info!("Received shutdown signal from internal component");
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Send shutdown signal
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Health and metrics routes
pub fn health_routes(metrics: Arc<ControllerMetrics>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<ControllerMetrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Operator builder for fluent configuration
pub struct OperatorBuilder {
    config: OperatorConfig,
}

impl OperatorBuilder {
    pub fn new() -> Self {
        Self {
            config: OperatorConfig::default(),
        }
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.config.namespace = namespace;
        self
    }

    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.config.resync_interval = interval;
        self
    }

    pub fn error_requeue(mut self, delay: Duration) -> Self {
        self.config.error_requeue = delay;
        self
    }

    pub fn health_addr(mut self, addr: SocketAddr) -> Self {
        self.config.health_addr = addr;
        self
    }

    pub fn install_crd(mut self, install: bool) -> Self {
        self.config.install_crd = install;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub async fn build(self) -> Result<OperatorManager> {
        OperatorManager::new(self.config).await
    }
}

impl Default for OperatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
