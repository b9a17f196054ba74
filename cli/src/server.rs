// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Controller HTTP server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use oim_core::{
    application::{
        controller::{ControllerSettings, StandardController},
        registration::{RegistrationConfig, RegistrationHandle, RegistrationLoop},
    },
    domain::{backend::BlockBackend, controller_config::ControllerConfigManifest},
    infrastructure::{event_bus::EventBus, registry::create_registry, spdk::SpdkBackend},
    presentation::api::app,
};

pub async fn run(config: ControllerConfigManifest) -> Result<()> {
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        "OIM controller starting: controller_id={}",
        config.spec.controller.id
    );

    install_metrics_exporter(&config)?;

    let backend: Option<Arc<dyn BlockBackend>> = match &config.spec.backend.socket_path {
        Some(path) => {
            let backend = SpdkBackend::connect(path)
                .await
                .with_context(|| format!("Failed to connect to SPDK at {}", path.display()))?;
            info!("Connected to SPDK at {}", path.display());
            Some(Arc::new(backend))
        }
        None => {
            warn!("No SPDK socket configured; volume operations will be unavailable");
            None
        }
    };

    let event_bus = Arc::new(EventBus::with_default_capacity());
    let settings = ControllerSettings {
        vhost_controller: config.spec.vhost.controller_name.clone(),
        pci_address: config.pci_address()?,
    };
    let controller = Arc::new(StandardController::new(backend, settings, event_bus.clone()));

    if controller.is_connected() {
        let created = controller
            .ensure_scsi_controller()
            .await
            .context("Failed to prepare the vhost SCSI controller")?;
        if created {
            info!(
                "Created vhost SCSI controller {}",
                controller.settings().vhost_controller.as_deref().unwrap_or_default()
            );
        }
    }

    let registration = start_registration(&config, event_bus)?;

    if config.spec.server.tls.is_some() {
        warn!("spec.server.tls is set but TLS termination is not handled here; serving plain HTTP");
    }

    let addr = format!("{}:{}", config.spec.server.bind_address, config.spec.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Controller listening on {}", addr);

    let served = axum::serve(listener, app(controller))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    if let Some(handle) = registration {
        handle.stop().await;
    }

    info!("Controller shutting down");

    served
}

fn start_registration(
    config: &ControllerConfigManifest,
    event_bus: Arc<EventBus>,
) -> Result<Option<RegistrationHandle>> {
    let Some(endpoint) = &config.spec.registry.endpoint else {
        info!("No registry configured; skipping self-registration");
        return Ok(None);
    };

    let registry = create_registry(endpoint).context("Failed to create registry client")?;
    let handle = RegistrationLoop::new(
        registry,
        RegistrationConfig {
            controller_id: config.spec.controller.id.clone(),
            controller_address: config.spec.controller.address.clone().unwrap_or_default(),
            delay: config.registry_delay(),
        },
    )
    .with_event_bus(event_bus)
    .start();

    Ok(Some(handle))
}

fn install_metrics_exporter(config: &ControllerConfigManifest) -> Result<()> {
    let Some(metrics) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    else {
        return Ok(());
    };

    if metrics.path != "/metrics" {
        warn!(
            "Prometheus exporter always serves every path; ignoring metrics path {}",
            metrics.path
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
