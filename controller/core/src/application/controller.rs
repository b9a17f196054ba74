// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Controller Application Service
//!
//! Turns MapVolume / UnmapVolume / ProvisionBDev / CheckBDev requests into
//! backend calls. Coordinates:
//! - Domain layer: BlockBackend trait, volume value objects
//! - Infrastructure layer: KeyMutex for per-volume exclusion
//! - Event bus: publishing ControllerEvents for observability
//!
//! Every operation re-reads the backend and is safe to repeat. Operations
//! on the same name are serialized by the keyed lock; operations on
//! different names run in parallel. Dropping an operation's future stops
//! waiting but does not abort a backend call already sent.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::reconcile;
use crate::domain::backend::{codes, BackendError, BlockBackend, MallocBDevRequest, RbdBDevRequest};
use crate::domain::events::ControllerEvent;
use crate::domain::volume::{MapVolumeParams, MappingResult, PciAddress, VolumeId};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::keymutex::KeyMutex;

/// Targets tried per vhost SCSI controller (SPDK's default capacity).
pub const MAX_SCSI_TARGETS: u32 = 8;

/// Volumes are always attached as LUN 0 of their target.
pub const MAPPED_LUN: u32 = 0;

/// Block size for every device the controller creates.
pub const DEFAULT_BLOCK_SIZE: u64 = 512;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("BDev {name} already exists with size {actual}, requested {requested}")]
    AlreadyExists {
        name: String,
        requested: u64,
        actual: u64,
    },

    #[error("{operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("no SCSI target of {controller} accepted {device} after {attempts} attempts: {source}")]
    TargetsExhausted {
        device: String,
        controller: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },
}

impl ControllerError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Backend { .. } => "backend",
            Self::TargetsExhausted { .. } => "exhausted",
        }
    }
}

fn backend_failure(operation: &'static str) -> impl FnOnce(BackendError) -> ControllerError {
    move |source| ControllerError::Backend { operation, source }
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait VolumeController: Send + Sync {
    /// Ensure the volume's device exists and is attached to the configured
    /// vhost SCSI controller. Repeating the call returns the same mapping.
    async fn map_volume(
        &self,
        volume_id: &VolumeId,
        params: &MapVolumeParams,
    ) -> Result<MappingResult, ControllerError>;

    /// Detach the volume everywhere and delete its device unless it is a
    /// malloc device. Unmapping an unknown volume succeeds.
    async fn unmap_volume(&self, volume_id: &VolumeId) -> Result<(), ControllerError>;

    /// Ensure a malloc device of exactly `size` bytes exists under `name`.
    /// A size of zero deletes the device instead.
    async fn provision_bdev(&self, name: &str, size: u64) -> Result<(), ControllerError>;

    /// Succeed iff exactly one device named `name` exists.
    async fn check_bdev(&self, name: &str) -> Result<(), ControllerError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

/// Static wiring of a controller, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    /// vhost SCSI controller volumes are attached to
    pub vhost_controller: Option<String>,
    /// PCI address reported back to callers. Configured-but-unknown is
    /// `Some(PciAddress::unknown())`, not `None`.
    pub pci_address: Option<PciAddress>,
}

pub struct StandardController {
    backend: Option<Arc<dyn BlockBackend>>,
    settings: ControllerSettings,
    locks: KeyMutex,
    event_bus: Arc<EventBus>,
}

impl StandardController {
    /// `backend: None` builds a disconnected controller whose operations
    /// all fail with a configuration error.
    pub fn new(
        backend: Option<Arc<dyn BlockBackend>>,
        settings: ControllerSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            backend,
            settings,
            locks: KeyMutex::default(),
            event_bus,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_some()
    }

    /// Create the configured vhost SCSI controller if SPDK does not have it
    /// yet. Returns whether it was created. Without a configured controller
    /// there is nothing to do.
    pub async fn ensure_scsi_controller(&self) -> Result<bool, ControllerError> {
        let backend = self.backend()?;
        let Some(controller) = self.settings.vhost_controller.as_deref() else {
            return Ok(false);
        };

        let controllers = backend
            .list_scsi_controllers()
            .await
            .map_err(backend_failure("get_vhost_controllers"))?;
        if controllers.iter().any(|c| c.name == controller) {
            debug!("vhost SCSI controller {} already present", controller);
            return Ok(false);
        }

        match backend.create_scsi_controller(controller, None).await {
            Ok(()) => Ok(true),
            // Created concurrently by someone else.
            Err(e) if e.is_code(codes::EEXIST) => Ok(false),
            Err(e) => Err(backend_failure("construct_vhost_scsi_controller")(e)),
        }
    }

    fn backend(&self) -> Result<&Arc<dyn BlockBackend>, ControllerError> {
        self.backend
            .as_ref()
            .ok_or_else(|| ControllerError::Configuration("not connected to SPDK".to_string()))
    }

    fn record<T>(operation: &'static str, result: &Result<T, ControllerError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => {
                warn!(operation, kind = e.kind(), "Controller operation failed: {}", e);
                e.kind()
            }
        };
        metrics::counter!(
            "oim_controller_operations_total",
            "operation" => operation,
            "outcome" => outcome
        )
        .increment(1);
    }

    async fn map(&self, volume_id: &VolumeId, params: &MapVolumeParams) -> Result<MappingResult, ControllerError> {
        if volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument("empty volume ID".to_string()));
        }
        let backend = self.backend()?;
        let controller = self
            .settings
            .vhost_controller
            .as_deref()
            .ok_or_else(|| ControllerError::Configuration("no vhost SCSI controller configured".to_string()))?;
        let pci_address = self
            .settings
            .pci_address
            .ok_or_else(|| ControllerError::Configuration("no PCI address configured".to_string()))?;

        let _guard = self.locks.lock(volume_id.as_str()).await;
        let name = volume_id.as_str();

        let existing = backend
            .list_devices(Some(name))
            .await
            .map_err(backend_failure("get_bdevs"))?;
        if existing.is_empty() {
            self.create_device(backend.as_ref(), name, params).await?;
        } else {
            // Parameters of an existing device are not compared with the request.
            debug!(volume_id = %volume_id, "Reusing existing BDev");
        }

        let controllers = backend
            .list_scsi_controllers()
            .await
            .map_err(backend_failure("get_vhost_controllers"))?;

        let (holder, target, attached) = match reconcile::find_target(&controllers, controller, name) {
            Some((holder, target)) => {
                if holder == controller {
                    debug!(volume_id = %volume_id, target, "Volume already attached");
                } else {
                    warn!(
                        volume_id = %volume_id,
                        target,
                        "Volume already attached to {} instead of {}",
                        holder,
                        controller
                    );
                }
                (holder.to_string(), target, false)
            }
            None => {
                let target = self.attach(backend.as_ref(), controller, name).await?;
                (controller.to_string(), target, true)
            }
        };

        self.event_bus.publish(ControllerEvent::VolumeMapped {
            volume_id: volume_id.clone(),
            controller: holder,
            pci_address,
            scsi_target: target,
            lun: MAPPED_LUN,
            attached,
            mapped_at: Utc::now(),
        });

        Ok(MappingResult {
            pci_address,
            scsi_target: target,
            lun: MAPPED_LUN,
        })
    }

    async fn create_device(
        &self,
        backend: &dyn BlockBackend,
        name: &str,
        params: &MapVolumeParams,
    ) -> Result<(), ControllerError> {
        match params {
            MapVolumeParams::Unset => Err(ControllerError::InvalidArgument(format!(
                "no volume parameters given for new volume {name}"
            ))),
            MapVolumeParams::Malloc(_) => Err(ControllerError::NotFound(format!(
                "malloc BDev {name} must be provisioned before mapping"
            ))),
            MapVolumeParams::Ceph(ceph) => {
                let request = RbdBDevRequest {
                    block_size: DEFAULT_BLOCK_SIZE,
                    name: name.to_string(),
                    user_id: ceph.user_id.clone(),
                    secret: ceph.secret.clone(),
                    monitors: ceph.monitors.clone(),
                    pool: ceph.pool.clone(),
                    image: ceph.image.clone(),
                };
                let created = backend
                    .create_network_device(&request)
                    .await
                    .map_err(backend_failure("construct_rbd_bdev"))?;
                info!(volume_id = name, "Created RBD BDev {} for {}/{}", created, ceph.pool, ceph.image);
                Ok(())
            }
        }
    }

    /// Try targets in order until one accepts the device as LUN 0.
    async fn attach(&self, backend: &dyn BlockBackend, controller: &str, name: &str) -> Result<u32, ControllerError> {
        let mut last_error = None;
        for target in 0..MAX_SCSI_TARGETS {
            match backend.attach_lun(controller, target, name).await {
                Ok(()) => {
                    info!(volume_id = name, target, "Attached BDev to {}", controller);
                    return Ok(target);
                }
                Err(e) if e.is_transport() => {
                    return Err(ControllerError::Backend {
                        operation: "add_vhost_scsi_lun",
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(volume_id = name, target, "Target rejected BDev: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(ControllerError::TargetsExhausted {
            device: name.to_string(),
            controller: controller.to_string(),
            attempts: MAX_SCSI_TARGETS,
            source: last_error.unwrap_or_else(|| BackendError::Rpc {
                code: None,
                message: "no targets available".to_string(),
            }),
        })
    }

    async fn unmap(&self, volume_id: &VolumeId) -> Result<(), ControllerError> {
        if volume_id.is_empty() {
            return Err(ControllerError::InvalidArgument("empty volume ID".to_string()));
        }
        let backend = self.backend()?;

        let _guard = self.locks.lock(volume_id.as_str()).await;
        let name = volume_id.as_str();

        let controllers = backend
            .list_scsi_controllers()
            .await
            .map_err(backend_failure("get_vhost_controllers"))?;

        let mut detached = 0;
        for (controller, target) in reconcile::targets_holding(&controllers, name) {
            match backend.detach_target(controller, target).await {
                Ok(()) => {
                    info!(volume_id = %volume_id, target, "Detached target from {}", controller);
                    detached += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!(volume_id = %volume_id, target, "Target already gone from {}", controller);
                }
                Err(e) => return Err(backend_failure("remove_vhost_scsi_target")(e)),
            }
        }

        let devices = backend
            .list_devices(Some(name))
            .await
            .map_err(backend_failure("get_bdevs"))?;
        let mut deleted = false;
        if let Some(device) = devices.first() {
            if reconcile::delete_on_unmap(device) {
                backend
                    .delete_device(name)
                    .await
                    .map_err(backend_failure("delete_bdev"))?;
                deleted = true;
                self.event_bus.publish(ControllerEvent::DeviceDeleted {
                    name: name.to_string(),
                    deleted_at: Utc::now(),
                });
            } else {
                debug!(volume_id = %volume_id, "Keeping malloc BDev");
            }
        }

        self.event_bus.publish(ControllerEvent::VolumeUnmapped {
            volume_id: volume_id.clone(),
            detached_targets: detached,
            device_deleted: deleted,
            unmapped_at: Utc::now(),
        });
        Ok(())
    }

    async fn provision(&self, name: &str, size: u64) -> Result<(), ControllerError> {
        if name.is_empty() {
            return Err(ControllerError::InvalidArgument("empty BDev name".to_string()));
        }
        if size % DEFAULT_BLOCK_SIZE != 0 {
            return Err(ControllerError::InvalidArgument(format!(
                "size {size} is not a multiple of {DEFAULT_BLOCK_SIZE}"
            )));
        }
        let backend = self.backend()?;

        let _guard = self.locks.lock(name).await;

        let existing = backend
            .list_devices(Some(name))
            .await
            .map_err(backend_failure("get_bdevs"))?;

        if size == 0 {
            if existing.is_empty() {
                debug!("BDev {} already absent", name);
                return Ok(());
            }
            backend
                .delete_device(name)
                .await
                .map_err(backend_failure("delete_bdev"))?;
            self.event_bus.publish(ControllerEvent::DeviceDeleted {
                name: name.to_string(),
                deleted_at: Utc::now(),
            });
            return Ok(());
        }

        if let Some(device) = existing.first() {
            let actual = device.size_bytes();
            if actual != size {
                return Err(ControllerError::AlreadyExists {
                    name: name.to_string(),
                    requested: size,
                    actual,
                });
            }
            debug!("BDev {} already provisioned with {} bytes", name, size);
            return Ok(());
        }

        let request = MallocBDevRequest {
            num_blocks: size / DEFAULT_BLOCK_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            name: Some(name.to_string()),
            uuid: None,
        };
        backend
            .create_malloc_device(&request)
            .await
            .map_err(backend_failure("construct_malloc_bdev"))?;
        self.event_bus.publish(ControllerEvent::DeviceProvisioned {
            name: name.to_string(),
            size_bytes: size,
            provisioned_at: Utc::now(),
        });
        Ok(())
    }

    async fn check(&self, name: &str) -> Result<(), ControllerError> {
        if name.is_empty() {
            return Err(ControllerError::InvalidArgument("empty BDev name".to_string()));
        }
        let backend = self.backend()?;

        let _guard = self.locks.lock(name).await;
        let devices = backend
            .list_devices(Some(name))
            .await
            .map_err(backend_failure("get_bdevs"))?;
        match devices.len() {
            1 => Ok(()),
            0 => Err(ControllerError::NotFound(format!("BDev {name}"))),
            n => Err(ControllerError::NotFound(format!("BDev {name} is ambiguous ({n} matches)"))),
        }
    }
}

#[async_trait]
impl VolumeController for StandardController {
    async fn map_volume(
        &self,
        volume_id: &VolumeId,
        params: &MapVolumeParams,
    ) -> Result<MappingResult, ControllerError> {
        let result = self.map(volume_id, params).await;
        Self::record("map_volume", &result);
        result
    }

    async fn unmap_volume(&self, volume_id: &VolumeId) -> Result<(), ControllerError> {
        let result = self.unmap(volume_id).await;
        Self::record("unmap_volume", &result);
        result
    }

    async fn provision_bdev(&self, name: &str, size: u64) -> Result<(), ControllerError> {
        let result = self.provision(name, size).await;
        Self::record("provision_bdev", &result);
        result
    }

    async fn check_bdev(&self, name: &str) -> Result<(), ControllerError> {
        let result = self.check(name).await;
        Self::record("check_bdev", &result);
        result
    }
}
