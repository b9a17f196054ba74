// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// SPDK Block Backend Adapter
//
// Implements the BlockBackend trait on top of the JSON-RPC client.
// Each method is one RPC; "not found" replies are translated where the
// trait promises idempotent behavior.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::client::JsonRpcClient;
use super::vhost;
use super::wire::{self, *};
use crate::domain::backend::{
    BDev, BackendError, BlockBackend, MallocBDevRequest, RbdBDevRequest, VhostController,
};

/// BlockBackend backed by a live SPDK process
#[derive(Clone)]
pub struct SpdkBackend {
    client: Arc<JsonRpcClient>,
}

impl SpdkBackend {
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Connect to the SPDK JSON-RPC socket at `path`
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let client = JsonRpcClient::connect(path).await?;
        Ok(Self::new(Arc::new(client)))
    }

    pub fn client(&self) -> &Arc<JsonRpcClient> {
        &self.client
    }
}

#[async_trait]
impl BlockBackend for SpdkBackend {
    async fn list_devices(&self, name: Option<&str>) -> Result<Vec<BDev>, BackendError> {
        let result = match name {
            Some(name) => {
                let args = GetBDevsArgs {
                    name: Some(name.to_string()),
                };
                self.client.invoke(wire::GET_BDEVS, Some(&args)).await
            }
            None => self.client.invoke::<GetBDevsArgs, _>(wire::GET_BDEVS, None).await,
        };

        match result {
            Ok(devices) => Ok(devices),
            Err(e) if name.is_some() && e.is_not_found() => {
                debug!("BDev {:?} not found", name);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_malloc_device(&self, request: &MallocBDevRequest) -> Result<String, BackendError> {
        let args = ConstructMallocBDevArgs {
            num_blocks: request.num_blocks,
            block_size: request.block_size,
            name: request.name.clone(),
            uuid: request.uuid.clone(),
        };
        let name: String = self.client.invoke(wire::CONSTRUCT_MALLOC_BDEV, Some(&args)).await?;
        info!(
            "Created malloc BDev {} ({} x {} bytes)",
            name, request.num_blocks, request.block_size
        );
        Ok(name)
    }

    async fn create_network_device(&self, request: &RbdBDevRequest) -> Result<String, BackendError> {
        let args = ConstructRbdBDevArgs {
            block_size: request.block_size,
            name: request.name.clone(),
            user_id: request.user_id.clone(),
            pool_name: request.pool.clone(),
            rbd_name: request.image.clone(),
            config: RbdConfig {
                mon_host: request.monitors.clone(),
                key: request.secret.clone(),
            },
        };
        let name: String = self.client.invoke(wire::CONSTRUCT_RBD_BDEV, Some(&args)).await?;
        info!("Created RBD BDev {} for {}/{}", name, request.pool, request.image);
        Ok(name)
    }

    async fn delete_device(&self, name: &str) -> Result<(), BackendError> {
        let args = DeleteBDevArgs {
            name: name.to_string(),
        };
        match self.client.invoke::<_, serde_json::Value>(wire::DELETE_BDEV, Some(&args)).await {
            Ok(_) => {
                info!("Deleted BDev {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("BDev {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_scsi_controllers(&self) -> Result<Vec<VhostController>, BackendError> {
        let infos: Vec<VhostControllerInfo> = self
            .client
            .invoke::<(), _>(wire::GET_VHOST_CONTROLLERS, None)
            .await?;
        Ok(infos.into_iter().map(vhost::to_controller).collect())
    }

    async fn create_scsi_controller(&self, name: &str, cpumask: Option<&str>) -> Result<(), BackendError> {
        let args = ConstructVhostScsiControllerArgs {
            ctrlr: name.to_string(),
            cpumask: cpumask.map(str::to_string),
        };
        self.client
            .invoke::<_, serde_json::Value>(wire::CONSTRUCT_VHOST_SCSI_CONTROLLER, Some(&args))
            .await?;
        info!("Created vhost SCSI controller {}", name);
        Ok(())
    }

    async fn attach_lun(&self, controller: &str, target: u32, bdev_name: &str) -> Result<(), BackendError> {
        let args = AddVhostScsiLunArgs {
            ctrlr: controller.to_string(),
            scsi_target_num: target,
            bdev_name: bdev_name.to_string(),
        };
        self.client
            .invoke::<_, serde_json::Value>(wire::ADD_VHOST_SCSI_LUN, Some(&args))
            .await?;
        Ok(())
    }

    async fn detach_target(&self, controller: &str, target: u32) -> Result<(), BackendError> {
        let args = RemoveVhostScsiTargetArgs {
            ctrlr: controller.to_string(),
            scsi_target_num: target,
        };
        self.client
            .invoke::<_, serde_json::Value>(wire::REMOVE_VHOST_SCSI_TARGET, Some(&args))
            .await?;
        Ok(())
    }
}
