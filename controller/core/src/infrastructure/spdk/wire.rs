// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Method names and parameter shapes of the SPDK RPCs the controller uses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GET_BDEVS: &str = "get_bdevs";
pub const CONSTRUCT_MALLOC_BDEV: &str = "construct_malloc_bdev";
pub const CONSTRUCT_RBD_BDEV: &str = "construct_rbd_bdev";
pub const DELETE_BDEV: &str = "delete_bdev";
pub const GET_VHOST_CONTROLLERS: &str = "get_vhost_controllers";
pub const CONSTRUCT_VHOST_SCSI_CONTROLLER: &str = "construct_vhost_scsi_controller";
pub const ADD_VHOST_SCSI_LUN: &str = "add_vhost_scsi_lun";
pub const REMOVE_VHOST_SCSI_TARGET: &str = "remove_vhost_scsi_target";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBDevsArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructMallocBDevArgs {
    pub num_blocks: u64,
    pub block_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbdConfig {
    pub mon_host: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructRbdBDevArgs {
    pub block_size: u64,
    pub name: String,
    pub user_id: String,
    pub pool_name: String,
    pub rbd_name: String,
    pub config: RbdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBDevArgs {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructVhostScsiControllerArgs {
    pub ctrlr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpumask: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddVhostScsiLunArgs {
    pub ctrlr: String,
    pub scsi_target_num: u32,
    pub bdev_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveVhostScsiTargetArgs {
    pub ctrlr: String,
    pub scsi_target_num: u32,
}

/// One entry of `get_vhost_controllers`. `backend_specific` has no fixed
/// schema and is decoded by [`super::vhost::parse_scsi_targets`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VhostControllerInfo {
    pub ctrlr: String,
    pub cpumask: String,
    pub backend_specific: Value,
}
