// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Block Backend Trait - Anti-Corruption Layer for SPDK
//!
//! Typed view of the SPDK primitives the controller needs: block devices
//! (BDevs) and vhost SCSI controllers with their targets and LUNs.
//! The controller only talks to [`BlockBackend`]; the JSON-RPC details live
//! in `crate::infrastructure::spdk`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Product label SPDK reports for in-memory (malloc) BDevs.
pub const MALLOC_PRODUCT_NAME: &str = "Malloc disk";

/// JSON-RPC and errno codes the backend is known to return.
pub mod codes {
    /// Malformed request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid parameters; older SPDK also uses it for "no such BDev".
    pub const INVALID_PARAMS: i64 = -32602;
    /// Generic internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// `-ENODEV`, the "not found" code of newer SPDK releases.
    pub const ENODEV: i64 = -19;
    /// `-EEXIST`.
    pub const EEXIST: i64 = -17;
    /// `-EBUSY`.
    pub const EBUSY: i64 = -16;
}

/// Errors returned by the backend client.
///
/// `Transport` and `Closed` are fatal for the connection; `Rpc` is a
/// well-formed error reply and leaves the connection usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("backend connection closed: {0}")]
    Closed(String),

    #[error("backend error{}: {message}", code_suffix(.code))]
    Rpc { code: Option<i64>, message: String },

    #[error("invalid request for {method}: {reason}")]
    InvalidRequest { method: String, reason: String },

    #[error("unexpected reply to {method}: {reason}")]
    InvalidReply { method: String, reason: String },
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" {c}")).unwrap_or_default()
}

impl BackendError {
    /// Numeric code of a backend error reply, if it carried one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether this is a backend error reply with the given code.
    pub fn is_code(&self, code: i64) -> bool {
        self.code() == Some(code)
    }

    /// Best-effort detection of SPDK's "no such device" replies.
    pub fn is_not_found(&self) -> bool {
        self.is_code(codes::INVALID_PARAMS) || self.is_code(codes::ENODEV)
    }

    /// Connection-level failure: retrying on the same connection is pointless.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed(_))
    }
}

/// I/O types a BDev supports, as reported by `get_bdevs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportedIoTypes {
    pub read: bool,
    pub write: bool,
    pub unmap: bool,
    pub write_zeroes: bool,
    pub flush: bool,
    pub reset: bool,
    pub nvme_admin: bool,
    pub nvme_io: bool,
}

/// A backend block device.
///
/// Devices created through the controller are named after the volume ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BDev {
    pub name: String,
    pub product_name: String,
    pub uuid: String,
    pub block_size: u64,
    pub num_blocks: u64,
    pub claimed: bool,
    pub supported_io_types: SupportedIoTypes,
}

impl BDev {
    /// Device size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.num_blocks)
    }

    /// In-memory test device, kept across map/unmap cycles.
    pub fn is_malloc(&self) -> bool {
        self.product_name == MALLOC_PRODUCT_NAME
    }
}

/// One LUN behind a SCSI target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScsiLun {
    pub id: u32,
    pub bdev_name: String,
}

/// A SCSI target of a vhost controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScsiTarget {
    pub target_num: u32,
    pub name: Option<String>,
    pub luns: Vec<ScsiLun>,
}

impl ScsiTarget {
    pub fn holds(&self, bdev_name: &str) -> bool {
        self.luns.iter().any(|lun| lun.bdev_name == bdev_name)
    }
}

/// A vhost SCSI controller exposed to a VM.
///
/// Rebuilt from the untyped `backend_specific` payload on every call.
/// Controllers of other kinds (vhost-blk, vhost-nvme) have no targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VhostController {
    pub name: String,
    pub cpumask: String,
    pub scsi_targets: Vec<ScsiTarget>,
}

/// Arguments for an in-memory BDev.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MallocBDevRequest {
    pub num_blocks: u64,
    pub block_size: u64,
    pub name: Option<String>,
    pub uuid: Option<String>,
}

/// Arguments for a Ceph RBD backed BDev.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RbdBDevRequest {
    pub block_size: u64,
    pub name: String,
    pub user_id: String,
    pub secret: String,
    pub monitors: String,
    pub pool: String,
    pub image: String,
}

/// Backend operations used by the controller.
///
/// Every method is a single request/response round trip; none of them
/// retries or checks preconditions on behalf of the caller.
#[async_trait]
pub trait BlockBackend: Send + Sync {
    /// List BDevs, optionally filtered by name. An unknown name yields an
    /// empty list, not an error.
    async fn list_devices(&self, name: Option<&str>) -> Result<Vec<BDev>, BackendError>;

    /// Create a malloc BDev and return the name the backend assigned.
    async fn create_malloc_device(&self, request: &MallocBDevRequest) -> Result<String, BackendError>;

    /// Create an RBD BDev and return the name the backend assigned.
    async fn create_network_device(&self, request: &RbdBDevRequest) -> Result<String, BackendError>;

    /// Delete a BDev. Deleting a missing BDev succeeds.
    async fn delete_device(&self, name: &str) -> Result<(), BackendError>;

    /// List vhost controllers with their SCSI targets.
    async fn list_scsi_controllers(&self) -> Result<Vec<VhostController>, BackendError>;

    /// Create a vhost SCSI controller.
    async fn create_scsi_controller(&self, name: &str, cpumask: Option<&str>) -> Result<(), BackendError>;

    /// Attach `bdev_name` as LUN 0 of `target` on `controller`.
    async fn attach_lun(&self, controller: &str, target: u32, bdev_name: &str) -> Result<(), BackendError>;

    /// Remove `target` (and its LUNs) from `controller`.
    async fn detach_target(&self, controller: &str, target: u32) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_display_includes_code_when_present() {
        let with_code = BackendError::Rpc { code: Some(-32602), message: "Invalid parameters".into() };
        assert_eq!(with_code.to_string(), "backend error -32602: Invalid parameters");

        let without_code = BackendError::Rpc { code: None, message: "boom".into() };
        assert_eq!(without_code.to_string(), "backend error: boom");
    }

    #[test]
    fn not_found_detection_accepts_both_codes() {
        let old = BackendError::Rpc { code: Some(codes::INVALID_PARAMS), message: String::new() };
        let new = BackendError::Rpc { code: Some(codes::ENODEV), message: String::new() };
        let other = BackendError::Rpc { code: Some(codes::EEXIST), message: String::new() };

        assert!(old.is_not_found());
        assert!(new.is_not_found());
        assert!(!other.is_not_found());
        assert!(!BackendError::Closed("eof".into()).is_not_found());
    }

    #[test]
    fn bdev_defaults_missing_fields() {
        let bdev: BDev = serde_json::from_value(serde_json::json!({
            "name": "Malloc0",
            "product_name": "Malloc disk",
            "block_size": 512,
            "num_blocks": 2048,
        }))
        .unwrap();

        assert_eq!(bdev.size_bytes(), 1024 * 1024);
        assert!(bdev.is_malloc());
        assert!(!bdev.claimed);
        assert_eq!(bdev.supported_io_types, SupportedIoTypes::default());
    }
}
