// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Controller Domain Events
//
// Published on the in-process event bus after each state-changing backend
// action and each registration attempt. Events are informational only; the
// controller never reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::volume::{PciAddress, VolumeId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    VolumeMapped {
        volume_id: VolumeId,
        controller: String,
        pci_address: PciAddress,
        scsi_target: u32,
        lun: u32,
        /// False when the LUN was already attached and nothing changed.
        attached: bool,
        mapped_at: DateTime<Utc>,
    },
    VolumeUnmapped {
        volume_id: VolumeId,
        detached_targets: usize,
        device_deleted: bool,
        unmapped_at: DateTime<Utc>,
    },
    DeviceProvisioned {
        name: String,
        size_bytes: u64,
        provisioned_at: DateTime<Utc>,
    },
    DeviceDeleted {
        name: String,
        deleted_at: DateTime<Utc>,
    },
    RegistrationSucceeded {
        controller_id: String,
        address: String,
        registered_at: DateTime<Utc>,
    },
    RegistrationFailed {
        controller_id: String,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl ControllerEvent {
    /// Volume or device the event concerns, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::VolumeMapped { volume_id, .. } | Self::VolumeUnmapped { volume_id, .. } => {
                Some(volume_id.as_str())
            }
            Self::DeviceProvisioned { name, .. } | Self::DeviceDeleted { name, .. } => Some(name),
            Self::RegistrationSucceeded { .. } | Self::RegistrationFailed { .. } => None,
        }
    }
}
