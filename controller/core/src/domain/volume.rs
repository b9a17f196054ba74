// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Value Objects
// ============================================================================

/// Caller-supplied volume identifier.
///
/// Used verbatim as the backend BDev name. All calls for the same volume must
/// carry the same creation parameters; this is not checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Parameters for an in-memory volume. The BDev itself must be provisioned
/// separately; mapping never creates one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MallocParams {}

/// Credentials and location of a Ceph RBD image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CephParams {
    pub user_id: String,
    pub secret: String,
    /// Comma-separated monitor addresses.
    pub monitors: String,
    pub pool: String,
    pub image: String,
}

/// How to back a volume that does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapVolumeParams {
    #[default]
    Unset,
    Malloc(MallocParams),
    Ceph(CephParams),
}

/// Field value meaning "unknown" in a [`PciAddress`].
pub const PCI_UNKNOWN: u32 = 0xFFFF;

/// PCI address of the hardware fronting the vhost controller.
///
/// Each field may independently be [`PCI_UNKNOWN`], which is distinct from 0.
/// Text form is `DDDD:BB:DD.F` in hex, with `*` for unknown fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u32,
    pub device: u32,
    pub function: u32,
}

impl PciAddress {
    pub fn new(domain: u32, bus: u32, device: u32, function: u32) -> Self {
        Self { domain, bus, device, function }
    }

    pub fn unknown() -> Self {
        Self::new(PCI_UNKNOWN, PCI_UNKNOWN, PCI_UNKNOWN, PCI_UNKNOWN)
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

impl Default for PciAddress {
    fn default() -> Self {
        Self::unknown()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid PCI address {input:?}: {reason}")]
pub struct PciAddressError {
    pub input: String,
    pub reason: String,
}

impl FromStr for PciAddress {
    type Err = PciAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::unknown());
        }
        let fail = |reason: &str| PciAddressError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (head, function) = s.rsplit_once('.').ok_or_else(|| fail("missing '.function'"))?;
        let parts: Vec<&str> = head.split(':').collect();
        let (domain, bus, device) = match parts.as_slice() {
            [domain, bus, device] => (*domain, *bus, *device),
            [bus, device] => ("0000", *bus, *device),
            _ => return Err(fail("expected [DDDD:]BB:DD.F")),
        };

        let field = |text: &str, max: u32, name: &str| -> Result<u32, PciAddressError> {
            if text == "*" {
                return Ok(PCI_UNKNOWN);
            }
            let value = u32::from_str_radix(text, 16)
                .map_err(|_| fail(&format!("{name} is not hex")))?;
            if value > max {
                return Err(fail(&format!("{name} out of range")));
            }
            Ok(value)
        };

        // ffff is how an unknown domain is stored, so it cannot be given explicitly.
        let domain_value = field(domain, 0xFFFF, "domain")?;
        if domain != "*" && domain_value == PCI_UNKNOWN {
            return Err(fail("domain ffff is reserved for an unknown domain, use '*'"));
        }

        Ok(Self {
            domain: domain_value,
            bus: field(bus, 0xFF, "bus")?,
            device: field(device, 0x1F, "device")?,
            function: field(function, 0x7, "function")?,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |value: u32, width: usize| {
            if value == PCI_UNKNOWN {
                "*".to_string()
            } else {
                format!("{value:0width$x}")
            }
        };
        write!(
            f,
            "{}:{}:{}.{}",
            field(self.domain, 4),
            field(self.bus, 2),
            field(self.device, 2),
            field(self.function, 1)
        )
    }
}

/// Where a mapped volume shows up: the fronting PCI device plus the SCSI
/// target and LUN behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingResult {
    pub pci_address: PciAddress,
    pub scsi_target: u32,
    pub lun: u32,
}
