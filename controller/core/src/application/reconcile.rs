// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Decisions taken on a fetched backend snapshot.
//!
//! The controller keeps no record of what it attached; every call lists the
//! backend and derives its next actions from these functions.

use crate::domain::backend::{BDev, VhostController};

/// `(controller, target)` already holding `device`, searching every
/// controller. A match on `preferred` wins over matches elsewhere.
pub fn find_target<'a>(
    controllers: &'a [VhostController],
    preferred: &str,
    device: &str,
) -> Option<(&'a str, u32)> {
    let holders = targets_holding(controllers, device);
    holders
        .iter()
        .find(|(name, _)| *name == preferred)
        .or_else(|| holders.first())
        .copied()
}

/// Every `(controller, target)` holding `device`, across all controllers.
/// A device should be attached at most once; this does not assume it.
pub fn targets_holding<'a>(controllers: &'a [VhostController], device: &str) -> Vec<(&'a str, u32)> {
    controllers
        .iter()
        .flat_map(|c| {
            c.scsi_targets
                .iter()
                .filter(|t| t.holds(device))
                .map(move |t| (c.name.as_str(), t.target_num))
        })
        .collect()
}

/// Malloc devices survive unmapping; they are removed only by provisioning
/// them with size zero.
pub fn delete_on_unmap(device: &BDev) -> bool {
    !device.is_malloc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backend::{ScsiLun, ScsiTarget, MALLOC_PRODUCT_NAME};

    fn target(num: u32, bdevs: &[&str]) -> ScsiTarget {
        ScsiTarget {
            target_num: num,
            name: None,
            luns: bdevs
                .iter()
                .enumerate()
                .map(|(i, b)| ScsiLun { id: i as u32, bdev_name: b.to_string() })
                .collect(),
        }
    }

    fn snapshot() -> Vec<VhostController> {
        vec![
            VhostController {
                name: "vhost.0".into(),
                cpumask: "0x1".into(),
                scsi_targets: vec![target(0, &["vol-a"]), target(4, &["vol-b", "vol-c"])],
            },
            VhostController {
                name: "vhost.1".into(),
                cpumask: "0x2".into(),
                scsi_targets: vec![target(1, &["vol-b"])],
            },
        ]
    }

    #[test]
    fn find_target_prefers_configured_controller() {
        let controllers = snapshot();
        assert_eq!(find_target(&controllers, "vhost.0", "vol-c"), Some(("vhost.0", 4)));
        assert_eq!(find_target(&controllers, "vhost.1", "vol-b"), Some(("vhost.1", 1)));
        assert_eq!(find_target(&controllers, "vhost.0", "vol-b"), Some(("vhost.0", 4)));
    }

    #[test]
    fn find_target_falls_back_to_other_controllers() {
        let controllers = snapshot();
        assert_eq!(find_target(&controllers, "vhost.1", "vol-a"), Some(("vhost.0", 0)));
        assert_eq!(find_target(&controllers, "vhost.9", "vol-c"), Some(("vhost.0", 4)));
        assert_eq!(find_target(&controllers, "vhost.0", "vol-z"), None);
    }

    #[test]
    fn targets_holding_scans_everything() {
        let controllers = snapshot();
        assert_eq!(targets_holding(&controllers, "vol-b"), vec![("vhost.0", 4), ("vhost.1", 1)]);
        assert!(targets_holding(&controllers, "vol-z").is_empty());
    }

    #[test]
    fn malloc_devices_are_kept() {
        let malloc = BDev { product_name: MALLOC_PRODUCT_NAME.into(), ..Default::default() };
        let rbd = BDev { product_name: "Ceph Rbd Disk".into(), ..Default::default() };
        assert!(!delete_on_unmap(&malloc));
        assert!(delete_on_unmap(&rbd));
    }
}
