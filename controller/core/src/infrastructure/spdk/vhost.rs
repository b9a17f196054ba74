// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tolerant decoder for the `backend_specific` payload of vhost controllers.
//!
//! SPDK publishes no schema for it and the shape has drifted between
//! releases. Every missing key or wrongly typed value falls back to a
//! default; decoding never fails.

use serde_json::{Map, Value};

use super::wire::VhostControllerInfo;
use crate::domain::backend::{ScsiLun, ScsiTarget, VhostController};

/// Build the typed controller view of one `get_vhost_controllers` entry.
pub fn to_controller(info: VhostControllerInfo) -> VhostController {
    VhostController {
        scsi_targets: parse_scsi_targets(&info.backend_specific),
        name: info.ctrlr,
        cpumask: info.cpumask,
    }
}

/// Extract SCSI targets from `{"scsi": [...]}`. Anything else yields none.
pub fn parse_scsi_targets(backend_specific: &Value) -> Vec<ScsiTarget> {
    backend_specific
        .get("scsi")
        .and_then(Value::as_array)
        .map(|targets| targets.iter().filter_map(Value::as_object).map(parse_target).collect())
        .unwrap_or_default()
}

fn parse_target(target: &Map<String, Value>) -> ScsiTarget {
    let target_num = u32_field(target, "scsi_dev_num")
        .or_else(|| u32_field(target, "id"))
        .unwrap_or_default();
    let name = target
        .get("target_name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let luns = target
        .get("luns")
        .and_then(Value::as_array)
        .map(|luns| luns.iter().filter_map(Value::as_object).map(parse_lun).collect())
        .unwrap_or_default();

    ScsiTarget { target_num, name, luns }
}

fn parse_lun(lun: &Map<String, Value>) -> ScsiLun {
    ScsiLun {
        id: u32_field(lun, "id").unwrap_or_default(),
        bdev_name: lun
            .get("bdev_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn u32_field(map: &Map<String, Value>, key: &str) -> Option<u32> {
    map.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}
