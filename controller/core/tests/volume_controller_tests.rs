// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests of the volume controller against the in-process SPDK
//! mock. Every call goes through the real JSON-RPC client and codec.
//!
//! Covers:
//! - MapVolume / UnmapVolume idempotence
//! - ProvisionBDev round trip and size conflicts
//! - Per-volume mutual exclusion and cross-volume independence
//! - SCSI target exhaustion and reuse of freed targets
//! - Backend faults, including bare string errors

use std::sync::Arc;
use std::time::{Duration, Instant};

use oim_core::application::controller::{
    ControllerError, ControllerSettings, StandardController, VolumeController, MAX_SCSI_TARGETS,
};
use oim_core::domain::backend::{codes, BDev, BackendError, BlockBackend};
use oim_core::domain::events::ControllerEvent;
use oim_core::domain::volume::{CephParams, MallocParams, MapVolumeParams, PciAddress, VolumeId};
use oim_core::infrastructure::event_bus::EventBus;
use oim_core::infrastructure::keymutex::KeyMutex;
use oim_core::infrastructure::spdk::{MockFault, MockSpdk};

const VHOST: &str = "vhost.0";

fn pci() -> PciAddress {
    PciAddress::new(0, 0, 0x15, 0)
}

fn build(mock: &MockSpdk) -> (StandardController, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new(256));
    let controller = StandardController::new(
        Some(Arc::new(mock.backend())),
        ControllerSettings {
            vhost_controller: Some(VHOST.to_string()),
            pci_address: Some(pci()),
        },
        bus.clone(),
    );
    (controller, bus)
}

fn malloc() -> MapVolumeParams {
    MapVolumeParams::Malloc(MallocParams {})
}

fn ceph(image: &str) -> MapVolumeParams {
    MapVolumeParams::Ceph(CephParams {
        user_id: "admin".to_string(),
        secret: "AQBvaBFZAAAAABAA9VHgwCgAAGh+3fuA==".to_string(),
        monitors: "10.0.0.1:6789,10.0.0.2:6789".to_string(),
        pool: "rbd".to_string(),
        image: image.to_string(),
    })
}

#[tokio::test]
async fn test_malloc_scenario() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let (controller, _bus) = build(&mock);
    let v1 = VolumeId::from("v1");

    controller.provision_bdev("v1", 1024 * 1024).await.unwrap();
    let mapping = controller.map_volume(&v1, &malloc()).await.unwrap();
    assert_eq!(mapping.pci_address, pci());
    assert_eq!(mapping.scsi_target, 0);
    assert_eq!(mapping.lun, 0);
    assert_eq!(mock.targets(VHOST), vec![(0, "v1".to_string())]);

    controller.check_bdev("v1").await.unwrap();

    controller.unmap_volume(&v1).await.unwrap();
    assert!(mock.targets(VHOST).is_empty());
    // Malloc devices outlive unmapping.
    controller.check_bdev("v1").await.unwrap();

    controller.provision_bdev("v1", 0).await.unwrap();
    assert!(matches!(
        controller.check_bdev("v1").await,
        Err(ControllerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_ceph_scenario() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let (controller, bus) = build(&mock);
    let mut events = bus.subscribe_volume(VolumeId::from("v2"));
    let v2 = VolumeId::from("v2");

    let mapping = controller.map_volume(&v2, &ceph("img-2")).await.unwrap();
    assert_eq!(mapping.scsi_target, 0);
    assert!(mock.bdev("v2").is_some());
    controller.check_bdev("v2").await.unwrap();

    controller.unmap_volume(&v2).await.unwrap();
    assert!(mock.bdev("v2").is_none());
    assert!(matches!(
        controller.check_bdev("v2").await,
        Err(ControllerError::NotFound(_))
    ));

    assert!(matches!(events.recv().await.unwrap(), ControllerEvent::VolumeMapped { .. }));
    assert!(matches!(events.recv().await.unwrap(), ControllerEvent::DeviceDeleted { .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        ControllerEvent::VolumeUnmapped { detached_targets: 1, device_deleted: true, .. }
    ));
}

#[tokio::test]
async fn test_map_volume_is_idempotent() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let (controller, _bus) = build(&mock);
    let vol = VolumeId::from("vol-1");

    let first = controller.map_volume(&vol, &ceph("img-1")).await.unwrap();
    let devices = mock.bdev_names();
    let targets = mock.targets(VHOST);

    let second = controller.map_volume(&vol, &ceph("img-1")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(mock.bdev_names(), devices);
    assert_eq!(mock.targets(VHOST), targets);
    assert_eq!(mock.calls("construct_rbd_bdev"), 1);
    assert_eq!(mock.calls("add_vhost_scsi_lun"), 1);
}

#[tokio::test]
async fn test_unmap_volume_is_idempotent() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let (controller, _bus) = build(&mock);
    let vol = VolumeId::from("vol-1");

    controller.map_volume(&vol, &ceph("img-1")).await.unwrap();
    controller.unmap_volume(&vol).await.unwrap();
    controller.unmap_volume(&vol).await.unwrap();

    // Never mapped at all.
    controller.unmap_volume(&VolumeId::from("vol-unknown")).await.unwrap();
}

#[tokio::test]
async fn test_provision_round_trip() {
    let mock = MockSpdk::new();
    let (controller, _bus) = build(&mock);
    let backend = mock.backend();

    controller.provision_bdev("disk-1", 64 * 1024).await.unwrap();
    let devices = backend.list_devices(Some("disk-1")).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].size_bytes(), 64 * 1024);
    assert!(devices[0].is_malloc());

    controller.provision_bdev("disk-1", 0).await.unwrap();
    assert!(backend.list_devices(Some("disk-1")).await.unwrap().is_empty());

    controller.provision_bdev("disk-1", 0).await.unwrap();
}

#[tokio::test]
async fn test_provision_conflict() {
    let mock = MockSpdk::new();
    let (controller, _bus) = build(&mock);

    controller.provision_bdev("disk-1", 4096).await.unwrap();
    let err = controller.provision_bdev("disk-1", 8192).await.unwrap_err();

    match err {
        ControllerError::AlreadyExists { name, requested, actual } => {
            assert_eq!(name, "disk-1");
            assert_eq!(requested, 8192);
            assert_eq!(actual, 4096);
        }
        other => panic!("expected AlreadyExists, got {other}"),
    }
    assert_eq!(mock.bdev("disk-1").unwrap().size_bytes(), 4096);
}

#[tokio::test]
async fn test_concurrent_map_of_same_volume() {
    let mock = MockSpdk::new()
        .with_scsi_controller(VHOST)
        .with_latency(Duration::from_millis(20));
    let (controller, _bus) = build(&mock);
    let controller = Arc::new(controller);
    let vol = VolumeId::from("vol-race");

    let a = {
        let controller = controller.clone();
        let vol = vol.clone();
        tokio::spawn(async move { controller.map_volume(&vol, &ceph("img")).await })
    };
    let b = {
        let controller = controller.clone();
        let vol = vol.clone();
        tokio::spawn(async move { controller.map_volume(&vol, &ceph("img")).await })
    };

    let ra = a.await.unwrap().unwrap();
    let rb = b.await.unwrap().unwrap();

    assert_eq!(ra, rb);
    assert_eq!(mock.calls("construct_rbd_bdev"), 1);
    assert_eq!(mock.calls("add_vhost_scsi_lun"), 1);
    assert_eq!(mock.targets(VHOST), vec![(0, "vol-race".to_string())]);
}

#[tokio::test]
async fn test_distinct_volumes_do_not_block_each_other() {
    let latency = Duration::from_millis(100);
    let mock = MockSpdk::new().with_scsi_controller(VHOST).with_latency(latency);
    let (controller, _bus) = build(&mock);
    let controller = Arc::new(controller);

    // Pick two names that land on different lock stripes.
    let locks = KeyMutex::default();
    let first = "vol-a".to_string();
    let second = (0..)
        .map(|i| format!("vol-b{i}"))
        .find(|k| locks.stripe_of(k) != locks.stripe_of(&first))
        .unwrap();

    let started = Instant::now();
    let tasks: Vec<_> = [first, second]
        .into_iter()
        .map(|name| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.map_volume(&VolumeId::new(name.clone()), &ceph(&name)).await })
        })
        .collect();

    let mut targets = Vec::new();
    for task in tasks {
        targets.push(task.await.unwrap().unwrap().scsi_target);
    }
    let elapsed = started.elapsed();

    // A fresh ceph mapping is four round trips. Serialized, two of them
    // take at least eight; in parallel roughly four plus one retried attach.
    assert!(elapsed < latency * 7, "took {elapsed:?}");
    targets.sort();
    assert_eq!(targets, vec![0, 1]);
}

#[tokio::test]
async fn test_target_exhaustion_and_reuse() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let (controller, _bus) = build(&mock);

    for i in 0..=MAX_SCSI_TARGETS {
        controller.provision_bdev(&format!("vol-{i}"), 4096).await.unwrap();
    }
    for i in 0..MAX_SCSI_TARGETS {
        let mapping = controller
            .map_volume(&VolumeId::new(format!("vol-{i}")), &malloc())
            .await
            .unwrap();
        assert_eq!(mapping.scsi_target, i);
    }

    let ninth = VolumeId::new(format!("vol-{MAX_SCSI_TARGETS}"));
    let err = controller.map_volume(&ninth, &malloc()).await.unwrap_err();
    match &err {
        ControllerError::TargetsExhausted { attempts, source, .. } => {
            assert_eq!(*attempts, MAX_SCSI_TARGETS);
            assert!(source.is_code(codes::EEXIST));
        }
        other => panic!("expected TargetsExhausted, got {other}"),
    }
    // The device stays allocated after a failed map.
    assert!(mock.bdev(ninth.as_str()).is_some());

    controller.unmap_volume(&VolumeId::from("vol-3")).await.unwrap();
    let mapping = controller.map_volume(&ninth, &malloc()).await.unwrap();
    assert_eq!(mapping.scsi_target, 3);
}

#[tokio::test]
async fn test_unknown_pci_address_is_reported() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let controller = StandardController::new(
        Some(Arc::new(mock.backend())),
        ControllerSettings {
            vhost_controller: Some(VHOST.to_string()),
            pci_address: Some(PciAddress::unknown()),
        },
        Arc::new(EventBus::default()),
    );

    let mapping = controller
        .map_volume(&VolumeId::from("vol-1"), &ceph("img"))
        .await
        .unwrap();
    assert!(mapping.pci_address.is_unknown());
}

#[tokio::test]
async fn test_cancelled_map_releases_lock() {
    let mock = MockSpdk::new()
        .with_scsi_controller(VHOST)
        .with_latency(Duration::from_millis(200));
    let (controller, _bus) = build(&mock);
    let vol = VolumeId::from("vol-1");

    let cancelled = tokio::time::timeout(Duration::from_millis(50), controller.map_volume(&vol, &ceph("img"))).await;
    assert!(cancelled.is_err());

    // The abandoned call may still complete on the backend; a retry converges.
    let mapping = controller.map_volume(&vol, &ceph("img")).await.unwrap();
    assert_eq!(mapping.scsi_target, 0);
    assert_eq!(mock.targets(VHOST), vec![(0, "vol-1".to_string())]);
}

#[tokio::test]
async fn test_existing_rbd_device_is_reused_as_is() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    mock.insert_bdev(BDev {
        name: "vol-1".to_string(),
        product_name: "Ceph Rbd Disk".to_string(),
        block_size: 4096,
        num_blocks: 16,
        ..Default::default()
    });
    let (controller, _bus) = build(&mock);

    let mapping = controller
        .map_volume(&VolumeId::from("vol-1"), &ceph("some-other-image"))
        .await
        .unwrap();
    assert_eq!(mapping.scsi_target, 0);
    assert_eq!(mock.calls("construct_rbd_bdev"), 0);
    // The device keeps its own geometry.
    assert_eq!(mock.bdev("vol-1").map(|b| b.block_size), Some(4096));
    assert_eq!(mock.targets(VHOST), vec![(0, "vol-1".to_string())]);
}

#[tokio::test]
async fn test_map_recovers_once_fault_clears() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST);
    let (controller, _bus) = build(&mock);
    let vol = VolumeId::from("vol-1");

    mock.fail(
        "add_vhost_scsi_lun",
        MockFault::Error {
            code: codes::INVALID_PARAMS,
            message: "Invalid argument".to_string(),
        },
    );
    let err = controller.map_volume(&vol, &ceph("img")).await.unwrap_err();
    assert!(matches!(err, ControllerError::TargetsExhausted { attempts, .. } if attempts == MAX_SCSI_TARGETS));
    assert_eq!(mock.calls("add_vhost_scsi_lun"), MAX_SCSI_TARGETS as usize);
    // The device created before the failure stays for the retry.
    assert!(mock.bdev("vol-1").is_some());

    mock.clear_fault("add_vhost_scsi_lun");
    let mapping = controller.map_volume(&vol, &ceph("img")).await.unwrap();
    assert_eq!(mapping.scsi_target, 0);
    assert_eq!(mock.calls("construct_rbd_bdev"), 1);
}

#[tokio::test]
async fn test_string_errors_surface_without_code() {
    let mock = MockSpdk::new().with_scsi_controller(VHOST).with_string_errors();
    let (controller, _bus) = build(&mock);

    mock.fail(
        "construct_rbd_bdev",
        MockFault::Error {
            code: codes::INVALID_PARAMS,
            message: "rbd image not found".to_string(),
        },
    );
    let err = controller
        .map_volume(&VolumeId::from("vol-1"), &ceph("img"))
        .await
        .unwrap_err();
    match err {
        ControllerError::Backend {
            operation,
            source: BackendError::Rpc { code, message },
        } => {
            assert_eq!(operation, "construct_rbd_bdev");
            assert_eq!(code, None);
            assert!(message.contains("rbd image not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(mock.targets(VHOST).is_empty());
}

#[tokio::test]
async fn test_ensure_scsi_controller_before_first_map() {
    let mock = MockSpdk::new();
    let (controller, _bus) = build(&mock);

    assert!(controller.ensure_scsi_controller().await.unwrap());
    controller.provision_bdev("v1", 1024 * 1024).await.unwrap();
    let mapping = controller.map_volume(&VolumeId::from("v1"), &malloc()).await.unwrap();
    assert_eq!(mapping.scsi_target, 0);
    assert_eq!(mock.targets(VHOST), vec![(0, "v1".to_string())]);
}
