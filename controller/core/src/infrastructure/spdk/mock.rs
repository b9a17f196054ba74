// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process SPDK stand-in speaking the real JSON-RPC protocol.
//!
//! Serves one connection per [`MockSpdk::serve`] call over any byte stream,
//! usually one end of `tokio::io::duplex`, so tests exercise the real
//! client and codec. Requests are handled concurrently, one task each, with
//! optional latency to widen race windows. Error codes follow SPDK:
//! `get_bdevs` reports unknown names with -32602, other lookups with -19.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::backend::SpdkBackend;
use super::client::JsonRpcClient;
use super::codec::JsonCodec;
use super::wire::{self, *};
use crate::domain::backend::{codes, BDev, SupportedIoTypes, MALLOC_PRODUCT_NAME};

/// Targets per vhost SCSI controller, as in SPDK's default build.
pub const MOCK_MAX_TARGETS: u32 = 8;

pub const RBD_PRODUCT_NAME: &str = "Ceph Rbd Disk";

/// Injected failure for one method.
#[derive(Debug, Clone)]
pub enum MockFault {
    /// Reply with this error instead of executing the call.
    Error { code: i64, message: String },
    /// Close the connection on receipt.
    Disconnect,
}

#[derive(Debug, Clone, Default)]
struct MockController {
    cpumask: String,
    /// Target number to the BDev attached as its LUN 0.
    targets: BTreeMap<u32, String>,
}

#[derive(Default)]
struct MockState {
    bdevs: BTreeMap<String, BDev>,
    controllers: BTreeMap<String, MockController>,
    calls: HashMap<String, usize>,
    faults: HashMap<String, (MockFault, Option<usize>)>,
    string_errors: bool,
    latency: Option<Duration>,
    next_device: u64,
}

type Fault = (i64, String);

fn fault(code: i64, message: impl Into<String>) -> Fault {
    (code, message.into())
}

#[derive(Clone, Default)]
pub struct MockSpdk {
    state: Arc<Mutex<MockState>>,
}

impl MockSpdk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an empty vhost SCSI controller named `name`.
    pub fn with_scsi_controller(self, name: &str) -> Self {
        self.state.lock().controllers.insert(
            name.to_string(),
            MockController {
                cpumask: "0x1".to_string(),
                ..Default::default()
            },
        );
        self
    }

    /// Delay every reply by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    /// Report errors as bare strings instead of `{code, message}`.
    pub fn with_string_errors(self) -> Self {
        self.state.lock().string_errors = true;
        self
    }

    /// Fail every call to `method` until cleared.
    pub fn fail(&self, method: &str, fault: MockFault) {
        self.state.lock().faults.insert(method.to_string(), (fault, None));
    }

    /// Fail the next `times` calls to `method`.
    pub fn fail_times(&self, method: &str, fault: MockFault, times: usize) {
        self.state
            .lock()
            .faults
            .insert(method.to_string(), (fault, Some(times)));
    }

    pub fn clear_fault(&self, method: &str) {
        self.state.lock().faults.remove(method);
    }

    /// Number of requests received for `method`, failed ones included.
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    pub fn bdev(&self, name: &str) -> Option<BDev> {
        self.state.lock().bdevs.get(name).cloned()
    }

    pub fn bdev_names(&self) -> Vec<String> {
        self.state.lock().bdevs.keys().cloned().collect()
    }

    /// Insert a device directly, bypassing the RPC layer.
    pub fn insert_bdev(&self, bdev: BDev) {
        self.state.lock().bdevs.insert(bdev.name.clone(), bdev);
    }

    /// `(target, bdev)` pairs attached to `controller`.
    pub fn targets(&self, controller: &str) -> Vec<(u32, String)> {
        self.state
            .lock()
            .controllers
            .get(controller)
            .map(|c| c.targets.iter().map(|(t, b)| (*t, b.clone())).collect())
            .unwrap_or_default()
    }

    /// Serve the JSON-RPC protocol on `stream` until the peer hangs up.
    pub fn serve<S>(&self, stream: S) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mock = self.clone();
        tokio::spawn(async move {
            let (read, write) = tokio::io::split(stream);
            let mut frames = FramedRead::new(read, JsonCodec::new());
            let sink = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(write, JsonCodec::new())));

            while let Some(Ok(frame)) = frames.next().await {
                let method = frame
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let injected = mock.take_fault(&method);
                if matches!(injected, Some(MockFault::Disconnect)) {
                    tracing::debug!("MockSpdk hanging up on {}", method);
                    break;
                }

                let mock = mock.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    let latency = mock.state.lock().latency;
                    if let Some(latency) = latency {
                        tokio::time::sleep(latency).await;
                    }
                    let reply = mock.respond(&frame, injected);
                    let _ = sink.lock().await.send(reply).await;
                });
            }
        })
    }

    /// Client connected to a fresh in-memory session.
    pub fn connect(&self) -> JsonRpcClient {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        self.serve(server_end);
        JsonRpcClient::new(client_end)
    }

    pub fn backend(&self) -> SpdkBackend {
        SpdkBackend::new(Arc::new(self.connect()))
    }

    /// Count the call and consume one use of any fault set for it.
    fn take_fault(&self, method: &str) -> Option<MockFault> {
        let mut state = self.state.lock();
        *state.calls.entry(method.to_string()).or_default() += 1;

        let (fault, expired) = {
            let (fault, remaining) = state.faults.get_mut(method)?;
            if let Some(n) = remaining.as_mut() {
                *n = n.saturating_sub(1);
            }
            (fault.clone(), *remaining == Some(0))
        };
        if expired {
            state.faults.remove(method);
        }
        Some(fault)
    }

    fn respond(&self, frame: &Value, injected: Option<MockFault>) -> Value {
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let outcome = match injected {
            Some(MockFault::Error { code, message }) => Err((code, message)),
            _ => self.execute(frame),
        };

        match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => {
                let error = if self.state.lock().string_errors {
                    Value::String(message)
                } else {
                    json!({"code": code, "message": message})
                };
                json!({"jsonrpc": "2.0", "id": id, "error": error})
            }
        }
    }

    fn execute(&self, frame: &Value) -> Result<Value, Fault> {
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| fault(codes::INVALID_REQUEST, "Missing method"))?;
        let params = match frame.get("params") {
            Some(Value::Null) => return Err(fault(codes::INVALID_PARAMS, "params must not be null")),
            other => other,
        };

        let mut state = self.state.lock();
        match method {
            wire::GET_BDEVS => {
                let args: Option<GetBDevsArgs> = params.map(parse).transpose()?;
                match args.and_then(|a| a.name) {
                    Some(name) => {
                        let bdev = state
                            .bdevs
                            .get(&name)
                            .ok_or_else(|| fault(codes::INVALID_PARAMS, "Invalid parameters"))?;
                        Ok(json!([bdev]))
                    }
                    None => Ok(json!(state.bdevs.values().collect::<Vec<_>>())),
                }
            }
            wire::CONSTRUCT_MALLOC_BDEV => {
                let args: ConstructMallocBDevArgs = required(params)?;
                if args.num_blocks == 0 || args.block_size == 0 {
                    return Err(fault(codes::INVALID_PARAMS, "num_blocks and block_size must be non-zero"));
                }
                state.next_device += 1;
                let n = state.next_device;
                let name = args.name.unwrap_or_else(|| format!("Malloc{}", n - 1));
                let uuid = args
                    .uuid
                    .unwrap_or_else(|| format!("00000000-0000-4000-8000-{n:012x}"));
                state.insert_new(BDev {
                    name: name.clone(),
                    product_name: MALLOC_PRODUCT_NAME.to_string(),
                    uuid,
                    block_size: args.block_size,
                    num_blocks: args.num_blocks,
                    claimed: false,
                    supported_io_types: io_types(),
                })?;
                Ok(json!(name))
            }
            wire::CONSTRUCT_RBD_BDEV => {
                let args: ConstructRbdBDevArgs = required(params)?;
                if args.pool_name.is_empty() || args.rbd_name.is_empty() {
                    return Err(fault(codes::INVALID_PARAMS, "pool_name and rbd_name are required"));
                }
                state.next_device += 1;
                let n = state.next_device;
                let name = if args.name.is_empty() { format!("Ceph{}", n - 1) } else { args.name };
                state.insert_new(BDev {
                    name: name.clone(),
                    product_name: RBD_PRODUCT_NAME.to_string(),
                    uuid: format!("00000000-0000-4000-9000-{n:012x}"),
                    block_size: args.block_size,
                    num_blocks: 2048,
                    claimed: false,
                    supported_io_types: io_types(),
                })?;
                Ok(json!(name))
            }
            wire::DELETE_BDEV => {
                let args: DeleteBDevArgs = required(params)?;
                match state.bdevs.get(&args.name).map(|bdev| bdev.claimed) {
                    None => Err(fault(codes::ENODEV, "No such device")),
                    Some(true) => Err(fault(codes::EBUSY, "Device or resource busy")),
                    Some(false) => {
                        state.bdevs.remove(&args.name);
                        Ok(json!(true))
                    }
                }
            }
            wire::GET_VHOST_CONTROLLERS => {
                let controllers: Vec<Value> = state
                    .controllers
                    .iter()
                    .map(|(name, c)| {
                        let targets: Vec<Value> = c
                            .targets
                            .iter()
                            .map(|(num, bdev)| {
                                json!({
                                    "scsi_dev_num": num,
                                    "id": num,
                                    "target_name": format!("Target {num}"),
                                    "luns": [{"id": 0, "bdev_name": bdev}],
                                })
                            })
                            .collect();
                        json!({
                            "ctrlr": name,
                            "cpumask": c.cpumask,
                            "delay_base_us": 0,
                            "iops_threshold": 60000,
                            "backend_specific": {"scsi": targets},
                        })
                    })
                    .collect();
                Ok(Value::Array(controllers))
            }
            wire::CONSTRUCT_VHOST_SCSI_CONTROLLER => {
                let args: ConstructVhostScsiControllerArgs = required(params)?;
                if state.controllers.contains_key(&args.ctrlr) {
                    return Err(fault(codes::EEXIST, "File exists"));
                }
                state.controllers.insert(
                    args.ctrlr,
                    MockController {
                        cpumask: args.cpumask.unwrap_or_else(|| "0x1".to_string()),
                        ..Default::default()
                    },
                );
                Ok(json!(true))
            }
            wire::ADD_VHOST_SCSI_LUN => {
                let args: AddVhostScsiLunArgs = required(params)?;
                if args.scsi_target_num >= MOCK_MAX_TARGETS {
                    return Err(fault(codes::INVALID_PARAMS, "Target number out of range"));
                }
                let claimed = match state.bdevs.get(&args.bdev_name) {
                    None => return Err(fault(codes::ENODEV, "No such device")),
                    Some(bdev) => bdev.claimed,
                };
                let controller = state
                    .controllers
                    .get_mut(&args.ctrlr)
                    .ok_or_else(|| fault(codes::ENODEV, "No such device"))?;
                if controller.targets.contains_key(&args.scsi_target_num) {
                    return Err(fault(codes::EEXIST, "Target already exists"));
                }
                if claimed {
                    return Err(fault(codes::EBUSY, "Device or resource busy"));
                }
                controller
                    .targets
                    .insert(args.scsi_target_num, args.bdev_name.clone());
                if let Some(bdev) = state.bdevs.get_mut(&args.bdev_name) {
                    bdev.claimed = true;
                }
                Ok(json!(args.scsi_target_num))
            }
            wire::REMOVE_VHOST_SCSI_TARGET => {
                let args: RemoveVhostScsiTargetArgs = required(params)?;
                let bdev_name = state
                    .controllers
                    .get_mut(&args.ctrlr)
                    .ok_or_else(|| fault(codes::ENODEV, "No such device"))?
                    .targets
                    .remove(&args.scsi_target_num)
                    .ok_or_else(|| fault(codes::ENODEV, "No such target"))?;
                if let Some(bdev) = state.bdevs.get_mut(&bdev_name) {
                    bdev.claimed = false;
                }
                Ok(json!(true))
            }
            other => Err(fault(codes::METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }
}

impl MockState {
    fn insert_new(&mut self, bdev: BDev) -> Result<(), Fault> {
        if self.bdevs.contains_key(&bdev.name) {
            return Err(fault(codes::EEXIST, "File exists"));
        }
        self.bdevs.insert(bdev.name.clone(), bdev);
        Ok(())
    }
}

fn io_types() -> SupportedIoTypes {
    SupportedIoTypes {
        read: true,
        write: true,
        unmap: true,
        write_zeroes: true,
        flush: true,
        reset: true,
        ..Default::default()
    }
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, Fault> {
    serde_json::from_value(params.clone()).map_err(|e| fault(codes::INVALID_PARAMS, e.to_string()))
}

fn required<T: DeserializeOwned>(params: Option<&Value>) -> Result<T, Fault> {
    params
        .ok_or_else(|| fault(codes::INVALID_PARAMS, "Missing params"))
        .and_then(parse)
}
