// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SPDK Infrastructure Module
//!
//! JSON-RPC transport to a local SPDK process and the [`BlockBackend`]
//! implementation built on it. [`MockSpdk`] is compiled for tests and with
//! the `test-util` feature.
//!
//! [`BlockBackend`]: crate::domain::backend::BlockBackend

pub mod backend;
pub mod client;
pub mod codec;
pub mod logging;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod vhost;
pub mod wire;

pub use backend::SpdkBackend;
pub use client::JsonRpcClient;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockFault, MockSpdk};
