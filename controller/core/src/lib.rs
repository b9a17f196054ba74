// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `oim-controller-core`
//!
//! Control plane that maps logical volumes onto block devices exposed by a
//! user-space SPDK process through a vhost SCSI controller.
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | BDev/vhost model, volume types, `BlockBackend` and `Registry` contracts, config manifest |
//! | [`application`] | Application | `StandardController` reconciliation engine, self-registration loop |
//! | [`infrastructure`] | Infrastructure | SPDK JSON-RPC client, registry clients, keyed lock, event bus |
//! | [`presentation`] | Presentation | Axum router over the four controller operations |
//!
//! The controller keeps no durable state: every call re-reads the backend
//! and reconciles against what it observes.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
