// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Types and contracts shared by the reconciliation engine and its adapters.
//! Nothing here talks to SPDK or the network.

pub mod backend;
pub mod controller_config;
pub mod events;
pub mod registry;
pub mod volume;
