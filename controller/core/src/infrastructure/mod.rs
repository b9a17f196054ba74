// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod keymutex;
pub mod registry;
pub mod spdk;

pub use event_bus::EventBus;
pub use keymutex::KeyMutex;
