// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod controller;
pub mod reconcile;
pub mod registration;

pub use controller::{ControllerError, ControllerSettings, StandardController, VolumeController};
pub use registration::{RegistrationConfig, RegistrationHandle, RegistrationLoop};
