// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`oim-controller-core`)
//!
//! HTTP surface that translates external requests into controller calls.
//! No reconciliation logic lives here; all work is delegated to
//! [`crate::application::controller::VolumeController`].
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `GET /health` | liveness |
//! | `POST /v1/volumes/{volume_id}/map` | MapVolume |
//! | `POST /v1/volumes/{volume_id}/unmap` | UnmapVolume |
//! | `PUT /v1/bdevs/{name}` | ProvisionBDev |
//! | `GET /v1/bdevs/{name}` | CheckBDev |

pub mod api;
