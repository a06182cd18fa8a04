// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`courier-core`)
//!
//! HTTP surface that translates A2A requests into application service calls.
//! No business logic lives here; all real work is delegated to
//! `crate::application`.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | A2A task endpoints, bearer auth, health |

pub mod api;
