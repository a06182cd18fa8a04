// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer (`courier-core`)
//!
//! Pure types and rules of A2A task delegation: the task lifecycle, list
//! filter validation, peer agent records, domain events, repository contracts
//! and node configuration. Nothing in here performs I/O except configuration
//! file loading.

pub mod agent;
pub mod events;
pub mod node_config;
pub mod repository;
pub mod task;
pub mod task_filter;
pub mod task_state;
pub mod validation;
