// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod delegation_queue;
pub mod peer_registry;
pub mod repository_factory;
pub mod task_service;

pub use delegation_queue::{DelegationQueue, PendingTaskEntry, QueueError};
pub use peer_registry::{PeerRegistry, RegistryBinding, RegistryError};
pub use task_service::{TaskService, TaskServiceError};
