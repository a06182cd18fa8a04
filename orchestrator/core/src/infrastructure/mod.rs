// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod a2a_client;
pub mod db;
pub mod event_bus;
pub mod pool;
pub mod process;
pub mod repositories;
pub mod retry;

pub use a2a_client::{A2aClient, ClientError, PeerResolver};
pub use pool::{ConnectionManager, ConnectionPool, PoolConfig, PoolError};
