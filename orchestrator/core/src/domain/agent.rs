// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a peer agent. Opaque: peers choose their own names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Stale,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Stale => "stale",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(AgentStatus::Active),
            "stale" => Some(AgentStatus::Stale),
            _ => None,
        }
    }
}

/// A known peer agent and the OS process backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: AgentId,
    /// Scheme and host, e.g. `http://127.0.0.1`.
    pub base_url: String,
    pub port: u16,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

impl AgentRecord {
    pub fn new(agent_id: AgentId, base_url: impl Into<String>, port: u16) -> Self {
        Self {
            agent_id,
            base_url: base_url.into(),
            port,
            status: AgentStatus::Active,
            last_heartbeat: Utc::now(),
            process_pid: None,
            capabilities: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.process_pid = Some(pid);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Root URL requests to this peer are built on.
    ///
    /// A `base_url` that already carries an explicit port is used as-is.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let authority = base.split("://").nth(1).unwrap_or(base);
        let has_port = match authority.rfind(']') {
            Some(idx) => authority[idx..].contains(':'),
            None => authority.contains(':'),
        };
        if has_port {
            base.to_string()
        } else {
            format!("{}:{}", base, self.port)
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_heartbeat
    }
}
