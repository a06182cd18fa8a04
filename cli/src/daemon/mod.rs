// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Wiring and running the node ([`server::start_daemon`])
//! - HTTP health checks against a running node

use anyhow::Result;
use std::time::Duration;

pub mod server;

pub use server::start_daemon;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Running {
        uptime: Option<u64>,
        busy_agents: Option<u64>,
    },
    Stopped,
    Unhealthy {
        error: String,
    },
}

/// Base URL for `host`, which may already carry a scheme.
pub fn node_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host.trim_end_matches('/'), port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check whether a node answers `GET /health` on `host:port`.
pub async fn check_node_running(host: &str, port: u16) -> Result<NodeStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", node_url(host, port));

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.json::<serde_json::Value>().await.ok();
            let uptime = body.as_ref().and_then(|v| v["uptime_seconds"].as_u64());
            let busy_agents = body.as_ref().and_then(|v| v["queue"]["busy_agents"].as_u64());
            Ok(NodeStatus::Running { uptime, busy_agents })
        }
        Ok(resp) => Ok(NodeStatus::Unhealthy {
            error: format!("health check returned {}", resp.status()),
        }),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(NodeStatus::Stopped),
        Err(e) => Ok(NodeStatus::Unhealthy { error: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(url: &str) -> (String, u16) {
        let (host, port) = url.rsplit_once(':').unwrap();
        (host.to_string(), port.parse().unwrap())
    }

    #[test]
    fn test_node_url_accepts_scheme_or_bare_host() {
        assert_eq!(node_url("127.0.0.1", 4100), "http://127.0.0.1:4100");
        assert_eq!(node_url("https://node.internal/", 443), "https://node.internal:443");
    }

    #[tokio::test]
    async fn test_healthy_node_reports_uptime() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"healthy","uptime_seconds":42,"queue":{"entries":1,"busy_agents":1}}"#)
            .create_async()
            .await;

        let (host, port) = split(&server.url());
        let status = check_node_running(&host, port).await.unwrap();
        assert_eq!(
            status,
            NodeStatus::Running {
                uptime: Some(42),
                busy_agents: Some(1)
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_unhealthy() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/health").with_status(503).create_async().await;

        let (host, port) = split(&server.url());
        let status = check_node_running(&host, port).await.unwrap();
        assert!(matches!(status, NodeStatus::Unhealthy { .. }));
    }

    #[tokio::test]
    async fn test_nothing_listening_is_stopped() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let status = check_node_running("127.0.0.1", port).await.unwrap();
        assert_eq!(status, NodeStatus::Stopped);
    }
}
