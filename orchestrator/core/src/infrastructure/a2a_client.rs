// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Outbound A2A Client
//!
//! Sends delegation, status, cancel and state-update requests to peer agents.
//!
//! Two failures are decided locally, before any request is built: a missing
//! bearer credential and a target agent the [`PeerResolver`] does not know.
//! Neither is ever retried. Everything after the request leaves the process is
//! classified by [`ClientError::is_retryable`] and driven through the shared
//! [`RetryPolicy`].
//!
//! Successful responses must carry a JSON content type (`application/json` or
//! any `+json` suffix). A different type fails the call; a missing header is
//! accepted with a warning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::agent::AgentId;
use crate::domain::node_config::ClientConfig;
use crate::domain::repository::RepositoryError;
use crate::domain::task::{SendMessageRequest, SendMessageResponse, StateUpdate, Task, TaskId};
use crate::infrastructure::retry::{RetryInterrupted, RetryPolicy};

const MAX_ERROR_BODY: usize = 512;

/// Maps an agent id to the base URL requests for it are sent to.
#[async_trait]
pub trait PeerResolver: Send + Sync {
    async fn resolve(&self, agent_id: &AgentId) -> Result<Option<String>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no bearer credential configured for outbound A2A calls")]
    MissingCredential,

    #[error("unknown agent '{0}'")]
    UnknownAgent(AgentId),

    #[error("failed to resolve agent '{agent_id}': {message}")]
    Resolution { agent_id: AgentId, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("network error calling {url}: {message}")]
    Network { url: String, message: String },

    #[error("unexpected content type '{content_type}' from {url}")]
    ContentType { url: String, content_type: String },

    #[error("invalid response body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error(transparent)]
    Interrupted(#[from] RetryInterrupted),
}

impl ClientError {
    /// 5xx, 429 and transport failures are worth another attempt. Everything
    /// else, including all local errors, is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http { status, .. } => *status >= 500 || *status == 429,
            ClientError::Network { .. } => true,
            _ => false,
        }
    }

    /// Raised before any network attempt.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::MissingCredential
                | ClientError::UnknownAgent(_)
                | ClientError::Resolution { .. }
                | ClientError::InvalidRequest(_)
        )
    }
}

pub struct A2aClient {
    http: reqwest::Client,
    resolver: Arc<dyn PeerResolver>,
    token: Option<String>,
    policy: RetryPolicy,
}

impl A2aClient {
    pub fn new(
        resolver: Arc<dyn PeerResolver>,
        token: Option<String>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms.clamp(100, 300_000));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            http,
            resolver,
            token: token.filter(|t| !t.is_empty()),
            policy: RetryPolicy::from_config(config),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delegate a task to `agent_id`. Cancelling `cancel` stops further retries.
    pub async fn send_message(
        &self,
        agent_id: &AgentId,
        request: &SendMessageRequest,
        cancel: &CancellationToken,
    ) -> Result<SendMessageResponse, ClientError> {
        self.call(agent_id, Method::POST, &["a2a", "send-message"], Some(request), cancel)
            .await
    }

    pub async fn get_task(&self, agent_id: &AgentId, task_id: &TaskId) -> Result<Task, ClientError> {
        self.call::<(), _>(
            agent_id,
            Method::GET,
            &["a2a", "tasks", task_id.as_str()],
            None,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn cancel_task(&self, agent_id: &AgentId, task_id: &TaskId) -> Result<Task, ClientError> {
        self.call::<(), _>(
            agent_id,
            Method::POST,
            &["a2a", "tasks", task_id.as_str(), "cancel"],
            None,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn update_task_state(
        &self,
        agent_id: &AgentId,
        task_id: &TaskId,
        update: &StateUpdate,
    ) -> Result<Task, ClientError> {
        self.call(
            agent_id,
            Method::PATCH,
            &["a2a", "tasks", task_id.as_str(), "state"],
            Some(update),
            &CancellationToken::new(),
        )
        .await
    }

    async fn call<B, T>(
        &self,
        agent_id: &AgentId,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let token = self.token.as_deref().ok_or(ClientError::MissingCredential)?;
        let endpoint = self
            .resolver
            .resolve(agent_id)
            .await
            .map_err(|e| ClientError::Resolution {
                agent_id: agent_id.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| ClientError::UnknownAgent(agent_id.clone()))?;
        let url = build_url(&endpoint, segments)?;
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        self.policy
            .run(
                cancel,
                |attempt| self.attempt(method.clone(), &url, token, body.as_ref(), attempt),
                ClientError::is_retryable,
            )
            .await
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&serde_json::Value>,
        attempt: u32,
    ) -> Result<T, ClientError> {
        debug!(%method, url, attempt, "Outbound A2A request");
        metrics::counter!("courier_outbound_attempts_total").increment(1);

        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ClientError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(ClientError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body: text,
            });
        }

        check_content_type(response.headers(), url)?;

        let bytes = response.bytes().await.map_err(|e| ClientError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn build_url(endpoint: &str, segments: &[&str]) -> Result<String, ClientError> {
    let mut url = url::Url::parse(endpoint)
        .map_err(|e| ClientError::InvalidRequest(format!("bad peer endpoint '{}': {}", endpoint, e)))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidRequest(format!("peer endpoint '{}' cannot be a base", endpoint)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

fn is_json_media_type(raw: &str) -> bool {
    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

fn check_content_type(headers: &HeaderMap, url: &str) -> Result<(), ClientError> {
    match headers.get(CONTENT_TYPE) {
        None => {
            warn!(url, "Response has no content type, assuming JSON");
            Ok(())
        }
        Some(value) => {
            let raw = value.to_str().unwrap_or("");
            if is_json_media_type(raw) {
                Ok(())
            } else {
                Err(ClientError::ContentType {
                    url: url.to_string(),
                    content_type: raw.to_string(),
                })
            }
        }
    }
}
