// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Input Validation Errors
//!
//! Every caller-supplied value that reaches a query, a state transition, or a
//! configuration knob is checked before use. Failures are reported as a
//! [`ValidationError`] naming the offending field so the HTTP layer can echo it
//! back verbatim. Validation errors are never retried.

use serde::Serialize;
use thiserror::Error;

/// Malformed or out-of-range caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("invalid value for `{field}`: {message}")]
pub struct ValidationError {
    /// Name of the input field as the caller spelled it (e.g. `createdAfter`).
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
