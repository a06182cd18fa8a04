// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task List Filters
//!
//! Caller-supplied list filters arrive as strings. [`TaskFilter::validate`]
//! turns them into a [`ValidatedTaskFilter`] made only of typed values, and
//! repositories accept nothing else. Enum fields are matched against fixed
//! whitelists, array filters are capped, pagination is bounded and timestamps
//! must parse and fall inside `[epoch, now + 100 years]`. The first violation is
//! reported as a [`ValidationError`] naming the field.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::task::{Task, TaskPriority};
use crate::domain::task_state::TaskState;
use crate::domain::validation::ValidationError;

/// Maximum number of values accepted in one array-valued filter.
pub const MAX_FILTER_VALUES: usize = 100;
/// Hard cap on page size.
pub const MAX_LIST_LIMIT: u32 = 10_000;
/// Page size used when the caller does not supply `limit`.
pub const DEFAULT_LIST_LIMIT: u32 = 100;
/// Upper bound for timestamp filters, relative to now.
pub const MAX_FUTURE_YEARS: i64 = 100;

/// Unvalidated list filters, shaped like the HTTP query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    #[serde(default)]
    pub state: Vec<String>,
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default)]
    pub created_after: Option<String>,
    #[serde(default)]
    pub created_before: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Typed filters; the only form a repository will query with.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTaskFilter {
    pub states: Vec<TaskState>,
    pub priorities: Vec<TaskPriority>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ValidatedTaskFilter {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            priorities: Vec::new(),
            created_after: None,
            created_before: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl TaskFilter {
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state.push(state.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority.push(priority.into());
        self
    }

    pub fn validate(&self) -> Result<ValidatedTaskFilter, ValidationError> {
        self.validate_at(Utc::now())
    }

    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<ValidatedTaskFilter, ValidationError> {
        let states = parse_whitelisted::<TaskState>("state", &self.state)?;
        let priorities = parse_whitelisted::<TaskPriority>("priority", &self.priority)?;

        let created_after = self
            .created_after
            .as_deref()
            .map(|raw| parse_timestamp("createdAfter", raw, now))
            .transpose()?;
        let created_before = self
            .created_before
            .as_deref()
            .map(|raw| parse_timestamp("createdBefore", raw, now))
            .transpose()?;

        if let (Some(after), Some(before)) = (created_after, created_before) {
            if after > before {
                return Err(ValidationError::new(
                    "createdAfter",
                    "must not be later than createdBefore",
                ));
            }
        }

        let limit = match self.limit {
            None => DEFAULT_LIST_LIMIT,
            Some(raw) if raw < 0 => {
                return Err(ValidationError::new("limit", "must be a non-negative integer"))
            }
            Some(raw) if raw > MAX_LIST_LIMIT as i64 => {
                return Err(ValidationError::new(
                    "limit",
                    format!("must not exceed {}", MAX_LIST_LIMIT),
                ))
            }
            Some(raw) => raw as u32,
        };

        let offset = match self.offset {
            None => 0,
            Some(raw) if raw < 0 => {
                return Err(ValidationError::new("offset", "must be a non-negative integer"))
            }
            Some(raw) if raw > u32::MAX as i64 => {
                return Err(ValidationError::new("offset", "is too large"))
            }
            Some(raw) => raw as u32,
        };

        Ok(ValidatedTaskFilter {
            states,
            priorities,
            created_after,
            created_before,
            limit,
            offset,
        })
    }
}

impl ValidatedTaskFilter {
    /// Row predicate for backends that cannot push filters into a query.
    /// Pagination is not applied here.
    pub fn matches(&self, task: &Task) -> bool {
        (self.states.is_empty() || self.states.contains(&task.state))
            && (self.priorities.is_empty() || self.priorities.contains(&task.priority))
            && self.created_after.map_or(true, |after| task.created_at >= after)
            && self.created_before.map_or(true, |before| task.created_at <= before)
    }
}

/// Parse an integer query parameter, naming `field` on failure.
pub fn parse_integer_param(field: &str, raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::new(field, format!("'{}' is not an integer", raw)))
}

fn parse_whitelisted<T>(field: &str, raw: &[String]) -> Result<Vec<T>, ValidationError>
where
    T: std::str::FromStr<Err = ValidationError> + PartialEq,
{
    if raw.len() > MAX_FILTER_VALUES {
        return Err(ValidationError::new(
            field,
            format!(
                "at most {} values are allowed, got {}",
                MAX_FILTER_VALUES,
                raw.len()
            ),
        ));
    }

    let mut values = Vec::with_capacity(raw.len());
    for item in raw {
        let value = item
            .parse::<T>()
            .map_err(|e| ValidationError::new(field, e.message))?;
        if !values.contains(&value) {
            values.push(value);
        }
    }
    Ok(values)
}

fn parse_timestamp(
    field: &str,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ValidationError> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
                .ok_or(())
        })
        .map_err(|_| {
            ValidationError::new(field, format!("'{}' is not a valid RFC 3339 date-time", raw))
        })?;

    let upper = now + chrono::Duration::days(MAX_FUTURE_YEARS * 365 + MAX_FUTURE_YEARS / 4);
    if parsed < DateTime::<Utc>::UNIX_EPOCH || parsed > upper {
        return Err(ValidationError::new(
            field,
            format!("'{}' is outside the accepted range", raw),
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_defaults() {
        let filter = TaskFilter::default().validate().unwrap();
        assert_eq!(filter, ValidatedTaskFilter::default());
    }

    #[test]
    fn test_array_cap_boundary() {
        let mut filter = TaskFilter::default();
        filter.state = vec!["SUBMITTED".to_string(); MAX_FILTER_VALUES];
        let validated = filter.validate().unwrap();
        assert_eq!(validated.states, vec![TaskState::Submitted]);

        filter.state.push("WORKING".to_string());
        let err = filter.validate().unwrap_err();
        assert_eq!(err.field, "state");
    }

    #[test]
    fn test_injection_is_rejected() {
        let err = TaskFilter::default()
            .with_state("SUBMITTED' OR '1'='1")
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "state");

        let err = TaskFilter::default()
            .with_priority("low') --")
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "priority");
    }

    #[test]
    fn test_pagination_bounds() {
        let mut filter = TaskFilter::default();
        filter.limit = Some(10_000);
        assert_eq!(filter.validate().unwrap().limit, 10_000);

        filter.limit = Some(10_001);
        assert_eq!(filter.validate().unwrap_err().field, "limit");

        filter.limit = Some(-1);
        assert_eq!(filter.validate().unwrap_err().field, "limit");

        filter.limit = Some(0);
        filter.offset = Some(-5);
        assert_eq!(filter.validate().unwrap_err().field, "offset");
    }

    #[test]
    fn test_timestamp_range() {
        let now = Utc::now();
        let mut filter = TaskFilter::default();

        filter.created_after = Some("2024-01-01T00:00:00Z".to_string());
        assert!(filter.validate_at(now).is_ok());

        filter.created_after = Some("2024-01-01".to_string());
        assert!(filter.validate_at(now).is_ok());

        filter.created_after = Some("yesterday".to_string());
        assert_eq!(filter.validate_at(now).unwrap_err().field, "createdAfter");

        filter.created_after = Some("1969-12-31T23:59:59Z".to_string());
        assert_eq!(filter.validate_at(now).unwrap_err().field, "createdAfter");

        filter.created_after = None;
        filter.created_before = Some("2300-01-01T00:00:00Z".to_string());
        assert_eq!(filter.validate_at(now).unwrap_err().field, "createdBefore");
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut filter = TaskFilter::default();
        filter.created_after = Some("2025-06-01T00:00:00Z".to_string());
        filter.created_before = Some("2025-01-01T00:00:00Z".to_string());
        assert_eq!(filter.validate().unwrap_err().field, "createdAfter");
    }

    #[test]
    fn test_parse_integer_param() {
        assert_eq!(parse_integer_param("limit", "25").unwrap(), 25);
        assert_eq!(parse_integer_param("offset", "ten").unwrap_err().field, "offset");
    }
}
