// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster API style status conditions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// How urgently a False condition needs attention.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn ready(condition_type: &str, reason: &str, now: DateTime<Utc>) -> Self {
        Condition {
            condition_type: condition_type.to_string(),
            status: ConditionStatus::True,
            severity: None,
            last_transition_time: Some(format_time(now)),
            reason: reason.to_string(),
            message: String::new(),
        }
    }

    pub fn not_ready(
        condition_type: &str,
        reason: &str,
        severity: Severity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Condition {
            condition_type: condition_type.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            last_transition_time: Some(format_time(now)),
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Equality ignoring the transition timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }

    pub fn transitioned_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Ordering used when several conditions collapse into one; higher is worse.
    fn rank(&self) -> u8 {
        match (self.status, self.severity) {
            (ConditionStatus::True, _) => 0,
            (ConditionStatus::Unknown, _) => 1,
            (ConditionStatus::False, Some(Severity::Info)) => 2,
            (ConditionStatus::False, Some(Severity::Warning)) => 3,
            (ConditionStatus::False, _) => 4,
        }
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn get<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Insert or overwrite the condition of the same type. The previous transition
/// time is kept while neither status nor reason change. Returns whether
/// anything other than the timestamp changed.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) if existing.same_state(&condition) => false,
        Some(existing) => {
            if existing.status == condition.status && existing.reason == condition.reason {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Collapse several conditions into the most severe one.
pub fn aggregate<'a>(conditions: impl IntoIterator<Item = &'a Condition>) -> Option<Condition> {
    conditions
        .into_iter()
        .fold(None::<&Condition>, |worst, c| match worst {
            Some(w) if w.rank() >= c.rank() => Some(w),
            _ => Some(c),
        })
        .cloned()
}
