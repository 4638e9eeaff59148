//! Pending human decisions raised by steps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a decision still awaits a choice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Pending,
    Resolved,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One option offered to the human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionProposal {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A request for human choice attached to an execution step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingDecision {
    pub id: String,
    pub execution_id: String,
    pub step_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub proposals: Vec<DecisionProposal>,
    #[serde(default)]
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingDecision {
    pub fn is_pending(&self) -> bool {
        self.status == DecisionStatus::Pending
    }
}

/// Partial update of a decision.
///
/// When `expect_status` is set, the store applies the update only if the stored
/// status matches, checked and written under the same lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionUpdate {
    pub status: Option<DecisionStatus>,
    pub choice: Option<String>,
    pub notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub expect_status: Option<DecisionStatus>,
}

impl DecisionUpdate {
    /// Resolve a still-pending decision with `choice`.
    pub fn resolve(choice: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            status: Some(DecisionStatus::Resolved),
            choice: Some(choice.into()),
            notes,
            resolved_at: Some(Utc::now()),
            expect_status: Some(DecisionStatus::Pending),
        }
    }
}
