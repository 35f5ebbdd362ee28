//! Complaint lifecycle state machine: adjacency table, derived predicates
//! and guard rules checked at every transition.

use chrono::{DateTime, Utc};

use super::complaint::ComplaintStatus;
use crate::error::AppError;

use ComplaintStatus::*;

/// Outbound transitions allowed from `from`. Anything not listed is rejected.
pub fn allowed_transitions(from: ComplaintStatus) -> &'static [ComplaintStatus] {
    match from {
        Open => &[InProgress, OnHold, Escalated, Closed],
        InProgress => &[Resolved, OnHold, Escalated, Closed],
        Resolved => &[Closed, Reopened],
        Closed => &[Reopened],
        Unresolved => &[Reopened],
        Escalated => &[InProgress, OnHold, Closed],
        OnHold => &[InProgress, Escalated, Closed],
        Reopened => &[InProgress, OnHold, Closed],
    }
}

pub fn can_transition(current: ComplaintStatus, next: ComplaintStatus) -> bool {
    allowed_transitions(current).contains(&next)
}

pub fn is_final(status: ComplaintStatus) -> bool {
    matches!(status, Closed | Resolved | Unresolved)
}

pub fn is_active(status: ComplaintStatus) -> bool {
    !is_final(status)
}

pub fn is_resolved(status: ComplaintStatus) -> bool {
    status == Resolved
}

pub fn is_closed(status: ComplaintStatus) -> bool {
    matches!(status, Closed | Unresolved)
}

/// A requested status change with the guard fields that accompany it
#[derive(Debug, Clone)]
pub struct TransitionRequest<'a> {
    pub target: ComplaintStatus,
    pub resolution_notes: Option<&'a str>,
    pub reopen_reason: Option<&'a str>,
    pub expected_resolution_at: Option<DateTime<Utc>>,
}

impl<'a> TransitionRequest<'a> {
    pub fn to(target: ComplaintStatus) -> Self {
        Self {
            target,
            resolution_notes: None,
            reopen_reason: None,
            expected_resolution_at: None,
        }
    }

    pub fn with_resolution_notes(mut self, notes: &'a str) -> Self {
        self.resolution_notes = Some(notes);
        self
    }

    pub fn with_reopen_reason(mut self, reason: &'a str) -> Self {
        self.reopen_reason = Some(reason);
        self
    }

    pub fn with_expected_resolution_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.expected_resolution_at = at;
        self
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Check adjacency and guard rules together. Every violation is reported in
/// one `Validation` error so the caller can render all of them at once.
pub fn validate_transition(
    current: ComplaintStatus,
    request: &TransitionRequest<'_>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut violations = Vec::new();

    if !can_transition(current, request.target) {
        violations.push(format!(
            "invalid status transition from {} to {}",
            current, request.target
        ));
    }

    if request.target == Resolved {
        if is_blank(request.resolution_notes) {
            violations.push("resolution_notes is required when resolving".to_string());
        }
    } else if request.resolution_notes.is_some() {
        violations.push("resolution_notes is only allowed when resolving".to_string());
    }

    if request.target == Reopened {
        if is_blank(request.reopen_reason) {
            violations.push("reopen_reason is required when reopening".to_string());
        }
    } else if request.reopen_reason.is_some() {
        violations.push("reopen_reason is only allowed when reopening".to_string());
    }

    if let Some(at) = request.expected_resolution_at {
        if at < now {
            violations.push("expected_resolution_at must not be in the past".to_string());
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(violations.join("; ")))
    }
}
