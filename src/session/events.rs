use crate::protocol::Outcome;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Progress notifications for whoever drives a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { session_id: String },
    /// The backend has the run; the caller may clear its input.
    Submitted,
    CodeRequested { attempt: usize },
    CodeSent { attempt: usize },
    CodeEntryAborted { attempt: usize },
    /// An event the relay does not understand and skipped.
    Ignored { event: Option<String> },
    Finished(Outcome),
    Closed(CloseReason),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", rename_all = "lowercase")]
pub enum CloseReason {
    /// Cancelled on the client side.
    Client,
    /// The backend reported an outcome.
    Completed,
    /// The backend closed the connection.
    Backend {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// Summary returned when a session ends normally.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub codes_sent: usize,
    pub codes_aborted: usize,
    /// `None` when the backend closed without reporting a result.
    pub outcome: Option<Outcome>,
    pub closed_by: CloseReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    /// Turn a reported failure into `Error::Rejected`.
    pub fn into_result(self) -> crate::Result<Self> {
        match &self.outcome {
            Some(outcome) if !outcome.success => Err(crate::Error::Rejected(
                outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "no reason given".to_string()),
            )),
            _ => Ok(self),
        }
    }
}
