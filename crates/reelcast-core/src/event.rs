//! Notifications delivered to the owner of a recording session

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the encoder produced for a finished recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    /// Location of the finalized video file
    pub path: PathBuf,
    /// Frames appended to the stream
    pub frames_written: u64,
    /// Frames discarded because the writer was not ready
    pub frames_dropped: u64,
    /// Playback duration of the stream
    pub duration: Duration,
}

/// Terminal notification for a recording. Exactly one is sent per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecordingEvent {
    /// The caller stopped the recording and the file is ready
    FinishedSaving {
        session: SessionId,
        summary: RecordingSummary,
    },
    /// The surface changed size, so the session stopped itself.
    ///
    /// The frames captured before the change are saved when there were any.
    /// `failure` is set when the file could not be finalized.
    FinishedWithoutExplicitStop {
        session: SessionId,
        summary: Option<RecordingSummary>,
        failure: Option<String>,
    },
    /// A resource failure aborted the recording; no file was kept
    Failed { session: SessionId, reason: String },
}

impl RecordingEvent {
    /// Session the event belongs to
    pub fn session(&self) -> SessionId {
        match self {
            RecordingEvent::FinishedSaving { session, .. }
            | RecordingEvent::FinishedWithoutExplicitStop { session, .. }
            | RecordingEvent::Failed { session, .. } => *session,
        }
    }

    /// Summary of the saved file, if the recording produced one
    pub fn summary(&self) -> Option<&RecordingSummary> {
        match self {
            RecordingEvent::FinishedSaving { summary, .. } => Some(summary),
            RecordingEvent::FinishedWithoutExplicitStop { summary, .. } => summary.as_ref(),
            RecordingEvent::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generation() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_drift_event_carries_failure() {
        let event = RecordingEvent::FinishedWithoutExplicitStop {
            session: SessionId::new(),
            summary: None,
            failure: Some("disk full".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FinishedWithoutExplicitStop");
        assert_eq!(json["failure"], "disk full");
        assert!(event.summary().is_none());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = RecordingEvent::Failed {
            session: SessionId::new(),
            reason: "Surface returned no image".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Failed");
        assert!(event.summary().is_none());
    }
}
