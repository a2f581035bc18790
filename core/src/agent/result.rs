use crate::agent::registry::FaultKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    Incomplete,
    Failed,
    Cancelled,
    Expired,
    /// The local deadline passed; the remote run may still be alive.
    ExpiredLocally,
    /// The caller gave up on the turn.
    CancelledLocally,
}

impl TurnStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::ExpiredLocally => "expired-locally",
            Self::CancelledLocally => "cancelled-locally",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnError {
    Remote { code: String, message: String },
    LocalTimeout { elapsed_ms: u64 },
    Cancelled,
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { code, message } => write!(f, "{code}: {message}"),
            Self::LocalTimeout { elapsed_ms } => {
                write!(f, "turn timed out locally after {elapsed_ms} ms")
            }
            Self::Cancelled => write!(f, "turn cancelled by caller"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Artifact(ArtifactRef),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub index: usize,
    pub file_id: String,
    pub quote: Option<String>,
}

/// A tool handler failure seen during the turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolFault {
    pub call_id: String,
    pub tool: String,
    pub kind: FaultKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Option<String>,
    pub status: TurnStatus,
    pub segments: Vec<Segment>,
    pub references: Vec<Reference>,
    pub error: Option<TurnError>,
    pub tool_faults: Vec<ToolFault>,
    pub batches: usize,
    /// Message retrieval stopped before reaching the start of the turn, so
    /// its earliest assistant output may be missing.
    #[serde(default)]
    pub truncated: bool,
}

impl RunResult {
    pub fn empty(run_id: Option<String>, status: TurnStatus) -> Self {
        Self {
            run_id,
            status,
            segments: vec![],
            references: vec![],
            error: None,
            tool_faults: vec![],
            batches: 0,
            truncated: false,
        }
    }

    pub fn with_error(mut self, error: TurnError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { text } => Some(text.as_str()),
                Segment::Artifact(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn artifact_ids(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Artifact(a) => Some(a.file_id.as_str()),
                Segment::Text { .. } => None,
            })
            .collect()
    }
}
