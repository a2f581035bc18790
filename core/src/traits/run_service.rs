use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Incomplete,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Incomplete | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Statuses in which the remote side is still working and only needs polling.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text exactly as the remote side sent it.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolOutput {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: message.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub conversation_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub pending_calls: Vec<ToolCall>,
    #[serde(default)]
    pub last_error: Option<RunError>,
    pub created_at: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Run {
    /// `pending_calls` must be non-empty exactly when the run requires action.
    pub fn check_invariants(&self) -> Result<(), String> {
        let requires_action = self.status == RunStatus::RequiresAction;
        match (requires_action, self.pending_calls.is_empty()) {
            (true, true) => Err(format!(
                "run {} requires action but has no pending tool calls",
                self.id
            )),
            (false, false) => Err(format!(
                "run {} is {} but carries {} pending tool calls",
                self.id,
                self.status,
                self.pending_calls.len()
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    Citation {
        file_id: String,
        #[serde(default)]
        quote: Option<String>,
    },
    FilePath {
        file_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    /// The literal text inside the content that the annotation points at.
    pub marker: String,
    pub kind: AnnotationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        value: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    Image {
        file_id: String,
    },
}

impl ContentPart {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
            annotations: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub run_id: Option<String>,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Network failure, timeout, rate limit or 5xx: worth retrying.
    #[error("transient service error: {0}")]
    Transient(String),

    /// The remote side refused the request (stale or duplicate outputs, wrong run state).
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("service error: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The remote conversational service that owns runs.
#[async_trait]
pub trait RunService: Send + Sync {
    async fn start_run(&self, conversation_id: &str, input: &str) -> Result<Run, ServiceError>;

    async fn get_run(&self, conversation_id: &str, run_id: &str) -> Result<Run, ServiceError>;

    async fn submit_tool_outputs(
        &self,
        conversation_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ServiceError>;

    async fn cancel_run(&self, conversation_id: &str, run_id: &str) -> Result<(), ServiceError>;

    /// One page of the conversation's messages, most recent first. `after`
    /// continues past the message with that id.
    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Vec<Message>, ServiceError>;
}

/// Generated files and images referenced by a finished run.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch_artifact(&self, artifact_id: &str) -> anyhow::Result<Vec<u8>>;
}
