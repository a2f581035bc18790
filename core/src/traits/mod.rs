pub mod run_service;
pub mod tool;

pub use run_service::{
    Annotation, AnnotationKind, ArtifactStore, ContentPart, Message, Role, Run, RunError,
    RunService, RunStatus, ServiceError, ToolCall, ToolOutput,
};
pub use tool::{ArgumentValidator, Tool, ToolSpec};
