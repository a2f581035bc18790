pub mod aggregate;
pub mod backoff;
pub mod extract;
pub mod loop_;
pub mod registry;
pub mod result;

pub use aggregate::{OutputBatch, aggregate};
pub use backoff::{PollBackoff, PollPolicy};
pub use extract::ResponseExtractor;
pub use loop_::{RunController, execute_turn};
pub use registry::{FaultKind, Invocation, ToolRegistry};
pub use result::{ArtifactRef, Reference, RunResult, Segment, ToolFault, TurnError, TurnStatus};
