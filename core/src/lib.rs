pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod tools;
pub mod traits;

pub use agent::{ResponseExtractor, RunController, RunResult, ToolRegistry, TurnStatus};
pub use config::*;
pub use error::OrchestratorError;
pub use providers::*;
pub use tools::*;
pub use traits::*;
