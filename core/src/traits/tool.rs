use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    /// Strings are forwarded as-is, any other value is sent as JSON.
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// Checks arguments before the handler runs. Returning `Err` skips the handler.
pub trait ArgumentValidator: Send + Sync {
    fn validate(&self, args: &Value) -> Result<(), String>;
}

impl<F> ArgumentValidator for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, args: &Value) -> Result<(), String> {
        self(args)
    }
}
