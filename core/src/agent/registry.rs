use crate::tools::validation::validate_arguments;
use crate::traits::{ArgumentValidator, Tool, ToolCall, ToolOutput, ToolSpec};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    UnknownTool,
    InvalidArguments,
    Handler,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: ToolOutput,
    pub fault: Option<FaultKind>,
}

impl Invocation {
    fn ok(call_id: &str, output: String) -> Self {
        Self {
            output: ToolOutput::success(call_id, output),
            fault: None,
        }
    }

    fn fault(call_id: &str, kind: FaultKind, message: String) -> Self {
        Self {
            output: ToolOutput::error(call_id, message),
            fault: Some(kind),
        }
    }
}

struct Registration {
    tool: Arc<dyn Tool>,
    validator: Option<Arc<dyn ArgumentValidator>>,
}

/// Name to tool table. Populated before any run starts and shared read-only
/// behind an `Arc` afterwards. Registering a name twice keeps the last tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Registration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.insert(tool, None);
    }

    pub fn register_with_validator(
        &mut self,
        tool: Arc<dyn Tool>,
        validator: Arc<dyn ArgumentValidator>,
    ) {
        self.insert(tool, Some(validator));
    }

    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
        handler: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let tool = FnTool {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            handler: Box::new(move |args| Box::pin(handler(args)) as BoxFuture<'static, _>),
        };
        self.insert(Arc::new(tool), None);
    }

    fn insert(&mut self, tool: Arc<dyn Tool>, validator: Option<Arc<dyn ArgumentValidator>>) {
        let name = tool.name().to_string();
        if self
            .tools
            .insert(name.clone(), Registration { tool, validator })
            .is_some()
        {
            debug!(tool = %name, "Replaced previously registered tool");
        }
    }

    pub fn get_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|r| r.tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        self.invoke_detailed(call).await.output
    }

    /// Always yields exactly one output for the call, whatever goes wrong.
    pub async fn invoke_detailed(&self, call: &ToolCall) -> Invocation {
        let Some(registration) = self.tools.get(&call.name) else {
            return Invocation::fault(
                &call.id,
                FaultKind::UnknownTool,
                format!("unknown tool {}", call.name),
            );
        };

        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                return Invocation::fault(
                    &call.id,
                    FaultKind::InvalidArguments,
                    format!("invalid arguments for {}: {}", call.name, e),
                );
            }
        };

        let validation = match &registration.validator {
            Some(validator) => validator.validate(&args),
            None => validate_arguments(&args, &registration.tool.parameters_schema()),
        };
        if let Err(e) = validation {
            return Invocation::fault(
                &call.id,
                FaultKind::InvalidArguments,
                format!("invalid arguments for {}: {}", call.name, e),
            );
        }

        // Spawned so that a panicking handler surfaces as a JoinError.
        let tool = registration.tool.clone();
        let handle = tokio::spawn(async move { tool.execute(args).await });

        match handle.await {
            Ok(Ok(value)) => Invocation::ok(&call.id, encode_output(value)),
            Ok(Err(e)) => Invocation::fault(
                &call.id,
                FaultKind::Handler,
                format!("{} failed: {:#}", call.name, e),
            ),
            Err(join_error) => Invocation::fault(
                &call.id,
                FaultKind::Handler,
                format!("{} failed: {}", call.name, panic_message(join_error)),
            ),
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| e.to_string())
}

fn encode_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    if !error.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

struct FnTool {
    name: String,
    description: String,
    parameters_schema: Value,
    handler: Handler,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters_schema.clone()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        (self.handler)(args).await
    }
}
