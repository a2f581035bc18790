use crate::tools::{extract_string_arg, resolve_in_workspace};
use crate::traits::Tool;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct FileWriteTool {
    workspace: std::path::PathBuf,
}

impl FileWriteTool {
    pub fn new(workspace: impl AsRef<std::path::Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, creating parent folders"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let path = extract_string_arg(&args, "path")?;
        let content = extract_string_arg(&args, "content")?;
        let full_path = resolve_in_workspace(&self.workspace, &path)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, content.as_bytes())
            .await
            .with_context(|| format!("Failed to write file {}", path))?;

        Ok(Value::String(format!("File created at {}", path)))
    }
}
