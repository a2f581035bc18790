use crate::tools::{extract_string_arg, extract_usize_arg_opt, resolve_in_workspace};
use crate::traits::Tool;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_LINES: usize = 2_000;

pub struct FileReadTool {
    workspace: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace, optionally a window of lines"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to return, starting at 0"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let path = extract_string_arg(&args, "path")?;
        let full_path = resolve_in_workspace(&self.workspace, &path)?;
        let offset = extract_usize_arg_opt(&args, "offset", 0);
        let limit = extract_usize_arg_opt(&args, "limit", DEFAULT_MAX_LINES).max(1);

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .with_context(|| format!("Failed to read file {}", path))?;

        let total = content.lines().count();
        if offset == 0 && total <= limit {
            return Ok(Value::String(content));
        }

        let window: Vec<&str> = content.lines().skip(offset).take(limit).collect();
        let shown = window.len();
        let mut text = window.join("\n");
        if offset + shown < total {
            text.push_str(&format!(
                "\n[lines {}-{} of {}]",
                offset + 1,
                offset + shown,
                total
            ));
        }
        Ok(Value::String(text))
    }
}
