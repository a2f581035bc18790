use crate::tools::{extract_string_arg, resolve_in_workspace};
use crate::traits::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct CreateFolderTool {
    workspace: std::path::PathBuf,
}

impl CreateFolderTool {
    pub fn new(workspace: impl AsRef<std::path::Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for CreateFolderTool {
    fn name(&self) -> &str {
        "create_folder"
    }

    fn description(&self) -> &str {
        "Create a folder (and any missing parents) in the workspace"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Folder path relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let path = extract_string_arg(&args, "path")?;
        let full_path = resolve_in_workspace(&self.workspace, &path)?;
        tokio::fs::create_dir_all(&full_path).await?;
        Ok(Value::String(format!("Folder created at {}", path)))
    }
}
