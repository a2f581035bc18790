use anyhow::Result;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod calendar;
pub mod create_folder;
pub mod current_time;
pub mod email;
pub mod file_read;
pub mod file_write;
pub mod validation;

pub use calendar::{
    Calendar, CalendarEvent, CreateEventTool, DeleteEventTool, EventPatch, FileCalendar,
    ListEventsTool, NewEvent, UpdateEventTool,
};
pub use create_folder::CreateFolderTool;
pub use current_time::CurrentTimeTool;
pub use email::{
    Attachment, DirMailbox, Email, Mailbox, OutgoingEmail, ReadEmailsTool, SendEmailTool,
};
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use validation::validate_arguments;

pub fn extract_string_arg(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
        .map(|s| s.to_string())
}

pub fn extract_string_arg_opt(args: &Value, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// A missing or `null` key yields an empty list. Anything that is not an
/// array of strings is an error.
pub fn extract_string_list_arg_opt(args: &Value, key: &str) -> Result<Vec<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("'{}[{}]' must be a string, got {}", key, i, item))
            })
            .collect(),
        Some(other) => anyhow::bail!("'{}' must be a list of strings, got {}", key, other),
    }
}

/// Backend-local identifier, unique within the process.
pub(crate) fn local_id(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, chrono::Utc::now().format("%Y%m%d%H%M%S"), n)
}

pub fn extract_usize_arg_opt(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// Joins a model-supplied relative path onto the workspace, refusing anything
/// that would land outside it.
pub fn resolve_in_workspace(workspace: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if path.trim().is_empty() || escapes {
        anyhow::bail!("Path '{}' must stay inside the workspace", path);
    }
    Ok(workspace.join(relative))
}
