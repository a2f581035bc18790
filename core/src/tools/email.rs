use crate::tools::{
    extract_string_arg, extract_string_arg_opt, extract_string_list_arg_opt,
    extract_usize_arg_opt, local_id, resolve_in_workspace,
};
use crate::traits::Tool;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_READ_RESULTS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
}

/// Mail backend handed to the e-mail tools when they are registered.
/// Credentials and transport live entirely behind this trait.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Returns the backend's id for the sent message.
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String>;

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<Email>>;
}

pub struct SendEmailTool {
    mailbox: Arc<dyn Mailbox>,
    workspace: Option<PathBuf>,
}

impl SendEmailTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            mailbox,
            workspace: None,
        }
    }

    /// Allows attachments, read from files inside `workspace`.
    pub fn with_workspace(mut self, workspace: impl AsRef<Path>) -> Self {
        self.workspace = Some(workspace.as_ref().to_path_buf());
        self
    }

    async fn load_attachments(&self, paths: &[String]) -> anyhow::Result<Vec<Attachment>> {
        if paths.is_empty() {
            return Ok(vec![]);
        }
        let Some(workspace) = &self.workspace else {
            anyhow::bail!("attachments are not enabled for this mailbox");
        };

        let mut attachments = Vec::with_capacity(paths.len());
        for path in paths {
            let full_path = resolve_in_workspace(workspace, path)?;
            let content = tokio::fs::read(&full_path)
                .await
                .with_context(|| format!("Failed to read attachment {}", path))?;
            let filename = full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            attachments.push(Attachment { filename, content });
        }
        Ok(attachments)
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email to a recipient"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient email address" },
                "subject": { "type": "string", "description": "Subject line" },
                "body": { "type": "string", "description": "Plain text body" },
                "cc": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Additional recipients"
                },
                "attachments": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace files to attach"
                }
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let to = extract_string_arg(&args, "to")?;
        if !is_address(&to) {
            anyhow::bail!("'{}' is not a valid email address", to);
        }

        let cc = extract_string_list_arg_opt(&args, "cc")?;
        if let Some(bad) = cc.iter().find(|a| !is_address(a)) {
            anyhow::bail!("'{}' is not a valid email address", bad);
        }

        let attachments = self
            .load_attachments(&extract_string_list_arg_opt(&args, "attachments")?)
            .await?;

        let email = OutgoingEmail {
            to,
            subject: extract_string_arg(&args, "subject")?,
            body: extract_string_arg(&args, "body")?,
            cc,
            attachments,
        };

        let message_id = self.mailbox.send(&email).await?;
        tracing::info!(
            to = %email.to,
            %message_id,
            attachments = email.attachments.len(),
            "Email sent"
        );

        Ok(json!({
            "success": true,
            "message_id": message_id,
            "message": "Email sent successfully!"
        }))
    }
}

pub struct ReadEmailsTool {
    mailbox: Arc<dyn Mailbox>,
}

impl ReadEmailsTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for ReadEmailsTool {
    fn name(&self) -> &str {
        "read_emails"
    }

    fn description(&self) -> &str {
        "Search the mailbox and return matching emails"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Mailbox search query, defaults to in:inbox"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of emails to return, defaults to 10"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = extract_string_arg_opt(&args, "query", "in:inbox");
        let max_results = extract_usize_arg_opt(&args, "max_results", 10).clamp(1, MAX_READ_RESULTS);

        let emails = self.mailbox.search(&query, max_results).await?;
        Ok(serde_json::to_value(emails)?)
    }
}

/// Mailbox kept in a local directory. Incoming mail is read from
/// `inbox/*.json` (one [`Email`] per file). Sent mail is written to
/// `outbox/<id>.json`, with attachments under `outbox/<id>/`.
pub struct DirMailbox {
    root: PathBuf,
}

impl DirMailbox {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Mailbox for DirMailbox {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String> {
        let outbox = self.root.join("outbox");
        tokio::fs::create_dir_all(&outbox)
            .await
            .with_context(|| format!("Failed to create outbox at {}", outbox.display()))?;

        let id = local_id("msg");
        if !email.attachments.is_empty() {
            let files = outbox.join(&id);
            tokio::fs::create_dir_all(&files).await?;
            for attachment in &email.attachments {
                tokio::fs::write(files.join(&attachment.filename), &attachment.content).await?;
            }
        }

        let content = serde_json::to_string_pretty(email)?;
        tokio::fs::write(outbox.join(format!("{id}.json")), content).await?;
        Ok(id)
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<Email>> {
        let inbox = self.root.join("inbox");
        if !inbox.exists() {
            return Ok(vec![]);
        }

        let mut paths = vec![];
        let mut entries = tokio::fs::read_dir(&inbox).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let needle = query.trim().to_lowercase();
        let match_all = needle.is_empty() || needle == "in:inbox";
        let mut emails = vec![];
        for path in paths.into_iter().rev() {
            let content = tokio::fs::read_to_string(&path).await?;
            let email: Email = serde_json::from_str(&content)
                .with_context(|| format!("Malformed email at {}", path.display()))?;
            let matches = match_all
                || [&email.subject, &email.sender, &email.body]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle));
            if matches {
                emails.push(email);
                if emails.len() >= max_results {
                    break;
                }
            }
        }
        Ok(emails)
    }
}

fn is_address(address: &str) -> bool {
    match address.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}
