use crate::traits::{
    Annotation, AnnotationKind, ArtifactStore, ContentPart, Message, Role, Run, RunError,
    RunService, RunStatus, ServiceError, ToolCall, ToolOutput,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Serialize)]
struct SubmitToolOutputsRequest<'a> {
    tool_outputs: Vec<ApiToolOutput<'a>>,
}

#[derive(Debug, Serialize)]
struct ApiToolOutput<'a> {
    tool_call_id: &'a str,
    output: String,
}

#[derive(Debug, Deserialize)]
struct ApiThread {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiRun {
    id: String,
    thread_id: String,
    status: RunStatus,
    required_action: Option<ApiRequiredAction>,
    last_error: Option<ApiRunError>,
    #[serde(default)]
    created_at: i64,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiRequiredAction {
    submit_tool_outputs: Option<ApiSubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct ApiSubmitToolOutputs {
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiRunError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessageList {
    data: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    role: Role,
    run_id: Option<String>,
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text { text: ApiText },
    ImageFile { image_file: ApiFileRef },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct ApiText {
    value: String,
    #[serde(default)]
    annotations: Vec<ApiAnnotation>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiAnnotation {
    FileCitation {
        text: String,
        file_citation: ApiCitation,
    },
    FilePath {
        text: String,
        file_path: ApiFileRef,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct ApiCitation {
    file_id: String,
    quote: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiFileRef {
    file_id: String,
}

/// Assistants-style run service over HTTP. Conversations are threads.
pub struct AssistantsClient {
    client: reqwest::Client,
    api_key: String,
    assistant_id: String,
    base_url: String,
}

impl AssistantsClient {
    pub fn new(api_key: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let client = Self::new(config.api_key.clone(), config.assistant_id.clone());
        match &config.base_url {
            Some(base_url) => client.with_base_url(base_url.clone()),
            None => client,
        }
    }

    pub async fn create_conversation(&self) -> Result<String, ServiceError> {
        let thread: ApiThread = self
            .send(self.post("/threads").json(&serde_json::json!({})), false)
            .await?;
        Ok(thread.id)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        rejectable: bool,
    ) -> Result<T, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, error_text, rejectable));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Fatal(format!("Failed to decode response: {}", e)))
    }
}

#[async_trait]
impl RunService for AssistantsClient {
    async fn start_run(&self, conversation_id: &str, input: &str) -> Result<Run, ServiceError> {
        let _: serde_json::Value = self
            .send(
                self.post(&format!("/threads/{conversation_id}/messages"))
                    .json(&CreateMessageRequest {
                        role: "user",
                        content: input,
                    }),
                false,
            )
            .await?;

        let run: ApiRun = self
            .send(
                self.post(&format!("/threads/{conversation_id}/runs"))
                    .json(&CreateRunRequest {
                        assistant_id: &self.assistant_id,
                    }),
                false,
            )
            .await?;
        Ok(run.into())
    }

    async fn get_run(&self, conversation_id: &str, run_id: &str) -> Result<Run, ServiceError> {
        let run: ApiRun = self
            .send(
                self.get(&format!("/threads/{conversation_id}/runs/{run_id}")),
                false,
            )
            .await?;
        Ok(run.into())
    }

    async fn submit_tool_outputs(
        &self,
        conversation_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ServiceError> {
        let request = SubmitToolOutputsRequest {
            tool_outputs: outputs.iter().map(api_tool_output).collect(),
        };
        let run: ApiRun = self
            .send(
                self.post(&format!(
                    "/threads/{conversation_id}/runs/{run_id}/submit_tool_outputs"
                ))
                .json(&request),
                true,
            )
            .await?;
        Ok(run.into())
    }

    async fn cancel_run(&self, conversation_id: &str, run_id: &str) -> Result<(), ServiceError> {
        let _: serde_json::Value = self
            .send(
                self.post(&format!("/threads/{conversation_id}/runs/{run_id}/cancel")),
                true,
            )
            .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Vec<Message>, ServiceError> {
        let mut query = vec![("order", "desc".to_string()), ("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let list: ApiMessageList = self
            .send(
                self.get(&format!("/threads/{conversation_id}/messages"))
                    .query(&query),
                false,
            )
            .await?;
        Ok(list.data.into_iter().map(Message::from).collect())
    }
}

#[async_trait]
impl ArtifactStore for AssistantsClient {
    async fn fetch_artifact(&self, artifact_id: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .get(&format!("/files/{artifact_id}/content"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Failed to fetch artifact {} ({}): {}",
                artifact_id,
                status,
                error_text
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

fn api_tool_output(output: &ToolOutput) -> ApiToolOutput<'_> {
    // The protocol has no error flag, so failures are spelled out for the model.
    let text = if output.is_error {
        serde_json::json!({ "error": output.output }).to_string()
    } else {
        output.output.clone()
    };
    ApiToolOutput {
        tool_call_id: &output.call_id,
        output: text,
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ServiceError::Transient(e.to_string())
    } else {
        ServiceError::Fatal(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: String, rejectable: bool) -> ServiceError {
    let message = format!("API error {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ServiceError::Transient(message)
    } else if rejectable && status.is_client_error() && status != StatusCode::UNAUTHORIZED {
        ServiceError::Rejected(message)
    } else {
        ServiceError::Fatal(message)
    }
}

impl From<ApiRun> for Run {
    fn from(run: ApiRun) -> Self {
        let pending_calls = match (run.status, run.required_action) {
            (RunStatus::RequiresAction, Some(action)) => action
                .submit_tool_outputs
                .map(|s| {
                    s.tool_calls
                        .into_iter()
                        .map(|c| ToolCall {
                            id: c.id,
                            name: c.function.name,
                            arguments: c.function.arguments,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            _ => vec![],
        };

        Run {
            id: run.id,
            conversation_id: run.thread_id,
            status: run.status,
            pending_calls,
            last_error: run.last_error.map(|e| RunError {
                code: e.code,
                message: e.message,
            }),
            created_at: run.created_at,
            expires_at: run.expires_at,
        }
    }
}

impl From<ApiMessage> for Message {
    fn from(message: ApiMessage) -> Self {
        let content = message
            .content
            .into_iter()
            .filter_map(|part| match part {
                ApiContent::Text { text } => Some(ContentPart::Text {
                    value: text.value,
                    annotations: text
                        .annotations
                        .into_iter()
                        .filter_map(|a| match a {
                            ApiAnnotation::FileCitation {
                                text,
                                file_citation,
                            } => Some(Annotation {
                                marker: text,
                                kind: AnnotationKind::Citation {
                                    file_id: file_citation.file_id,
                                    quote: file_citation.quote,
                                },
                            }),
                            ApiAnnotation::FilePath { text, file_path } => Some(Annotation {
                                marker: text,
                                kind: AnnotationKind::FilePath {
                                    file_id: file_path.file_id,
                                },
                            }),
                            ApiAnnotation::Unsupported => None,
                        })
                        .collect(),
                }),
                ApiContent::ImageFile { image_file } => Some(ContentPart::Image {
                    file_id: image_file.file_id,
                }),
                ApiContent::Unsupported => None,
            })
            .collect();

        Message {
            id: message.id,
            role: message.role,
            run_id: message.run_id,
            content,
        }
    }
}
