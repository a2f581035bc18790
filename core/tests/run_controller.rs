use async_trait::async_trait;
use relay_core::agent::{RunController, ToolRegistry, TurnError, TurnStatus};
use relay_core::error::OrchestratorError;
use relay_core::tools::{DirMailbox, SendEmailTool};
use relay_core::traits::{
    ContentPart, Message, Role, Run, RunError, RunService, RunStatus, ServiceError, ToolCall,
    ToolOutput,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(60);

/// Replays a fixed sequence of run states. Once the script runs out every
/// call repeats the last state it returned.
#[derive(Default)]
struct ScriptedService {
    script: Mutex<VecDeque<Result<Run, ServiceError>>>,
    last: Mutex<Option<Run>>,
    log: Mutex<Vec<String>>,
    submissions: Mutex<Vec<Vec<ToolOutput>>>,
    messages: Vec<Message>,
    list_delay: Duration,
    fail_cancel: bool,
}

impl ScriptedService {
    fn new(script: Vec<Result<Run, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    fn with_reply(mut self, text: &str) -> Self {
        self.messages = vec![
            Message {
                id: "msg_2".into(),
                role: Role::Assistant,
                run_id: Some("run_1".into()),
                content: vec![ContentPart::text(text)],
            },
            Message {
                id: "msg_1".into(),
                role: Role::User,
                run_id: None,
                content: vec![ContentPart::text("user input")],
            },
        ];
        self
    }

    fn next(&self, op: &str) -> Result<Run, ServiceError> {
        self.log.lock().unwrap().push(op.to_string());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Ok(run)) => {
                *self.last.lock().unwrap() = Some(run.clone());
                Ok(run)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self
                .last
                .lock()
                .unwrap()
                .clone()
                .expect("script must start with a run")),
        }
    }

    fn ops(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| *o == op).count()
    }

    fn submissions(&self) -> Vec<Vec<ToolOutput>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunService for ScriptedService {
    async fn start_run(&self, _conversation_id: &str, _input: &str) -> Result<Run, ServiceError> {
        self.next("start_run")
    }

    async fn get_run(&self, _conversation_id: &str, _run_id: &str) -> Result<Run, ServiceError> {
        self.next("get_run")
    }

    async fn submit_tool_outputs(
        &self,
        _conversation_id: &str,
        _run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ServiceError> {
        self.submissions.lock().unwrap().push(outputs.to_vec());
        self.next("submit_tool_outputs")
    }

    async fn cancel_run(&self, _conversation_id: &str, _run_id: &str) -> Result<(), ServiceError> {
        self.log.lock().unwrap().push("cancel_run".into());
        if self.fail_cancel {
            Err(ServiceError::Fatal("cannot cancel".into()))
        } else {
            Ok(())
        }
    }

    async fn list_messages(
        &self,
        _conversation_id: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Vec<Message>, ServiceError> {
        self.log.lock().unwrap().push("list_messages".into());
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        let start = match after {
            Some(id) => self
                .messages
                .iter()
                .position(|m| m.id == id)
                .map_or(self.messages.len(), |i| i + 1),
            None => 0,
        };
        Ok(self.messages.iter().skip(start).take(limit).cloned().collect())
    }
}

fn message(id: &str, role: Role, text: &str) -> Message {
    Message {
        id: id.into(),
        role,
        run_id: None,
        content: vec![ContentPart::text(text)],
    }
}

/// `count` assistant messages, newest first, optionally closed by the user
/// message that opened the turn.
fn long_turn(count: usize, with_user: bool) -> Vec<Message> {
    let mut messages: Vec<Message> = (0..count)
        .rev()
        .map(|i| message(&format!("msg_a{i}"), Role::Assistant, &format!("part {i}")))
        .collect();
    if with_user {
        messages.push(message("msg_user", Role::User, "user input"));
        messages.push(message("msg_old", Role::Assistant, "previous turn"));
    }
    messages
}

fn run(status: RunStatus) -> Result<Run, ServiceError> {
    Ok(Run {
        id: "run_1".into(),
        conversation_id: "thread_1".into(),
        status,
        pending_calls: vec![],
        last_error: None,
        created_at: 0,
        expires_at: None,
    })
}

fn action(calls: Vec<ToolCall>) -> Result<Run, ServiceError> {
    let mut run = run(RunStatus::RequiresAction).unwrap();
    run.pending_calls = calls;
    Ok(run)
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

fn transient() -> Result<Run, ServiceError> {
    Err(ServiceError::Transient("connection reset".into()))
}

struct Tools {
    registry: ToolRegistry,
    invocations: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Value>>>,
}

fn tools(send_email_result: Result<&'static str, &'static str>) -> Tools {
    let invocations = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(Mutex::new(vec![]));
    let mut registry = ToolRegistry::new();

    {
        let invocations = invocations.clone();
        let received = received.clone();
        registry.register_fn(
            "send_email",
            "Send an email",
            json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string"},
                    "subject": {"type": "string"},
                    "body": {"type": "string"}
                },
                "required": ["to", "subject", "body"]
            }),
            move |args| {
                let invocations = invocations.clone();
                let received = received.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    received.lock().unwrap().push(args);
                    match send_email_result {
                        Ok(msg) => Ok(json!({"success": true, "message": msg})),
                        Err(e) => Err(anyhow::anyhow!(e)),
                    }
                }
            },
        );
    }

    {
        let invocations = invocations.clone();
        registry.register_fn(
            "search_tool",
            "Search the web",
            json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
            move |args| {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(json!([format!(
                        "result for {}",
                        args["query"].as_str().unwrap_or_default()
                    )]))
                }
            },
        );
    }

    Tools {
        registry,
        invocations,
        received,
    }
}

fn controller(service: &Arc<ScriptedService>, registry: ToolRegistry) -> RunController {
    RunController::new(service.clone(), Arc::new(registry)).with_max_transport_retries(3)
}

fn email_call() -> ToolCall {
    call(
        "call_1",
        "send_email",
        json!({"to": "a@example.com", "subject": "S", "body": "B"}),
    )
}

#[tokio::test(start_paused = true)]
async fn send_email_turn_completes() {
    let service = Arc::new(
        ScriptedService::new(vec![
            run(RunStatus::Queued),
            run(RunStatus::InProgress),
            action(vec![email_call()]),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ])
        .with_reply("I sent the email to a@example.com."),
    );
    let tools = tools(Ok("Email sent successfully!"));
    let received = tools.received.clone();

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "send an email to a@example.com with subject S and body B", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.text(), "I sent the email to a@example.com.");
    assert_eq!(result.batches, 1);
    assert!(result.tool_faults.is_empty());

    let args = received.lock().unwrap().clone();
    assert_eq!(args, vec![json!({"to": "a@example.com", "subject": "S", "body": "B"})]);

    let submissions = service.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].len(), 1);
    assert_eq!(submissions[0][0].call_id, "call_1");
    assert!(!submissions[0][0].is_error);
    assert_eq!(
        submissions[0][0].output,
        r#"{"message":"Email sent successfully!","success":true}"#
    );
    assert_eq!(service.ops().last().map(String::as_str), Some("list_messages"));
}

#[tokio::test(start_paused = true)]
async fn handler_fault_is_submitted_once() {
    let service = Arc::new(
        ScriptedService::new(vec![
            run(RunStatus::InProgress),
            action(vec![email_call()]),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ])
        .with_reply("Sorry, the email quota is exhausted."),
    );
    let tools = tools(Err("quota exceeded"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "send it", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    let submissions = service.submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0][0].is_error);
    assert!(submissions[0][0].output.contains("quota exceeded"));
    assert_eq!(result.tool_faults.len(), 1);
    assert_eq!(result.tool_faults[0].tool, "send_email");
}

#[tokio::test(start_paused = true)]
async fn unknown_tool_is_reported_to_remote() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![call("call_1", "delete_universe", json!({}))]),
            run(RunStatus::Completed),
        ])
        .with_reply("I can't do that."),
    );
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "delete the universe", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    let submissions = service.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0][0],
        ToolOutput::error("call_1", "unknown tool delete_universe")
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_run_times_out_locally() {
    let service = Arc::new(ScriptedService::new(vec![run(RunStatus::InProgress)]));
    let tools = tools(Ok("sent"));
    let invocations = tools.invocations.clone();

    let started = Instant::now();
    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::ExpiredLocally);
    assert!(matches!(result.error, Some(TurnError::LocalTimeout { .. })));
    assert!(started.elapsed() <= Duration::from_secs(5) + Duration::from_millis(10));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert!(service.submissions().is_empty());
    assert_eq!(service.count("cancel_run"), 0);
    assert!(service.count("get_run") > 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_honoured_with_long_poll_interval() {
    let service = Arc::new(ScriptedService::new(vec![run(RunStatus::Queued)]));
    let tools = tools(Ok("sent"));

    let started = Instant::now();
    let result = controller(&service, tools.registry)
        .with_poll_policy(relay_core::agent::PollPolicy {
            initial_ms: 60_000,
            max_ms: 60_000,
            multiplier: 1.0,
        })
        .execute_turn("thread_1", "anything", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::ExpiredLocally);
    assert!(started.elapsed() <= Duration::from_secs(5) + Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn parallel_calls_are_submitted_in_order() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![
                call("call_a", "search_tool", json!({"query": "rust async"})),
                call("call_b", "search_tool", json!({"query": "tokio select"})),
            ]),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ])
        .with_reply("Here is what I found."),
    );
    let tools = tools(Ok("sent"));
    let invocations = tools.invocations.clone();

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "search both", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let submissions = service.submissions();
    assert_eq!(submissions.len(), 1);
    let ids: Vec<&str> = submissions[0].iter().map(|o| o.call_id.as_str()).collect();
    assert_eq!(ids, vec!["call_a", "call_b"]);
    assert_eq!(submissions[0][0].output, r#"["result for rust async"]"#);
    assert_eq!(submissions[0][1].output, r#"["result for tokio select"]"#);
}

#[tokio::test(start_paused = true)]
async fn multiple_action_episodes() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![call("call_1", "search_tool", json!({"query": "a"}))]),
            run(RunStatus::InProgress),
            action(vec![email_call()]),
            run(RunStatus::Completed),
        ])
        .with_reply("Done."),
    );
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "search then email", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.batches, 2);
    assert_eq!(service.submissions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn remote_failure_is_not_retried() {
    let mut failed = run(RunStatus::Failed).unwrap();
    failed.last_error = Some(RunError {
        code: "server_error".into(),
        message: "Sorry, something went wrong.".into(),
    });
    let service = Arc::new(ScriptedService::new(vec![
        run(RunStatus::InProgress),
        Ok(failed),
    ]));
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Failed);
    assert_eq!(
        result.error,
        Some(TurnError::Remote {
            code: "server_error".into(),
            message: "Sorry, something went wrong.".into()
        })
    );
    assert_eq!(service.ops(), vec!["start_run", "get_run"]);
}

#[tokio::test(start_paused = true)]
async fn remote_expiry_is_distinct_from_local_timeout() {
    let service = Arc::new(ScriptedService::new(vec![run(RunStatus::Expired)]));
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Expired);
    assert!(matches!(result.error, Some(TurnError::Remote { .. })));
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_are_retried() {
    let service = Arc::new(
        ScriptedService::new(vec![
            run(RunStatus::InProgress),
            transient(),
            transient(),
            run(RunStatus::Completed),
        ])
        .with_reply("ok"),
    );
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(service.count("get_run"), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transport_retries_are_fatal() {
    let service = Arc::new(ScriptedService::new(vec![
        run(RunStatus::InProgress),
        transient(),
        transient(),
        transient(),
        transient(),
        run(RunStatus::Completed),
    ]));
    let tools = tools(Ok("sent"));

    let err = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::TransportExhausted {
            operation: "get_run",
            attempts: 4,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn submit_retries_same_batch_without_reinvoking() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![email_call()]),
            transient(),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ])
        .with_reply("sent"),
    );
    let tools = tools(Ok("sent"));
    let invocations = tools.invocations.clone();

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "send it", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let submissions = service.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0], submissions[1]);
    assert_eq!(result.batches, 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_is_fatal() {
    let service = Arc::new(ScriptedService::new(vec![
        action(vec![email_call()]),
        Err(ServiceError::Rejected("tool_call_id not found".into())),
    ]));
    let tools = tools(Ok("sent"));

    let err = controller(&service, tools.registry)
        .execute_turn("thread_1", "send it", TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::SubmissionRejected { .. }));
    assert_eq!(service.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_action_state_is_not_resubmitted() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![email_call()]),
            action(vec![email_call()]),
            action(vec![email_call()]),
            run(RunStatus::Completed),
        ])
        .with_reply("sent"),
    );
    let tools = tools(Ok("sent"));
    let invocations = tools.invocations.clone();

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "send it", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(service.submissions().len(), 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn requires_action_without_calls_is_a_protocol_error() {
    let service = Arc::new(ScriptedService::new(vec![action(vec![])]));
    let tools = tools(Ok("sent"));

    let err = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Protocol(_)));
    assert!(service.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_input_never_reaches_remote() {
    let service = Arc::new(ScriptedService::new(vec![run(RunStatus::Queued)]));
    let tools = tools(Ok("sent"));

    let err = controller(&service, tools.registry)
        .execute_turn("thread_1", "   ", TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::EmptyInput));
    assert!(service.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_cancels_remote_best_effort() {
    let service = Arc::new(ScriptedService {
        fail_cancel: true,
        ..ScriptedService::new(vec![run(RunStatus::InProgress)])
    });
    let tools = tools(Ok("sent"));
    let cancel = CancellationToken::new();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        })
    };

    let result = controller(&service, tools.registry)
        .execute_turn_with_cancel("thread_1", "anything", TIMEOUT, cancel)
        .await
        .unwrap();
    trigger.await.unwrap();

    assert_eq!(result.status, TurnStatus::CancelledLocally);
    assert_eq!(result.error, Some(TurnError::Cancelled));
    assert_eq!(service.count("cancel_run"), 1);
    assert!(service.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_batch_is_discarded_on_timeout() {
    let service = Arc::new(ScriptedService::new(vec![action(vec![call(
        "call_1",
        "slow",
        json!({}),
    )])]));
    let finished = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    {
        let finished = finished.clone();
        registry.register_fn("slow", "Slow tool", json!({"type": "object"}), move |_| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(Value::Null)
            }
        });
    }

    let result = controller(&service, registry)
        .execute_turn("thread_1", "do the slow thing", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::ExpiredLocally);
    assert!(service.submissions().is_empty());
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    // The handler was not interrupted and still finishes on its own.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn new_episode_reusing_call_ids_is_executed() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![call("call_1", "search_tool", json!({"query": "first"}))]),
            run(RunStatus::InProgress),
            action(vec![call("call_1", "search_tool", json!({"query": "second"}))]),
            run(RunStatus::Completed),
        ])
        .with_reply("Both searches done."),
    );
    let tools = tools(Ok("sent"));
    let invocations = tools.invocations.clone();

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "search twice", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.batches, 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let submissions = service.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[1][0].call_id, "call_1");
    assert_eq!(submissions[1][0].output, r#"["result for second"]"#);
}

#[tokio::test(start_paused = true)]
async fn new_batch_returned_by_submit_is_executed() {
    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![call("call_1", "search_tool", json!({"query": "first"}))]),
            action(vec![call("call_2", "search_tool", json!({"query": "second"}))]),
            run(RunStatus::Completed),
        ])
        .with_reply("done"),
    );
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "search twice", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.batches, 2);
    assert_eq!(service.submissions()[1][0].call_id, "call_2");
}

#[tokio::test(start_paused = true)]
async fn long_turn_is_paged_back_to_its_start() {
    let mut service = ScriptedService::new(vec![run(RunStatus::Completed)]);
    service.messages = long_turn(25, true);
    let service = Arc::new(service);
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "write a lot", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert!(!result.truncated);
    assert_eq!(service.count("list_messages"), 2);
    let text = result.text();
    assert!(text.starts_with("part 0\npart 1\n"));
    assert!(text.ends_with("part 24"));
    assert!(!text.contains("previous turn"));
}

#[tokio::test(start_paused = true)]
async fn endless_turn_is_flagged_truncated() {
    let mut service = ScriptedService::new(vec![run(RunStatus::Completed)]);
    service.messages = long_turn(150, false);
    let service = Arc::new(service);
    let tools = tools(Ok("sent"));

    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "write forever", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert!(result.truncated);
    assert_eq!(service.count("list_messages"), 5);
    assert!(result.text().ends_with("part 149"));
}

#[tokio::test(start_paused = true)]
async fn deadline_during_message_fetch_keeps_completed_status() {
    let service = Arc::new(ScriptedService {
        list_delay: Duration::from_secs(30),
        ..ScriptedService::new(vec![run(RunStatus::InProgress), run(RunStatus::Completed)])
            .with_reply("finished answer")
    });
    let tools = tools(Ok("sent"));

    let started = Instant::now();
    let result = controller(&service, tools.registry)
        .execute_turn("thread_1", "anything", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    assert!(result.truncated);
    assert!(result.error.is_none());
    assert!(result.segments.is_empty());
    assert!(started.elapsed() <= Duration::from_secs(5) + Duration::from_millis(10));
    assert_eq!(service.count("cancel_run"), 0);
}

#[tokio::test(start_paused = true)]
async fn send_email_turn_with_directory_mailbox() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SendEmailTool::new(Arc::new(DirMailbox::new(dir.path())))));

    let service = Arc::new(
        ScriptedService::new(vec![
            action(vec![email_call()]),
            run(RunStatus::InProgress),
            run(RunStatus::Completed),
        ])
        .with_reply("Sent."),
    );

    let result = controller(&service, registry)
        .execute_turn("thread_1", "send an email to a@example.com with subject S and body B", TIMEOUT)
        .await
        .unwrap();

    assert_eq!(result.status, TurnStatus::Completed);
    let submitted: Value = serde_json::from_str(&service.submissions()[0][0].output).unwrap();
    assert_eq!(submitted["success"], true);

    let outbox: Vec<_> = std::fs::read_dir(dir.path().join("outbox"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(outbox.len(), 1);
    let sent: Value = serde_json::from_str(&std::fs::read_to_string(&outbox[0]).unwrap()).unwrap();
    assert_eq!(sent["to"], "a@example.com");
    assert_eq!(sent["subject"], "S");
    assert_eq!(sent["body"], "B");
}
