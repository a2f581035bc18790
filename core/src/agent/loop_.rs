use crate::agent::aggregate::{DEFAULT_MAX_CONCURRENT_TOOLS, OutputBatch, aggregate};
use crate::agent::backoff::{PollBackoff, PollPolicy};
use crate::agent::extract::ResponseExtractor;
use crate::agent::registry::ToolRegistry;
use crate::agent::result::{RunResult, ToolFault, TurnError, TurnStatus};
use crate::config::Config;
use crate::error::{OrchestratorError, Result};
use crate::traits::{Message, Role, Run, RunService, RunStatus, ServiceError, ToolCall};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MAX_TRANSPORT_RETRIES: u32 = 5;
const MESSAGE_PAGE_SIZE: usize = 20;
const MAX_MESSAGE_PAGES: usize = 5;
const CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

enum Step<T> {
    Done(T),
    Interrupted(Interrupt),
}

/// Bookkeeping for one `execute_turn` call.
struct Turn {
    started: Instant,
    deadline: Instant,
    cancel: CancellationToken,
    batches: usize,
    faults: Vec<ToolFault>,
    /// Ids of the batch most recently submitted, until the run is seen in
    /// any status other than `requires_action`.
    awaiting_ack: Option<Vec<String>>,
}

impl Turn {
    fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + timeout,
            cancel,
            batches: 0,
            faults: vec![],
            awaiting_ack: None,
        }
    }

    fn check(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(Interrupt::Timeout)
        } else {
            None
        }
    }

    async fn interrupted(&self) -> Interrupt {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interrupt::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => Interrupt::Timeout,
        }
    }

    async fn pause(&self, delay: Duration) -> Option<Interrupt> {
        if let Some(interrupt) = self.check() {
            return Some(interrupt);
        }
        tokio::select! {
            biased;
            interrupt = self.interrupted() => Some(interrupt),
            _ = tokio::time::sleep(delay) => self.check(),
        }
    }

    fn finish(&mut self, mut result: RunResult) -> RunResult {
        result.batches = self.batches;
        result.tool_faults = std::mem::take(&mut self.faults);
        result
    }
}

pub struct RunController {
    service: Arc<dyn RunService>,
    registry: Arc<ToolRegistry>,
    poll: PollPolicy,
    max_transport_retries: u32,
    max_concurrent_tools: usize,
}

impl RunController {
    pub fn new(service: Arc<dyn RunService>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            service,
            registry,
            poll: PollPolicy::default(),
            max_transport_retries: DEFAULT_MAX_TRANSPORT_RETRIES,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
        }
    }

    pub fn from_config(
        service: Arc<dyn RunService>,
        registry: Arc<ToolRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(service, registry)
            .with_poll_policy(config.poll)
            .with_max_transport_retries(config.max_transport_retries)
            .with_max_concurrent_tools(config.max_concurrent_tools)
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    pub fn with_max_concurrent_tools(mut self, max: usize) -> Self {
        self.max_concurrent_tools = max.max(1);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute_turn(
        &self,
        conversation_id: &str,
        user_input: &str,
        timeout: Duration,
    ) -> Result<RunResult> {
        self.execute_turn_with_cancel(conversation_id, user_input, timeout, CancellationToken::new())
            .await
    }

    /// Drives one run to a terminal state. Remote failures, local timeout and
    /// cancellation come back as tagged `RunResult`s; only broken invariants
    /// and exhausted transport retries are `Err`.
    pub async fn execute_turn_with_cancel(
        &self,
        conversation_id: &str,
        user_input: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        if user_input.trim().is_empty() {
            return Err(OrchestratorError::EmptyInput);
        }

        let mut turn = Turn::new(timeout, cancel);
        if let Some(interrupt) = turn.check() {
            return Ok(self.interrupted(&mut turn, conversation_id, None, interrupt).await);
        }

        let mut run = match self
            .retrying(&turn, "start_run", || {
                self.service.start_run(conversation_id, user_input)
            })
            .await?
        {
            Step::Done(run) => run,
            Step::Interrupted(interrupt) => {
                return Ok(self.interrupted(&mut turn, conversation_id, None, interrupt).await);
            }
        };
        info!(run_id = %run.id, conversation_id, "Run started");

        let mut backoff = PollBackoff::new(self.poll);

        loop {
            run.check_invariants().map_err(OrchestratorError::Protocol)?;
            debug!(run_id = %run.id, status = %run.status, "Observed run status");

            if let Some(interrupt) = turn.check() {
                return Ok(self
                    .interrupted(&mut turn, conversation_id, Some(&run.id), interrupt)
                    .await);
            }

            if run.status != RunStatus::RequiresAction {
                turn.awaiting_ack = None;
            }

            let next = match run.status {
                RunStatus::RequiresAction if !is_stale(&turn, &run) => {
                    let batch = match self.run_batch(&turn, &run.pending_calls).await? {
                        Step::Done(batch) => batch,
                        Step::Interrupted(interrupt) => {
                            return Ok(self
                                .interrupted(&mut turn, conversation_id, Some(&run.id), interrupt)
                                .await);
                        }
                    };

                    let step = self.submit(&turn, conversation_id, &run.id, &batch).await?;
                    turn.batches += 1;
                    turn.awaiting_ack =
                        Some(run.pending_calls.iter().map(|c| c.id.clone()).collect());
                    turn.faults.extend(batch.faults);
                    backoff.reset();
                    step
                }
                // The remote side has not caught up with the batch we just sent.
                RunStatus::RequiresAction => self.poll(&turn, &mut backoff, &run).await?,
                status if status.is_active() => self.poll(&turn, &mut backoff, &run).await?,
                RunStatus::Completed | RunStatus::Incomplete => {
                    info!(run_id = %run.id, status = %run.status, batches = turn.batches, "Run finished");
                    return self.extract(&mut turn, conversation_id, &run).await;
                }
                _ => {
                    info!(run_id = %run.id, status = %run.status, "Run ended without completing");
                    return Ok(turn.finish(remote_failure(&run)));
                }
            };

            run = match next {
                Step::Done(run) => run,
                Step::Interrupted(interrupt) => {
                    return Ok(self
                        .interrupted(&mut turn, conversation_id, Some(&run.id), interrupt)
                        .await);
                }
            };
        }
    }

    async fn poll(&self, turn: &Turn, backoff: &mut PollBackoff, run: &Run) -> Result<Step<Run>> {
        if let Some(interrupt) = turn.pause(backoff.next_delay()).await {
            return Ok(Step::Interrupted(interrupt));
        }
        self.retrying(turn, "get_run", || {
            self.service.get_run(&run.conversation_id, &run.id)
        })
        .await
    }

    async fn run_batch(&self, turn: &Turn, calls: &[ToolCall]) -> Result<Step<OutputBatch>> {
        info!(calls = calls.len(), "Run requires action");
        let batch = tokio::select! {
            biased;
            interrupt = turn.interrupted() => return Ok(Step::Interrupted(interrupt)),
            batch = aggregate(calls, &self.registry, self.max_concurrent_tools) => batch?,
        };

        // A batch that finished after the deadline is dropped, never sent.
        match turn.check() {
            Some(interrupt) => Ok(Step::Interrupted(interrupt)),
            None => Ok(Step::Done(batch)),
        }
    }

    async fn submit(
        &self,
        turn: &Turn,
        conversation_id: &str,
        run_id: &str,
        batch: &OutputBatch,
    ) -> Result<Step<Run>> {
        let step = self
            .retrying(turn, "submit_tool_outputs", || {
                self.service
                    .submit_tool_outputs(conversation_id, run_id, &batch.outputs)
            })
            .await
            .map_err(|e| match e {
                OrchestratorError::Service(ServiceError::Rejected(reason)) => {
                    OrchestratorError::SubmissionRejected {
                        run_id: run_id.to_string(),
                        reason,
                    }
                }
                other => other,
            })?;

        if matches!(step, Step::Done(_)) {
            info!(run_id, outputs = batch.outputs.len(), "Submitted tool outputs");
        }
        Ok(step)
    }

    /// Pages back through the conversation until the message that opened the
    /// turn. The run is already terminal here, so running out of time or
    /// pages keeps its status and marks the result truncated.
    async fn extract(&self, turn: &mut Turn, conversation_id: &str, run: &Run) -> Result<RunResult> {
        let mut messages = vec![];
        let mut truncated = true;

        for _ in 0..MAX_MESSAGE_PAGES {
            let after = messages.last().map(|m: &Message| m.id.clone());
            let page = match self
                .retrying(turn, "list_messages", || {
                    self.service
                        .list_messages(conversation_id, MESSAGE_PAGE_SIZE, after.as_deref())
                })
                .await?
            {
                Step::Done(page) => page,
                Step::Interrupted(interrupt) => {
                    warn!(run_id = %run.id, ?interrupt, "Stopped fetching messages of a finished run");
                    break;
                }
            };

            let reached_start =
                page.len() < MESSAGE_PAGE_SIZE || page.iter().any(|m| m.role != Role::Assistant);
            messages.extend(page);
            if reached_start {
                truncated = false;
                break;
            }
        }

        let mut result = ResponseExtractor::extract(run, &messages);
        if truncated {
            warn!(run_id = %run.id, messages = messages.len(), "Turn output may be incomplete");
        }
        result.truncated = truncated;
        Ok(turn.finish(result))
    }

    /// Calls the service, retrying transient failures with backoff. Every
    /// attempt and every wait is raced against the deadline and cancellation.
    async fn retrying<T, F, Fut>(
        &self,
        turn: &Turn,
        operation: &'static str,
        mut call: F,
    ) -> Result<Step<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let mut backoff = PollBackoff::new(self.poll);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                interrupt = turn.interrupted() => return Ok(Step::Interrupted(interrupt)),
                outcome = call() => outcome,
            };

            match outcome {
                Ok(value) => return Ok(Step::Done(value)),
                Err(ServiceError::Transient(message)) => {
                    if attempts > self.max_transport_retries {
                        return Err(OrchestratorError::TransportExhausted {
                            operation,
                            attempts,
                            last: message,
                        });
                    }
                    warn!(operation, attempts, error = %message, "Transient service error, retrying");
                    if let Some(interrupt) = turn.pause(backoff.next_delay()).await {
                        return Ok(Step::Interrupted(interrupt));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn interrupted(
        &self,
        turn: &mut Turn,
        conversation_id: &str,
        run_id: Option<&str>,
        interrupt: Interrupt,
    ) -> RunResult {
        let result = match interrupt {
            Interrupt::Timeout => {
                let elapsed_ms = turn.started.elapsed().as_millis() as u64;
                warn!(run_id = ?run_id, elapsed_ms, "Turn timed out locally");
                RunResult::empty(run_id.map(str::to_string), TurnStatus::ExpiredLocally)
                    .with_error(TurnError::LocalTimeout { elapsed_ms })
            }
            Interrupt::Cancelled => {
                if let Some(run_id) = run_id {
                    self.cancel_remote(conversation_id, run_id).await;
                }
                RunResult::empty(run_id.map(str::to_string), TurnStatus::CancelledLocally)
                    .with_error(TurnError::Cancelled)
            }
        };
        turn.finish(result)
    }

    async fn cancel_remote(&self, conversation_id: &str, run_id: &str) {
        match tokio::time::timeout(CANCEL_GRACE, self.service.cancel_run(conversation_id, run_id))
            .await
        {
            Ok(Ok(())) => info!(run_id, "Cancelled remote run"),
            Ok(Err(e)) => warn!(run_id, error = %e, "Failed to cancel remote run"),
            Err(_) => warn!(run_id, "Timed out cancelling remote run"),
        }
    }
}

/// A `requires_action` state is stale when it still shows the batch we just
/// submitted and the run has not been seen in any other status since.
fn is_stale(turn: &Turn, run: &Run) -> bool {
    let Some(submitted) = &turn.awaiting_ack else {
        return false;
    };
    submitted.len() == run.pending_calls.len()
        && run.pending_calls.iter().all(|c| submitted.contains(&c.id))
}

fn remote_failure(run: &Run) -> RunResult {
    let status = match run.status {
        RunStatus::Cancelled => TurnStatus::Cancelled,
        RunStatus::Expired => TurnStatus::Expired,
        _ => TurnStatus::Failed,
    };
    let (code, message) = match &run.last_error {
        Some(e) => (e.code.clone(), e.message.clone()),
        None => (
            run.status.to_string(),
            format!("run ended with status {}", run.status),
        ),
    };
    RunResult::empty(Some(run.id.clone()), status).with_error(TurnError::Remote { code, message })
}

/// One-shot form of [`RunController::execute_turn`] with default policies.
pub async fn execute_turn(
    service: Arc<dyn RunService>,
    conversation_id: &str,
    user_input: &str,
    registry: Arc<ToolRegistry>,
    timeout: Duration,
) -> Result<RunResult> {
    RunController::new(service, registry)
        .execute_turn(conversation_id, user_input, timeout)
        .await
}
