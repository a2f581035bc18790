use crate::agent::registry::ToolRegistry;
use crate::agent::result::ToolFault;
use crate::error::{OrchestratorError, Result};
use crate::traits::{ToolCall, ToolOutput};
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct OutputBatch {
    /// One output per pending call, in the order the calls were listed.
    pub outputs: Vec<ToolOutput>,
    pub faults: Vec<ToolFault>,
}

/// Runs every pending call (at most `concurrency` at a time) and returns the
/// complete batch. A batch that does not cover each call exactly once is an
/// error and must never be submitted.
pub async fn aggregate(
    pending_calls: &[ToolCall],
    registry: &ToolRegistry,
    concurrency: usize,
) -> Result<OutputBatch> {
    let mut ids = HashSet::with_capacity(pending_calls.len());
    for call in pending_calls {
        if !ids.insert(call.id.as_str()) {
            return Err(OrchestratorError::DuplicateCallId(call.id.clone()));
        }
    }

    let invocations: Vec<_> = stream::iter(pending_calls.iter().map(|call| async move {
        debug!(call_id = %call.id, tool = %call.name, "Invoking tool");
        (call, registry.invoke_detailed(call).await)
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut batch = OutputBatch::default();
    for (call, invocation) in invocations {
        if let Some(kind) = invocation.fault {
            warn!(
                call_id = %call.id,
                tool = %call.name,
                ?kind,
                error = %invocation.output.output,
                "Tool call failed"
            );
            batch.faults.push(ToolFault {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                kind,
                message: invocation.output.output.clone(),
            });
        }
        batch.outputs.push(invocation.output);
    }

    ensure_complete(pending_calls, &batch.outputs)?;
    Ok(batch)
}

/// Every pending call id appears exactly once among the outputs.
pub fn ensure_complete(pending_calls: &[ToolCall], outputs: &[ToolOutput]) -> Result<()> {
    let incomplete = || OrchestratorError::BatchIncomplete {
        expected: pending_calls.len(),
        produced: outputs.len(),
    };

    if outputs.len() != pending_calls.len() {
        return Err(incomplete());
    }

    let mut expected: HashSet<&str> = pending_calls.iter().map(|c| c.id.as_str()).collect();
    for output in outputs {
        if !expected.remove(output.call_id.as_str()) {
            return Err(incomplete());
        }
    }

    Ok(())
}
