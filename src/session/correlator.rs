//! Tool call correlation
//!
//! Matches `tool_call` events to the `tool_response`/`tool_result` events that
//! finish them. The upstream `call_id` is used when the server supplies one.
//! Without it the invocation is keyed by `<name>@<timestamp>` and a completion
//! that carries no `response_id` is attributed to the most recently started
//! running execution of the same tool.
//!
//! That fallback is an approximation: when one tool is invoked again before
//! an earlier id-less invocation of it has completed, the first completion to
//! arrive is attributed to the later invocation.

use super::state::{ToolExecution, ToolStatus};
use crate::stream::StreamingEvent;
use serde::Serialize;

/// Name recorded when a `tool_call` carries no `tool_name`
pub const UNKNOWN_TOOL: &str = "unknown";

/// Tool executions of a conversation, in invocation order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolCorrelator {
    executions: Vec<ToolExecution>,
    /// Completions that matched no execution; diagnostics only
    #[serde(skip)]
    orphans: Vec<StreamingEvent>,
}

impl ToolCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ToolExecution> {
        self.executions.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ToolExecution> {
        self.executions.iter_mut().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolExecution> {
        self.executions.iter()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn orphans(&self) -> &[StreamingEvent] {
        &self.orphans
    }

    /// Record a `tool_call`, returning the correlation id of its execution.
    ///
    /// A repeated call id attaches the event to the existing execution.
    pub fn record_invocation(&mut self, event: &StreamingEvent) -> String {
        let name = event.tool_name().unwrap_or(UNKNOWN_TOOL);
        let id = match event.call_id() {
            Some(call_id) => call_id.to_string(),
            None => format!("{name}@{}", event.timestamp),
        };

        if let Some(existing) = self.get_mut(&id) {
            tracing::debug!(call_id = %id, tool = %name, "Repeated tool_call for known execution");
            existing.events.push(event.clone());
            return id;
        }

        tracing::debug!(call_id = %id, tool = %name, "Tool execution started");
        self.executions.push(ToolExecution {
            id: id.clone(),
            name: name.to_string(),
            args: event.tool_args(),
            status: ToolStatus::Running,
            started_at: event.timestamp,
            finished_at: None,
            duration_ms: None,
            result: None,
            error: None,
            sub_agent: event.sub_agent_name().map(str::to_string),
            events: vec![event.clone()],
        });
        id
    }

    /// Record a `tool_response`/`tool_result`, returning the id of the
    /// execution it resolved to, or `None` if it was orphaned.
    pub fn record_completion(&mut self, event: &StreamingEvent) -> Option<String> {
        let Some(id) = self.resolve(event) else {
            tracing::warn!(
                response_id = ?event.response_id(),
                tool = ?event.tool_name(),
                "Tool completion matched no execution"
            );
            self.orphans.push(event.clone());
            return None;
        };

        let execution = self.get_mut(&id)?;
        execution.events.push(event.clone());
        if execution.finish(ToolStatus::Completed, event.timestamp) {
            execution.result = event.tool_result().cloned();
            tracing::debug!(
                call_id = %id,
                tool = %execution.name,
                duration_ms = ?execution.duration_ms,
                "Tool execution completed"
            );
        } else {
            tracing::debug!(
                call_id = %id,
                status = ?execution.status,
                "Completion for already finished execution"
            );
        }
        Some(id)
    }

    fn resolve(&self, event: &StreamingEvent) -> Option<String> {
        if let Some(response_id) = event.response_id() {
            return self.get(response_id).map(|e| e.id.clone());
        }

        let name = event.tool_name()?;
        self.executions
            .iter()
            .rev()
            .find(|e| e.is_running() && e.name == name)
            .map(|e| e.id.clone())
    }

    /// Fail every running execution, returning how many were failed
    pub fn fail_running(&mut self, message: &str, at: f64) -> usize {
        let mut failed = 0;
        for execution in &mut self.executions {
            if execution.is_running() && execution.finish(ToolStatus::Error, at) {
                execution.error = Some(message.to_string());
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::debug!(count = failed, error = %message, "Failed running tool executions");
        }
        failed
    }

    pub fn clear(&mut self) {
        self.executions.clear();
        self.orphans.clear();
    }
}
