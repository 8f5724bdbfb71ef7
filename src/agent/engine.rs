use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::agent::model::{ChatMessage, CompletionRequest, ModelBackend};
use crate::agent::tools::{ToolCall, ToolOutput, Toolbox};
use crate::config::AgentConfig;
use crate::error::AppError;
use crate::shutdown::Interrupt;

/// Outcome of an agent run.
#[derive(Debug)]
pub enum AgentOutcome {
    /// Agent completed successfully with a summary of changes.
    Completed { summary: String },
    /// Agent hit the turn limit without finishing.
    TurnLimitReached,
    /// Agent used up its tool-call allowance.
    ToolBudgetExhausted,
    /// Agent ran past its wall-clock budget.
    TimeBudgetExhausted,
    /// The run was interrupted by a signal or the run timeout.
    Cancelled,
    /// The model backend failed for good.
    Failed(AppError),
}

impl AgentOutcome {
    /// Whether the run stopped on one of its budgets rather than finishing.
    pub fn is_budget_stop(&self) -> bool {
        matches!(
            self,
            AgentOutcome::TurnLimitReached
                | AgentOutcome::ToolBudgetExhausted
                | AgentOutcome::TimeBudgetExhausted
        )
    }
}

#[derive(Debug)]
pub struct AgentRun {
    pub outcome: AgentOutcome,
    pub turns: u32,
    pub tool_calls: u32,
}

pub struct AgentEngine {
    backend: Arc<dyn ModelBackend>,
    max_turns: u32,
    max_tool_calls: u32,
    wall_clock: Duration,
}

impl AgentEngine {
    pub fn new(backend: Arc<dyn ModelBackend>, config: &AgentConfig) -> Self {
        Self {
            backend,
            max_turns: config.max_turns,
            max_tool_calls: config.max_tool_calls,
            wall_clock: Duration::from_secs(config.max_wall_clock_secs),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Run the agentic loop until the model stops calling tools or a budget
    /// runs out.
    pub async fn run(
        &self,
        system_prompt: &str,
        initial_message: &str,
        tools: &mut Toolbox,
        interrupt: &Interrupt,
    ) -> AgentRun {
        let deadline = Instant::now() + self.wall_clock;
        let mut messages = vec![ChatMessage::user(initial_message)];
        let mut tool_calls = 0u32;
        let mut total_prompt_tokens = 0u32;
        let mut total_completion_tokens = 0u32;

        let finish = |outcome, turns, tool_calls| AgentRun {
            outcome,
            turns,
            tool_calls,
        };

        for turn in 0..self.max_turns {
            // Check for cancellation before each turn
            if interrupt.is_set() {
                tracing::info!("Agent cancelled");
                return finish(AgentOutcome::Cancelled, turn, tool_calls);
            }

            tracing::info!(turn, "Agent turn");

            let request = CompletionRequest {
                system: system_prompt.to_string(),
                messages: messages.clone(),
                tools: ToolCall::definitions(),
                json_output: false,
            };

            let completion =
                match tokio::time::timeout_at(deadline, self.backend.complete(&request)).await {
                    Ok(Ok(c)) => c,
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Model backend failed");
                        return finish(AgentOutcome::Failed(e), turn + 1, tool_calls);
                    }
                    Err(_) => {
                        tracing::warn!("Agent hit wall-clock budget");
                        return finish(AgentOutcome::TimeBudgetExhausted, turn + 1, tool_calls);
                    }
                };

            total_prompt_tokens += completion.usage.prompt_tokens;
            total_completion_tokens += completion.usage.completion_tokens;
            tracing::info!(
                prompt_tokens = completion.usage.prompt_tokens,
                completion_tokens = completion.usage.completion_tokens,
                finish_reason = ?completion.finish_reason,
                "Model response"
            );

            let message = completion.message;

            if message.tool_calls.is_empty() {
                if completion.finish_reason.as_deref() == Some("length") {
                    tracing::warn!("Agent response hit max_tokens limit");
                    messages.push(message);
                    messages.push(ChatMessage::user("Please continue."));
                    continue;
                }
                tracing::info!(
                    total_prompt_tokens,
                    total_completion_tokens,
                    turns = turn + 1,
                    tool_calls,
                    "Agent completed"
                );
                let summary = message.text().trim().to_string();
                return finish(AgentOutcome::Completed { summary }, turn + 1, tool_calls);
            }

            let requested = message.tool_calls.clone();
            messages.push(message);

            for call in &requested {
                if tool_calls >= self.max_tool_calls {
                    tracing::warn!(max_tool_calls = self.max_tool_calls, "Agent hit tool-call limit");
                    return finish(AgentOutcome::ToolBudgetExhausted, turn + 1, tool_calls);
                }
                if Instant::now() >= deadline {
                    tracing::warn!("Agent hit wall-clock budget");
                    return finish(AgentOutcome::TimeBudgetExhausted, turn + 1, tool_calls);
                }
                tool_calls += 1;

                let name = call.function.name.as_str();
                tracing::info!(tool = %name, "Executing tool");
                let content = match tools.execute(name, &call.function.arguments).await {
                    Ok(ToolOutput::Success(content)) => {
                        tracing::debug!(tool = %name, "Tool succeeded");
                        content
                    }
                    Ok(output @ ToolOutput::Error(_)) => {
                        let content = output.into_message();
                        tracing::warn!(tool = %name, error = %content, "Tool error");
                        content
                    }
                    Err(e) => {
                        tracing::error!(tool = %name, error = %e, "Tool execution error");
                        format!("Internal error: {e}")
                    }
                };
                messages.push(ChatMessage::tool_result(&call.id, content));
            }
        }

        tracing::warn!(max_turns = self.max_turns, "Agent hit turn limit");
        finish(AgentOutcome::TurnLimitReached, self.max_turns, tool_calls)
    }
}
