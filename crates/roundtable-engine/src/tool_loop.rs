//! Per-speaker generation and the bounded model↔tool loop.
//!
//! A speaker streams a response; a `tool_use` finish enters the loop:
//! execute the invocations, append a tool message, reassemble context, call
//! the model again. The loop runs at most `max_tool_iterations` model calls,
//! then closes the speaker with whatever content accumulated.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt};
use tracing::{error, instrument, warn};

use roundtable_core::client::{FinishReason, GenerateRequest, ModelResponse};
use roundtable_core::errors::GatewayError;
use roundtable_core::events::TurnEvent;
use roundtable_core::ids::ParticipantId;
use roundtable_core::messages::Message;
use roundtable_core::tools::{
    InvocationResult, PermissionLevel, ToolContext, ToolInvocation,
};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::executor::{prior_context, TurnExecutor};
use crate::permissions::{PermissionDecision, PermissionReply, PermissionRequest};
use crate::schema;
use crate::truncate;

impl TurnExecutor {
    /// Run one speaker to completion. Emits `ResponseStart`, streamed chunks,
    /// tool events, and either `ResponseComplete` or a terminal error event
    /// (`tool_iteration_limit`) for this speaker.
    #[instrument(skip(self, prior, cancel), fields(participant = %speaker))]
    pub(crate) async fn run_speaker(
        &self,
        speaker: &ParticipantId,
        prior: &[(ParticipantId, String)],
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, EngineError> {
        let client = self
            .clients
            .get(speaker)
            .cloned()
            .ok_or_else(|| EngineError::UnknownParticipant(speaker.to_string()))?;
        if !client.is_available() {
            return Err(EngineError::Gateway(GatewayError::NetworkError(format!(
                "{speaker} is not available"
            ))));
        }
        let participant = self
            .participant(speaker)
            .cloned()
            .ok_or_else(|| EngineError::UnknownParticipant(speaker.to_string()))?;

        self.send(TurnEvent::ResponseStart {
            participant: speaker.clone(),
        })
        .await;

        let other_names = self.other_display_names(speaker);
        let additional = prior_context(prior);
        let mut iterations = 0u32;

        loop {
            iterations += 1;
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            // Context is reassembled every iteration so tool results from the
            // previous pass are visible.
            let history = self.messages.load_active(&self.session_id)?;
            let summary = self.summaries.latest(&self.session_id)?.map(|s| s.content);
            let ctx = self.assembler.assemble(
                &self.session_id,
                &participant,
                client.as_ref(),
                &history,
                &HashSet::new(),
                summary.as_deref(),
                &other_names,
                additional.as_deref(),
            );
            for warning in &ctx.warnings {
                warn!(participant = %speaker, ?warning, "context assembly warning");
            }

            let request = GenerateRequest::new(ctx.messages)
                .with_system(ctx.system_prompt)
                .with_tools(self.registry.descriptors())
                .with_max_tokens(self.config.response_max_tokens)
                .with_temperature(participant.temperature);

            let mut stream = client.generate_stream(request).await?;

            let mut content = String::new();
            let mut calls: Vec<ToolInvocation> = Vec::new();
            let mut finish = FinishReason::Stop;
            let mut usage = None;

            while let Some(chunk) = stream.next().await {
                if cancel.is_cancelled() {
                    // Persist what streamed so far with a truncation marker;
                    // the session tail stays consistent.
                    let partial = Message::assistant(
                        self.session_id.clone(),
                        speaker.clone(),
                        format!("{content}\n[truncated]"),
                    );
                    self.messages.append(&partial)?;
                    return Err(EngineError::Aborted);
                }
                if let Some(text) = chunk.text {
                    if !text.is_empty() {
                        content.push_str(&text);
                        self.send(TurnEvent::ResponseChunk {
                            participant: speaker.clone(),
                            text,
                        })
                        .await;
                    }
                }
                if let Some(call) = chunk.tool_call {
                    self.send(TurnEvent::ToolCall {
                        participant: speaker.clone(),
                        invocation: call.clone(),
                    })
                    .await;
                    calls.push(call);
                }
                if let Some(reason) = chunk.finish_reason {
                    finish = reason;
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                }
            }

            if finish == FinishReason::Error {
                return Err(EngineError::Gateway(GatewayError::StreamInterrupted(
                    "model signalled an error mid-stream".into(),
                )));
            }

            let assistant_msg =
                Message::assistant(self.session_id.clone(), speaker.clone(), content.clone())
                    .with_tool_calls(calls.clone())
                    .with_usage(usage.clone());
            self.messages.append(&assistant_msg)?;

            let response = ModelResponse {
                participant: speaker.clone(),
                content,
                finish_reason: finish,
                tool_calls: calls.clone(),
                usage,
            };

            if finish == FinishReason::ToolUse && !calls.is_empty() {
                if iterations >= self.config.max_tool_iterations {
                    warn!(
                        participant = %speaker,
                        iterations,
                        "tool iteration limit reached, closing speaker"
                    );
                    self.send(TurnEvent::Error {
                        participant: Some(speaker.clone()),
                        kind: "tool_iteration_limit".into(),
                        message: format!(
                            "tool loop did not converge within {} model calls",
                            self.config.max_tool_iterations
                        ),
                        recoverable: true,
                    })
                    .await;
                    return Ok(response);
                }

                let results = self.execute_invocations(speaker, &calls, cancel).await;
                let tool_msg =
                    Message::tool_results(self.session_id.clone(), speaker.clone(), results);
                self.messages.append(&tool_msg)?;
                continue;
            }

            self.send(TurnEvent::ResponseComplete {
                participant: speaker.clone(),
                response: response.clone(),
            })
            .await;
            return Ok(response);
        }
    }

    /// Execute one iteration's invocations in order. Failures are reported
    /// uniformly as error results; one bad call never aborts its siblings.
    pub(crate) async fn execute_invocations(
        &self,
        speaker: &ParticipantId,
        calls: &[ToolInvocation],
        cancel: &CancellationToken,
    ) -> Vec<InvocationResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.execute_one(speaker, call, cancel).await;
            self.send(TurnEvent::ToolResult {
                participant: speaker.clone(),
                result: result.clone(),
            })
            .await;
            results.push(result);
        }
        results
    }

    async fn execute_one(
        &self,
        speaker: &ParticipantId,
        call: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return InvocationResult::error(
                call.id.clone(),
                format!("unknown tool: {}", call.name),
            );
        };
        let descriptor = tool.descriptor();

        if let Err(detail) = schema::validate_args(&descriptor.parameters_schema, &call.arguments)
        {
            return InvocationResult::error(
                call.id.clone(),
                format!("invalid arguments: {detail}"),
            );
        }

        let level = self
            .permissions
            .effective_level(&call.name, descriptor.permission_level);
        match self.permissions.check(&call.name, level) {
            PermissionDecision::Approve => {}
            PermissionDecision::Deny => {
                return InvocationResult::error(call.id.clone(), "permission denied");
            }
            PermissionDecision::Ask => {
                self.send(TurnEvent::ToolPermissionRequest {
                    participant: speaker.clone(),
                    invocation: call.clone(),
                    level,
                })
                .await;

                let reply = match &self.permission_prompt {
                    Some(prompt) => {
                        prompt
                            .request(PermissionRequest {
                                participant: speaker.clone(),
                                invocation: call.clone(),
                                level,
                                description: descriptor.description.clone(),
                            })
                            .await
                    }
                    None => {
                        warn!(tool = %call.name, "no permission prompt wired, denying");
                        PermissionReply {
                            allow: false,
                            remember_for_session: false,
                        }
                    }
                };
                if !reply.allow {
                    return InvocationResult::error(call.id.clone(), "permission denied");
                }
                if reply.remember_for_session && level == PermissionLevel::Cautious {
                    self.permissions.record_grant(&call.name);
                }
            }
        }

        self.send(TurnEvent::ToolExecuting {
            participant: speaker.clone(),
            invocation_id: call.id.clone(),
        })
        .await;

        let tool_ctx = ToolContext {
            session_id: self.session_id.clone(),
            participant: speaker.clone(),
            working_directory: self.config.working_directory.clone(),
            abort_signal: cancel.clone(),
        };

        let outcome = tokio::time::timeout(
            self.config.tool_deadline,
            AssertUnwindSafe(tool.execute(call.arguments.clone(), &tool_ctx)).catch_unwind(),
        )
        .await;

        let (content, is_error) = match outcome {
            Ok(Ok(Ok(output))) => (output.content, output.is_error),
            Ok(Ok(Err(err))) => (err.to_string(), true),
            Ok(Err(panic)) => {
                error!(tool = %call.name, panic = %panic_message(&panic), "tool panicked");
                ("internal error: tool crashed".to_string(), true)
            }
            Err(_) => {
                warn!(
                    tool = %call.name,
                    deadline_secs = self.config.tool_deadline.as_secs(),
                    "tool timed out"
                );
                (
                    format!(
                        "tool timed out after {}s",
                        self.config.tool_deadline.as_secs()
                    ),
                    true,
                )
            }
        };

        let content = truncate::truncate_output(&content, truncate::max_output_for_tool(&call.name));
        InvocationResult {
            invocation_id: call.id.clone(),
            content,
            is_error,
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
