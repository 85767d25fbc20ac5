use anyhow::Result;

use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;
use crate::providers::base::Provider;
use crate::registry::ToolExecutor;

/// Ceiling on tool-resolution rounds within one query, so a model that
/// keeps requesting tools cannot cycle forever.
const MAX_TOOL_ROUNDS: usize = 8;

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when they are \
relevant to the user's question.";

/// The orchestrator: drives one query to completion, splicing tool results
/// back into the conversation between completion calls.
pub struct Agent {
    provider: Box<dyn Provider>,
    executor: Box<dyn ToolExecutor>,
    tools: Vec<Tool>,
}

impl Agent {
    /// Connect to the tool executor and discover its tools. Discovery
    /// happens once; the descriptor snapshot is reused for every query.
    pub async fn connect(
        provider: Box<dyn Provider>,
        executor: Box<dyn ToolExecutor>,
    ) -> Result<Self> {
        let tools = executor.list_tools().await?;
        Ok(Self {
            provider,
            executor,
            tools,
        })
    }

    /// The discovered tool descriptors
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Process a single user query. The conversation is created fresh for
    /// the query and dropped with it.
    ///
    /// Each round issues one completion call, then answers every tool-use
    /// block in response order, one invocation in flight at a time, before
    /// the next call. A response without tool-use blocks ends the loop.
    /// Tool failures are carried as result payloads; only completion-service
    /// failures abort the query.
    pub async fn process_query(&self, query: &str) -> Result<String> {
        let mut messages = vec![Message::user().with_text(query)];
        let mut final_text: Vec<String> = Vec::new();

        for _ in 0..MAX_TOOL_ROUNDS {
            let (response, _usage) = self
                .provider
                .complete(SYSTEM_PROMPT, &messages, &self.tools)
                .await?;

            messages.push(response.clone());

            let mut tool_responses = Message::user();
            let mut requested_tools = false;

            for content in &response.content {
                match content {
                    MessageContent::Text(text) => {
                        if !text.text.is_empty() {
                            final_text.push(text.text.clone());
                        }
                    }
                    MessageContent::ToolRequest(request) => {
                        requested_tools = true;
                        let result = match &request.tool_call {
                            Ok(call) => {
                                final_text.push(format!(
                                    "[Calling tool {} with args {}]",
                                    call.name, call.arguments
                                ));
                                self.executor.call_tool(call.clone()).await
                            }
                            Err(e) => {
                                final_text.push(format!("[Invalid tool request: {e}]"));
                                Err(e.clone())
                            }
                        };
                        tool_responses =
                            tool_responses.with_tool_response(request.id.clone(), result);
                    }
                    // The model never sends tool responses
                    MessageContent::ToolResponse(_) => {}
                }
            }

            if !requested_tools {
                break;
            }
            messages.push(tool_responses);
        }

        Ok(final_text.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, AgentResult};
    use crate::models::content::Content;
    use crate::models::tool::ToolCall;
    use crate::providers::base::Usage;
    use crate::providers::mock::MockProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct MockExecutor {
        calls: Arc<AtomicUsize>,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for MockExecutor {
        async fn list_tools(&self) -> Result<Vec<Tool>> {
            Ok(vec![Tool::new(
                "echo",
                "Echoes back the input",
                json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"],
                }),
            )])
        }

        async fn call_tool(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match tool_call.name.as_str() {
                "echo" => Ok(vec![Content::text(
                    tool_call.arguments["message"].as_str().unwrap_or(""),
                )]),
                _ => Err(AgentError::ToolNotFound(tool_call.name)),
            }
        }
    }

    /// Records the conversation presented to each completion call
    struct RecordingProvider {
        responses: Mutex<Vec<Message>>,
        seen: Arc<Mutex<Vec<Vec<Message>>>>,
    }

    impl RecordingProvider {
        fn new(responses: Vec<Message>) -> (Self, Arc<Mutex<Vec<Vec<Message>>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    responses: Mutex::new(responses),
                    seen: seen.clone(),
                },
                seen,
            )
        }
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        async fn complete(
            &self,
            _system: &str,
            messages: &[Message],
            _tools: &[Tool],
        ) -> Result<(Message, Usage)> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok((Message::assistant().with_text(""), Usage::default()))
            } else {
                Ok((responses.remove(0), Usage::default()))
            }
        }
    }

    async fn agent_with(provider: Box<dyn Provider>) -> Agent {
        Agent::connect(provider, Box::new(MockExecutor::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_simple_response() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("Hello!")]);
        let agent = agent_with(Box::new(provider)).await;

        let answer = agent.process_query("Hi").await.unwrap();

        assert_eq!(answer, "Hello!");
    }

    #[tokio::test]
    async fn test_tool_call_annotated_and_answered() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "1",
                Ok(ToolCall::new("echo", json!({"message": "test"}))),
            ),
            Message::assistant().with_text("Done!"),
        ]);
        let agent = agent_with(Box::new(provider)).await;

        let answer = agent.process_query("Echo test").await.unwrap();

        let lines: Vec<&str> = answer.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Calling tool echo"));
        assert!(lines[0].contains("\"message\":\"test\""));
        assert_eq!(lines[1], "Done!");
    }

    #[tokio::test]
    async fn test_invalid_tool_does_not_abort_query() {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("invalid_tool", json!({})))),
            Message::assistant().with_text("Error occurred"),
        ]);
        let agent = agent_with(Box::new(provider)).await;

        let answer = agent.process_query("Invalid tool").await.unwrap();

        assert!(answer.contains("Calling tool invalid_tool"));
        assert!(answer.ends_with("Error occurred"));
    }

    #[tokio::test]
    async fn test_every_tool_use_answered_before_next_call() {
        let (provider, seen) = RecordingProvider::new(vec![
            Message::assistant()
                .with_tool_request("1", Ok(ToolCall::new("echo", json!({"message": "first"}))))
                .with_tool_request("2", Ok(ToolCall::new("echo", json!({"message": "second"})))),
            Message::assistant().with_text("All done!"),
        ]);
        let agent = agent_with(Box::new(provider)).await;

        agent.process_query("Multiple calls").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);

        // The second call's conversation carries one response per request,
        // ids matched, appended after the assistant message.
        let conversation = &seen[1];
        assert_eq!(conversation.len(), 3);
        let requests = conversation[1].tool_requests();
        let responses: Vec<_> = conversation[2]
            .content
            .iter()
            .filter_map(|content| content.as_tool_response())
            .collect();
        assert_eq!(requests.len(), 2);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, "1");
        assert_eq!(responses[1].id, "2");
        assert_eq!(
            responses[0].tool_result.as_ref().unwrap()[0].as_text(),
            Some("first")
        );
    }

    #[tokio::test]
    async fn test_tool_loop_is_bounded() {
        // A provider that requests a tool on every round
        struct LoopingProvider;

        #[async_trait]
        impl Provider for LoopingProvider {
            async fn complete(
                &self,
                _system: &str,
                _messages: &[Message],
                _tools: &[Tool],
            ) -> Result<(Message, Usage)> {
                Ok((
                    Message::assistant().with_tool_request(
                        "1",
                        Ok(ToolCall::new("echo", json!({"message": "again"}))),
                    ),
                    Usage::default(),
                ))
            }
        }

        let executor = MockExecutor::new();
        let calls = executor.calls.clone();
        let agent = Agent::connect(Box::new(LoopingProvider), Box::new(executor))
            .await
            .unwrap();

        let answer = agent.process_query("loop").await.unwrap();

        // One invocation per round, then the ceiling stops the cycle
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TOOL_ROUNDS);
        assert_eq!(answer.lines().count(), MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_query() {
        struct FailingProvider;

        #[async_trait]
        impl Provider for FailingProvider {
            async fn complete(
                &self,
                _system: &str,
                _messages: &[Message],
                _tools: &[Tool],
            ) -> Result<(Message, Usage)> {
                anyhow::bail!("rate limited")
            }
        }

        let agent = agent_with(Box::new(FailingProvider)).await;

        assert!(agent.process_query("Hi").await.is_err());
    }

    #[tokio::test]
    async fn test_discovery_snapshot() {
        let provider = MockProvider::new(vec![]);
        let agent = agent_with(Box::new(provider)).await;

        assert_eq!(agent.tools().len(), 1);
        assert_eq!(agent.tools()[0].name, "echo");
    }
}
