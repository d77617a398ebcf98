//! `AgentHandler` — the stateful `Handler` impl driving the agent loop
//! (§4.8). The only component in the fabric that invokes an LLM for
//! reasoning; the curator (conduit-router's `curation` helpers) is a
//! separate collaborator that never dispatches tool calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use conduit_events::{InferenceClient, Message, Output, Response};
use conduit_kernel::Kernel;
use tokio::sync::Mutex as AsyncMutex;

use crate::state::{AgentState, ThreadState};
use crate::translate::{translate_response, Translated};

pub struct AgentHandler {
    client: Arc<dyn InferenceClient>,
    kernel: Arc<AsyncMutex<Kernel>>,
    system_prompt: String,
    model: String,
    max_tokens: u32,
    max_iterations: u32,
    threads: StdMutex<HashMap<String, ThreadState>>,
}

impl AgentHandler {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        kernel: Arc<AsyncMutex<Kernel>>,
        system_prompt: String,
        model: String,
        max_tokens: u32,
        max_iterations: u32,
    ) -> Self {
        Self {
            client,
            kernel,
            system_prompt,
            model,
            max_tokens,
            max_iterations,
            threads: StdMutex::new(HashMap::new()),
        }
    }

    fn with_thread<R>(&self, thread_id: &str, f: impl FnOnce(&mut ThreadState) -> R) -> R {
        let mut threads = self.threads.lock().expect("agent thread map poisoned");
        let entry = threads.entry(thread_id.to_string()).or_insert_with(ThreadState::new);
        f(entry)
    }

    /// Calls inference with the thread's accumulated history, translates
    /// the response, and produces the next `Response` — Broadcast for tool
    /// calls, Reply for a final answer, Error on any failure.
    async fn think(&self, thread_id: &str) -> Response {
        let history = self.with_thread(thread_id, |t| t.history.clone());

        let completion = self
            .client
            .complete(Some(&self.model), history, self.max_tokens, Some(&self.system_prompt))
            .await;

        let text = match completion {
            Ok(response) => response.text,
            Err(e) => {
                self.with_thread(thread_id, |t| t.state = AgentState::Failed);
                return Response::Error {
                    kind: "InferenceFailed".to_string(),
                    message: e.to_string(),
                };
            }
        };

        self.with_thread(thread_id, |t| t.history.push(Message::assistant(text.clone())));

        match translate_response(&text) {
            Ok(Translated::FinalAnswer(answer)) => {
                self.with_thread(thread_id, |t| t.state = AgentState::Done);
                Response::reply(
                    format!("<AgentResponse>{}</AgentResponse>", xml_escape(&answer)),
                    "AgentResponse",
                )
            }
            Ok(Translated::ToolCalls(calls)) if calls.is_empty() => {
                self.with_thread(thread_id, |t| t.state = AgentState::Failed);
                Response::Error {
                    kind: "EmptyToolCallsBlock".to_string(),
                    message: "model emitted an empty <ToolCalls> block".to_string(),
                }
            }
            Ok(Translated::ToolCalls(calls)) => {
                let cap = self.max_iterations;
                let mut kernel = self.kernel.lock().await;
                let iteration = kernel.increment_iterations(thread_id).unwrap_or(0);
                drop(kernel);

                if iteration >= cap {
                    self.with_thread(thread_id, |t| t.state = AgentState::Failed);
                    let mut kernel = self.kernel.lock().await;
                    let _ = kernel.mark_thread_failed(thread_id);
                    return Response::Error {
                        kind: "IterationCapExceeded".to_string(),
                        message: format!("thread '{thread_id}' exceeded its iteration cap of {cap}"),
                    };
                }

                self.with_thread(thread_id, |t| {
                    t.state = AgentState::AwaitingToolResults;
                    t.pending_calls = calls.len();
                });

                let outputs = calls
                    .into_iter()
                    .map(|call| Output::new(thread_id, call.payload, call.tag))
                    .collect();
                Response::Broadcast(outputs)
            }
            Err(e) => {
                self.with_thread(thread_id, |t| t.state = AgentState::Failed);
                Response::Error {
                    kind: "TranslateFailed".to_string(),
                    message: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl conduit_pipeline::Handler for AgentHandler {
    async fn handle(&self, payload: &[u8], ctx: conduit_pipeline::HandlerContext) -> Response {
        let thread_id = ctx.thread_id.clone();
        let text = String::from_utf8_lossy(payload);
        let tag = root_tag(&text);

        let current_state = self.with_thread(&thread_id, |t| t.state);

        match (current_state, tag.as_deref()) {
            (AgentState::AwaitingTask, Some("AgentTask")) => {
                let task = extract_tag_content(&text, "AgentTask").unwrap_or_else(|| text.to_string());
                self.with_thread(&thread_id, |t| {
                    t.state = AgentState::Thinking;
                    t.history.push(Message::user(task));
                    t.iteration = 0;
                });
                self.think(&thread_id).await
            }
            (AgentState::AwaitingToolResults, Some(result_tag)) => {
                let body = extract_tag_content(&text, result_tag).unwrap_or_else(|| text.to_string());
                self.with_thread(&thread_id, |t| {
                    t.history
                        .push(Message::user(format!("<{result_tag}>{body}</{result_tag}>")));
                    t.pending_calls = t.pending_calls.saturating_sub(1);
                });
                let ready = self.with_thread(&thread_id, |t| t.pending_calls == 0);
                if ready {
                    self.with_thread(&thread_id, |t| t.state = AgentState::Thinking);
                    self.think(&thread_id).await
                } else {
                    Response::Silence
                }
            }
            (state, _) => Response::Error {
                kind: "UnexpectedInput".to_string(),
                message: format!("agent thread '{thread_id}' in state {state:?} received unroutable input"),
            },
        }
    }
}

fn root_tag(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('<') {
        return None;
    }
    let end = trimmed.find(|c: char| c == '>' || c == ' ' || c == '/')?;
    Some(trimmed[1..end].to_string())
}

fn extract_tag_content(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let start = text.find(&open)?;
    let after_open = text[start..].find('>')? + start + 1;
    if text[start..after_open].ends_with("/>") {
        return Some(String::new());
    }
    let close = format!("</{tag}>");
    let end = text[after_open..].find(&close)? + after_open;
    Some(text[after_open..end].trim().to_string())
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_events::InferenceResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        responses: std::sync::Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn complete(
            &self,
            _model: Option<&str>,
            _messages: Vec<Message>,
            _max_tokens: u32,
            _system: Option<&str>,
        ) -> Result<InferenceResponse, conduit_events::InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            Ok(InferenceResponse { text: responses.remove(0) })
        }
    }

    async fn test_kernel() -> Arc<AsyncMutex<Kernel>> {
        let dir = tempfile::tempdir().unwrap();
        let mut kernel = Kernel::open(dir.path()).unwrap();
        kernel.initialize_root("coding").unwrap();
        std::mem::forget(dir);
        Arc::new(AsyncMutex::new(kernel))
    }

    fn ctx(thread_id: &str) -> conduit_pipeline::HandlerContext {
        conduit_pipeline::HandlerContext {
            thread_id: thread_id.to_string(),
            sender: "ui".to_string(),
            self_name: "agent".to_string(),
            submit: conduit_pipeline::SubmitHandle::new(),
        }
    }

    #[tokio::test]
    async fn text_only_task_produces_agent_response_reply() {
        let client = Arc::new(ScriptedClient {
            responses: std::sync::Mutex::new(vec!["the answer is 42".to_string()]),
            calls: AtomicUsize::new(0),
        });
        let kernel = test_kernel().await;
        let handler = AgentHandler::new(client, kernel, "system".to_string(), "sonnet".to_string(), 1024, 5);

        let response = conduit_pipeline::Handler::handle(
            &handler,
            b"<AgentTask>what is 6 times 7</AgentTask>",
            ctx("root"),
        )
        .await;

        match response {
            Response::Reply { payload, payload_tag } => {
                assert_eq!(payload_tag, "AgentResponse");
                assert!(String::from_utf8(payload).unwrap().contains("42"));
            }
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_task_produces_broadcast_then_final_answer() {
        let client = Arc::new(ScriptedClient {
            responses: std::sync::Mutex::new(vec![
                r#"<ToolCalls><Call tag="FileReadRequest"><FileReadRequest path="/tmp/a"/></Call></ToolCalls>"#
                    .to_string(),
                "the file contains hello world".to_string(),
            ]),
            calls: AtomicUsize::new(0),
        });
        let kernel = test_kernel().await;
        let handler = AgentHandler::new(client, kernel, "system".to_string(), "sonnet".to_string(), 1024, 5);

        let first = conduit_pipeline::Handler::handle(&handler, b"<AgentTask>read /tmp/a</AgentTask>", ctx("root")).await;
        match first {
            Response::Broadcast(outputs) => {
                assert_eq!(outputs.len(), 1);
                assert_eq!(outputs[0].payload_tag, "FileReadRequest");
            }
            other => panic!("expected Broadcast, got {other:?}"),
        }

        let second = conduit_pipeline::Handler::handle(
            &handler,
            b"<FileReadResponse>hello world</FileReadResponse>",
            ctx("root"),
        )
        .await;
        match second {
            Response::Reply { payload_tag, .. } => assert_eq!(payload_tag, "AgentResponse"),
            other => panic!("expected Reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn iteration_cap_transitions_thread_to_failed_after_exactly_k_calls() {
        const CAP: u32 = 3;
        const TOOL_CALL: &str =
            r#"<ToolCalls><Call tag="FileReadRequest"><FileReadRequest path="/tmp/a"/></Call></ToolCalls>"#;

        let client = Arc::new(ScriptedClient {
            responses: std::sync::Mutex::new(vec![TOOL_CALL.to_string(); CAP as usize + 2]),
            calls: AtomicUsize::new(0),
        });
        let kernel = test_kernel().await;
        let handler = AgentHandler::new(
            client.clone(),
            kernel.clone(),
            "system".to_string(),
            "sonnet".to_string(),
            1024,
            CAP,
        );

        let mut response =
            conduit_pipeline::Handler::handle(&handler, b"<AgentTask>loop forever</AgentTask>", ctx("root")).await;

        // A tool-calling response is produced on every iteration up to the
        // cap; only the CAP-th inference call is turned into Failed instead
        // of another Broadcast, so this drives exactly CAP - 1 more rounds.
        for _ in 0..CAP - 1 {
            match response {
                Response::Broadcast(outputs) => {
                    assert_eq!(outputs.len(), 1);
                    response = conduit_pipeline::Handler::handle(
                        &handler,
                        b"<FileReadResponse>x</FileReadResponse>",
                        ctx("root"),
                    )
                    .await;
                }
                other => panic!("expected Broadcast before the iteration cap, got {other:?}"),
            }
        }

        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "IterationCapExceeded"),
            other => panic!("expected IterationCapExceeded, got {other:?}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), CAP as usize);

        let kernel = kernel.lock().await;
        assert_eq!(kernel.threads().get("root").unwrap().status, conduit_kernel::ThreadStatus::Failed);
    }

    #[tokio::test]
    async fn unroutable_input_in_awaiting_task_state_errors() {
        let client = Arc::new(ScriptedClient {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let kernel = test_kernel().await;
        let handler = AgentHandler::new(client, kernel, "system".to_string(), "sonnet".to_string(), 1024, 5);

        let response = conduit_pipeline::Handler::handle(&handler, b"<FileReadResponse>x</FileReadResponse>", ctx("root")).await;
        assert!(matches!(response, Response::Error { .. }));
    }
}
