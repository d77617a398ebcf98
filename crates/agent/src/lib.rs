//! The Agent Loop (§4.8): the single component that invokes an LLM for
//! reasoning and may dispatch tool calls in a loop. State machine:
//! `AwaitingTask -> Thinking -> AwaitingToolResults -> Thinking -> ... ->
//! Done | Failed`, realized as a stateful `Handler` (`conduit-pipeline::Handler`)
//! keyed per `thread_id`.

mod handler;
mod prompts;
mod state;
mod translate;

pub use handler::AgentHandler;
pub use prompts::{build_system_prompt, TOOL_CALL_FORMAT};
pub use state::{AgentState, ThreadState};
pub use translate::{translate_response, ToolCall, TranslateError, Translated};
