//! Per-thread agent state (§4.8): `AwaitingTask → Thinking →
//! AwaitingToolResults → Thinking → … → Done | Failed`.

use conduit_events::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    AwaitingTask,
    Thinking,
    AwaitingToolResults,
    Done,
    Failed,
}

/// Conversation state for one thread the agent is running. Held for the
/// life of the thread; there is one of these per `thread_id` the agent has
/// ever been dispatched on.
#[derive(Debug, Clone)]
pub struct ThreadState {
    pub state: AgentState,
    pub history: Vec<Message>,
    pub iteration: u32,
    /// Count of tool calls dispatched this iteration that haven't yet
    /// produced a response. Reaching zero re-enters `Thinking`.
    pub pending_calls: usize,
}

impl ThreadState {
    pub fn new() -> Self {
        Self {
            state: AgentState::AwaitingTask,
            history: Vec::new(),
            iteration: 0,
            pending_calls: 0,
        }
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}
