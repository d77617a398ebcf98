//! System prompt composition for the agent loop.
//!
//! The organism supplies named prompt blocks; `conduit_config::compose_prompt`
//! concatenates them. This module adds the tool-call wire format instruction
//! every agent needs regardless of which prompt blocks the organism wires in.

/// Appended to every composed system prompt so the model knows the
/// mechanical format `translate` expects back.
pub const TOOL_CALL_FORMAT: &str = "\
When you need to call a tool, respond with a <ToolCalls> block containing \
one <Call tag=\"...\"> element per call, each wrapping the exact XML payload \
for that tool's request schema. When you are done and have a final answer, \
respond with plain text and no <ToolCalls> block.";

/// Build the full system prompt: organism-composed blocks, then the
/// tool-call format instruction, then the available tool descriptions.
pub fn build_system_prompt(composed_blocks: &str, tool_descriptions: &[(String, String)]) -> String {
    let mut prompt = composed_blocks.to_string();

    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str(TOOL_CALL_FORMAT);

    if !tool_descriptions.is_empty() {
        prompt.push_str("\n\nAvailable tools:\n");
        for (name, description) in tool_descriptions {
            prompt.push_str(&format!("- **{name}**: {description}\n"));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_system_prompt_includes_tools_and_format() {
        let tools = vec![("file-read".to_string(), "reads files".to_string())];
        let prompt = build_system_prompt("You are a careful agent.", &tools);
        assert!(prompt.contains("You are a careful agent."));
        assert!(prompt.contains("ToolCalls"));
        assert!(prompt.contains("file-read"));
    }

    #[test]
    fn build_system_prompt_no_tools() {
        let prompt = build_system_prompt("You are a careful agent.", &[]);
        assert!(!prompt.contains("Available tools"));
    }
}
