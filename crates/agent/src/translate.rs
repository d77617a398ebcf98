//! Mechanical translation between an inference response and envelopes
//! (§4.8). No interpretation: either the response's `<ToolCalls>` block
//! parses into well-formed calls, or translation fails with a structured
//! `TranslateError` — never a panic (§9's "no hidden non-local exits").

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub tag: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translated {
    /// One or more tool calls to dispatch; the thinker stays in
    /// `AwaitingToolResults`.
    ToolCalls(Vec<ToolCall>),
    /// A text-only response; the thinker is `Done`.
    FinalAnswer(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("<ToolCalls> block is missing its closing tag")]
    UnclosedToolCallsBlock,
    #[error("<Call> element at offset {offset} is missing a tag attribute")]
    MissingCallTag { offset: usize },
    #[error("<Call> element for tag '{tag}' is missing its closing tag")]
    UnclosedCall { tag: String },
}

/// Translate one inference response into either tool calls or a final
/// answer. Purely mechanical: this function never decides whether a tool
/// call makes sense, only whether the wire format is well-formed.
pub fn translate_response(text: &str) -> Result<Translated, TranslateError> {
    let trimmed = text.trim();

    let Some(open) = trimmed.find("<ToolCalls>") else {
        return Ok(Translated::FinalAnswer(trimmed.to_string()));
    };

    let body_start = open + "<ToolCalls>".len();
    let Some(close_rel) = trimmed[body_start..].find("</ToolCalls>") else {
        return Err(TranslateError::UnclosedToolCallsBlock);
    };
    let body = &trimmed[body_start..body_start + close_rel];

    let mut calls = Vec::new();
    let mut cursor = 0usize;
    while let Some(rel) = body[cursor..].find("<Call ") {
        let start = cursor + rel;
        let Some(tag) = extract_attr(&body[start..], "tag") else {
            return Err(TranslateError::MissingCallTag { offset: start });
        };
        let close_tag = "</Call>";
        let Some(end_rel) = body[start..].find(close_tag) else {
            return Err(TranslateError::UnclosedCall { tag });
        };
        let element = &body[start..start + end_rel + close_tag.len()];
        let payload = extract_call_payload(element);
        calls.push(ToolCall {
            tag,
            payload: payload.into_bytes(),
        });
        cursor = start + end_rel + close_tag.len();
    }

    Ok(Translated::ToolCalls(calls))
}

fn extract_attr(element: &str, attr: &str) -> Option<String> {
    let pattern = format!("{attr}=\"");
    let start = element.find(&pattern)? + pattern.len();
    let end = element[start..].find('"')? + start;
    Some(element[start..end].to_string())
}

/// The payload is everything between the `<Call ...>` element's closing
/// `>` and its matching `</Call>`.
fn extract_call_payload(element: &str) -> String {
    let body_start = element.find('>').map(|i| i + 1).unwrap_or(element.len());
    let body_end = element.rfind("</Call>").unwrap_or(element.len());
    if body_start >= body_end {
        String::new()
    } else {
        element[body_start..body_end].trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_response_is_final_answer() {
        let result = translate_response("Here is a summary of what I did.").unwrap();
        assert_eq!(
            result,
            Translated::FinalAnswer("Here is a summary of what I did.".to_string())
        );
    }

    #[test]
    fn single_tool_call_is_extracted() {
        let text = r#"<ToolCalls><Call tag="FileReadRequest"><FileReadRequest path="/tmp/a"/></Call></ToolCalls>"#;
        let result = translate_response(text).unwrap();
        match result {
            Translated::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].tag, "FileReadRequest");
                assert_eq!(
                    String::from_utf8(calls[0].payload.clone()).unwrap(),
                    r#"<FileReadRequest path="/tmp/a"/>"#
                );
            }
            Translated::FinalAnswer(_) => panic!("expected tool calls"),
        }
    }

    #[test]
    fn multiple_tool_calls_are_extracted_in_order() {
        let text = r#"<ToolCalls>
            <Call tag="FileReadRequest"><FileReadRequest path="/a"/></Call>
            <Call tag="FileReadRequest"><FileReadRequest path="/b"/></Call>
        </ToolCalls>"#;
        let result = translate_response(text).unwrap();
        match result {
            Translated::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert!(String::from_utf8_lossy(&calls[0].payload).contains("/a"));
                assert!(String::from_utf8_lossy(&calls[1].payload).contains("/b"));
            }
            Translated::FinalAnswer(_) => panic!("expected tool calls"),
        }
    }

    #[test]
    fn unclosed_tool_calls_block_errors() {
        let text = r#"<ToolCalls><Call tag="FileReadRequest"><FileReadRequest/></Call>"#;
        assert_eq!(
            translate_response(text).unwrap_err(),
            TranslateError::UnclosedToolCallsBlock
        );
    }

    #[test]
    fn call_missing_tag_attribute_errors() {
        let text = r#"<ToolCalls><Call><FileReadRequest/></Call></ToolCalls>"#;
        assert!(matches!(
            translate_response(text),
            Err(TranslateError::MissingCallTag { .. })
        ));
    }

    #[test]
    fn empty_tool_calls_block_yields_empty_list() {
        let result = translate_response("<ToolCalls></ToolCalls>").unwrap();
        assert_eq!(result, Translated::ToolCalls(vec![]));
    }
}
