//! Curation prompt helpers (§4.4) — ambient convenience for an external
//! curator collaborator (typically a cheap model) deciding which context
//! segments to fold, evict, or unfold. The context store only exposes a
//! metadata-only `ContextInventory`; it never decides curation itself.
//!
//! Adapted for the three-state `Expanded`/`Folded`/`Evicted` model: a
//! curator issues `fold_in` (Evicted/Folded → Expanded), `fold_out`
//! (Expanded → Folded), and `evict` (→ Evicted) directives, rather than the
//! binary page-in/page-out of a two-state model.

use conduit_events::Message;
use conduit_kernel::{ContextInventory, SegmentStatus};

pub const CURATION_SYSTEM: &str = "\
You are a context curator. Your job is to decide which context segments \
should be expanded (full content visible), folded (summary only), or \
evicted (removed from the active window) for an upcoming inference call. \
Consider the incoming messages and the segment metadata. Stay within the \
token budget. Respond ONLY with a CurationDecision XML block.";

/// A parsed curation decision.
#[derive(Debug, Clone, Default)]
pub struct CurationDecision {
    pub fold_in: Vec<String>,
    pub fold_out: Vec<String>,
    pub evict: Vec<String>,
}

/// Build the curation prompt sent to the curator model.
pub fn build_curation_prompt(
    inventory: &ContextInventory,
    incoming_messages: &[Message],
    token_budget: usize,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("<CurationRequest>\n");
    prompt.push_str(&format!("  <token_budget>{token_budget}</token_budget>\n"));

    prompt.push_str("  <incoming_messages>\n");
    for msg in incoming_messages {
        prompt.push_str(&format!(
            "    <message role=\"{}\">{}</message>\n",
            msg.role,
            truncate(&msg.content, 500)
        ));
    }
    prompt.push_str("  </incoming_messages>\n");

    prompt.push_str("  <inventory>\n");
    for seg in &inventory.segments {
        let status_str = match seg.status {
            SegmentStatus::Expanded => "expanded",
            SegmentStatus::Folded => "folded",
            SegmentStatus::Evicted => "evicted",
        };
        prompt.push_str(&format!(
            "    <segment id=\"{}\" tag=\"{}\" size=\"{}\" status=\"{}\" relevance=\"{:.2}\"/>\n",
            seg.id, seg.tag, seg.size, status_str, seg.relevance
        ));
    }
    prompt.push_str("  </inventory>\n");

    prompt.push_str(&format!(
        "  <summary expanded=\"{}\" folded=\"{}\" evicted=\"{}\" expanded_bytes=\"{}\" total_bytes=\"{}\"/>\n",
        inventory.expanded_count,
        inventory.folded_count,
        inventory.evicted_count,
        inventory.expanded_bytes,
        inventory.total_bytes
    ));

    prompt.push_str("</CurationRequest>");
    prompt
}

/// Parse a curator's response into fold-in/fold-out/evict directives.
pub fn parse_curation_response(response: &str) -> Result<CurationDecision, String> {
    let fold_in = extract_section(response, "fold_in")
        .map(|s| extract_segment_ids(&s))
        .unwrap_or_default();
    let fold_out = extract_section(response, "fold_out")
        .map(|s| extract_segment_ids(&s))
        .unwrap_or_default();
    let evict = extract_section(response, "evict")
        .map(|s| extract_segment_ids(&s))
        .unwrap_or_default();

    Ok(CurationDecision {
        fold_in,
        fold_out,
        evict,
    })
}

fn extract_section(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml.find(&close)?;
    if start <= end {
        Some(xml[start..end].to_string())
    } else {
        None
    }
}

fn extract_segment_ids(section: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut search_from = 0;
    while let Some(pos) = section[search_from..].find("<segment ") {
        let start = search_from + pos;
        if let Some(end) = section[start..].find("/>") {
            let tag = &section[start..start + end + 2];
            if let Some(id) = extract_attr(tag, "id") {
                ids.push(id);
            }
            search_from = start + end + 2;
        } else {
            break;
        }
    }
    ids
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let pattern = format!("{attr}=\"");
    let start = tag.find(&pattern)? + pattern.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}
