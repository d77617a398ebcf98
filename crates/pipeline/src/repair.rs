//! Optional Repair stage (§9's third Open Question, resolved): Repair, when
//! configured, applies only to inbound payloads at stage 2, never to
//! handler outputs at stage 6 — preserving zero-trust re-entry.

/// A best-effort, idempotent transform attempted on a payload that failed
/// schema validation, before the violation is finally reported. Repair
/// MUST NOT change payload semantics — it exists for cosmetic issues
/// (stray whitespace, encoding quirks), not to coerce invalid data into
/// validity.
pub trait Repairer: Send + Sync {
    /// Attempt to repair `payload` against `schema_ref`. Returns `Some`
    /// with the repaired bytes if a repair was applied, `None` if the
    /// repairer has nothing to offer for this payload.
    fn repair(&self, schema_ref: &str, payload: &[u8]) -> Option<Vec<u8>>;
}

/// A repairer that strips leading/trailing whitespace — the only
/// transform guaranteed not to touch payload semantics for an XML-tagged
/// wire format.
pub struct WhitespaceTrimRepairer;

impl Repairer for WhitespaceTrimRepairer {
    fn repair(&self, _schema_ref: &str, payload: &[u8]) -> Option<Vec<u8>> {
        let trimmed = std::str::from_utf8(payload).ok()?.trim();
        let original = std::str::from_utf8(payload).ok()?;
        if trimmed.len() == original.len() {
            None
        } else {
            Some(trimmed.as_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let repairer = WhitespaceTrimRepairer;
        let repaired = repairer.repair("Tag", b"  <Tag/>  \n").unwrap();
        assert_eq!(repaired, b"<Tag/>");
    }

    #[test]
    fn no_op_when_already_clean() {
        let repairer = WhitespaceTrimRepairer;
        assert!(repairer.repair("Tag", b"<Tag/>").is_none());
    }
}
