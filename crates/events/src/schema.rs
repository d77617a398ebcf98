//! Schema validator interface (§6).
//!
//! The core treats schemas as opaque handles. The concrete format (XSD, JSON
//! Schema, or — as here — a plain root-tag check against XML) is a
//! configuration choice, but it MUST be deterministic and version-pinned.

/// Why a payload failed validation against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Validates payload bytes against a named schema handle.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema_ref: &str, bytes: &[u8]) -> Result<(), Violation>;
}

/// Reference validator: the schema handle names the expected XML root tag.
///
/// This is the fabric's concrete, deterministic, version-pinned default —
/// it never needs a version bump because "does the root element match" has
/// exactly one meaning. Production deployments swap in an XSD or JSON Schema
/// validator behind the same trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlTagSchemaValidator;

impl SchemaValidator for XmlTagSchemaValidator {
    fn validate(&self, schema_ref: &str, bytes: &[u8]) -> Result<(), Violation> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Violation::new("$", format!("payload is not valid UTF-8: {e}")))?;
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Err(Violation::new("$", "empty payload"));
        }
        if !trimmed.starts_with('<') {
            return Err(Violation::new("$", "payload does not start with '<'"));
        }

        let open = format!("<{schema_ref}");
        let close = format!("</{schema_ref}>");
        let self_closing = format!("<{schema_ref}/>");

        if trimmed == self_closing || (trimmed.starts_with(&open) && trimmed.ends_with(&close)) {
            Ok(())
        } else if trimmed.starts_with(&open) && trimmed.ends_with("/>") {
            Ok(())
        } else {
            let actual_end = trimmed.find(['>', ' ']).unwrap_or(trimmed.len());
            let actual = trimmed.get(1..actual_end).unwrap_or("?");
            Err(Violation::new(
                "$",
                format!("expected root tag <{schema_ref}>, found <{actual}>"),
            ))
        }
    }
}
