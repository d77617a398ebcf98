//! Prompt composition (§6): named-block concatenation with `\n` separators,
//! then `{{var}}` template substitution.

use std::collections::BTreeMap;

/// Concatenate `block_names`, in order, looking each up in `blocks`, joined
/// by a single newline, then substitute any `{{var}}` placeholder found in
/// the result using `vars`. Unknown block names are skipped silently —
/// referential integrity of prompt blocks is checked once, at organism
/// validation time, not on every composition.
pub fn compose_prompt(
    blocks: &BTreeMap<String, String>,
    block_names: &[String],
    vars: &BTreeMap<String, String>,
) -> String {
    let body = block_names
        .iter()
        .filter_map(|name| blocks.get(name).map(String::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    substitute(&body, vars)
}

fn substitute(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let var_name = after_open[..end].trim();
                        if let Some(value) = vars.get(var_name) {
                            out.push_str(value);
                        }
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("identity".into(), "You are {{name}}.".into());
        m.insert("tools".into(), "Tools: file-read, file-write.".into());
        m
    }

    #[test]
    fn concatenates_named_blocks_in_order() {
        let mut vars = BTreeMap::new();
        vars.insert("name".into(), "Conduit".into());
        let composed = compose_prompt(
            &blocks(),
            &["identity".to_string(), "tools".to_string()],
            &vars,
        );
        assert_eq!(composed, "You are Conduit.\nTools: file-read, file-write.");
    }

    #[test]
    fn missing_var_leaves_placeholder_empty() {
        let composed = compose_prompt(&blocks(), &["identity".to_string()], &BTreeMap::new());
        assert_eq!(composed, "You are .");
    }

    #[test]
    fn unknown_block_name_is_skipped() {
        let composed = compose_prompt(
            &blocks(),
            &["identity".to_string(), "ghost".to_string()],
            &BTreeMap::from([("name".to_string(), "X".to_string())]),
        );
        assert_eq!(composed, "You are X.");
    }
}
