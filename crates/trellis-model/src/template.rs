//! Minimal `{{expr}}` substitution.
//!
//! This is a security-sensitive boundary: model text is user
//! controlled, so the evaluator is restricted to identifier lookup with
//! an optional literal fallback (`{{name}}`, `{{name|fallback}}`).
//! There is no scripting engine behind it. A placeholder whose
//! identifier is undefined and has no fallback is left untouched in the
//! output.

use serde_json::Value;
use std::collections::BTreeMap;

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate one placeholder body. `None` means "leave untouched".
fn evaluate(body: &str, vars: &BTreeMap<String, Value>) -> Option<String> {
    let (ident, fallback) = match body.split_once('|') {
        Some((ident, fallback)) => (ident.trim(), Some(fallback.trim())),
        None => (body.trim(), None),
    };

    if !is_identifier(ident) {
        return None;
    }
    if let Some(value) = vars.get(ident) {
        return Some(render(value));
    }
    fallback.map(|raw| raw.trim_matches('"').trim_matches('\'').to_string())
}

/// Substitute every `{{expr}}` placeholder in `input`,
/// expression-by-expression.
pub fn substitute(input: &str, vars: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let body = &after_open[..close];
                match evaluate(body, vars) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("{{");
                        out.push_str(body);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated placeholder, emit verbatim.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Substitute placeholders in every string leaf of a JSON tree.
pub fn substitute_tree(value: &mut Value, vars: &BTreeMap<String, Value>) {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                *s = substitute(s, vars);
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_tree(item, vars);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_tree(item, vars);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> BTreeMap<String, Value> {
        [
            ("region".to_string(), json!("eu-west")),
            ("replicas".to_string(), json!(3)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn substitutes_known_identifiers() {
        assert_eq!(
            substitute("img-{{region}}:{{replicas}}", &vars()),
            "img-eu-west:3"
        );
    }

    #[test]
    fn unknown_identifier_is_left_untouched() {
        assert_eq!(substitute("host-{{zone}}", &vars()), "host-{{zone}}");
    }

    #[test]
    fn fallback_applies_only_when_undefined() {
        assert_eq!(substitute("{{zone|us-east}}", &vars()), "us-east");
        assert_eq!(substitute("{{region|us-east}}", &vars()), "eu-west");
        assert_eq!(substitute("{{zone|\"us-east\"}}", &vars()), "us-east");
    }

    #[test]
    fn non_identifier_expressions_are_not_evaluated() {
        assert_eq!(
            substitute("{{1 + 2}} and {{a b}}", &vars()),
            "{{1 + 2}} and {{a b}}"
        );
    }

    #[test]
    fn tree_substitution_touches_string_leaves_only() {
        let mut doc = json!({
            "runtime": "docker-{{region}}",
            "nested": {"list": ["{{replicas}}", 7]}
        });
        substitute_tree(&mut doc, &vars());
        assert_eq!(doc["runtime"], "docker-eu-west");
        assert_eq!(doc["nested"]["list"][0], "3");
        assert_eq!(doc["nested"]["list"][1], 7);
    }
}
