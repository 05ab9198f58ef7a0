use serde_json::{Map, Value};

use super::scope::ContextScope;

/// Substitute `{{path}}` references in a node's configuration against the
/// scope. Strings get text substitution; a string that is exactly one
/// `{{path}}` token resolves to the raw leaf value (possibly a map or
/// list). Maps and lists are resolved recursively. Unknown paths become
/// the empty string in text and `null` for whole-token substitution.
pub fn resolve_value(value: &Value, scope: &ContextScope) -> Value {
    match value {
        Value::String(s) => resolve_string_value(s, scope),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, scope)).collect())
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, scope));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Text-substitute every `{{path}}` occurrence in a template string.
pub fn resolve_str(template: &str, scope: &ContextScope) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let path = after[..close].trim();
                if let Some(value) = scope.lookup(path) {
                    result.push_str(&stringify(&value));
                }
                // Unknown paths substitute as empty string.
                rest = &after[close + 2..];
            }
            None => {
                // Unterminated token: keep literal text.
                result.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

fn resolve_string_value(s: &str, scope: &ContextScope) -> Value {
    if let Some(path) = whole_token(s) {
        return scope.lookup(path).unwrap_or(Value::Null);
    }
    Value::String(resolve_str(s, scope))
}

/// If the whole string is a single `{{path}}` token, return the path.
fn whole_token(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    let path = inner.trim();
    // A second token (`{{a}}{{b}}`) means text substitution, not raw.
    if path.contains("{{") || path.contains("}}") {
        return None;
    }
    Some(path)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::TriggerDescriptor;
    use serde_json::json;

    fn scope() -> ContextScope {
        let mut scope = ContextScope::new(
            json!({"name": "world", "count": 2}),
            TriggerDescriptor::manual(),
        );
        scope.variables.insert("x".to_string(), json!("hi"));
        scope
            .variables
            .insert("items".to_string(), json!([{"title": "a"}, {"title": "b"}]));
        scope
            .node_outputs
            .insert("n1".to_string(), json!({"status": "ok", "code": 200}));
        scope
    }

    #[test]
    fn basic_substitution() {
        let s = scope();
        assert_eq!(resolve_str("Hello {{input.name}}!", &s), "Hello world!");
    }

    #[test]
    fn multiple_and_repeated_tokens() {
        let s = scope();
        assert_eq!(
            resolve_str("{{variables.x}} {{variables.x}} ({{input.count}})", &s),
            "hi hi (2)"
        );
    }

    #[test]
    fn unknown_path_becomes_empty_string() {
        let s = scope();
        assert_eq!(resolve_str("a{{variables.missing}}b", &s), "ab");
    }

    #[test]
    fn unterminated_token_left_intact() {
        let s = scope();
        assert_eq!(resolve_str("broken {{input.name", &s), "broken {{input.name");
    }

    #[test]
    fn whole_token_returns_raw_value() {
        let s = scope();
        let resolved = resolve_value(&json!("{{variables.items}}"), &s);
        assert_eq!(resolved, json!([{"title": "a"}, {"title": "b"}]));

        let resolved = resolve_value(&json!("{{nodes.n1.code}}"), &s);
        assert_eq!(resolved, json!(200));
    }

    #[test]
    fn whole_token_unknown_is_null() {
        let s = scope();
        assert_eq!(resolve_value(&json!("{{nodes.missing}}"), &s), Value::Null);
    }

    #[test]
    fn adjacent_tokens_are_text_substitution() {
        let s = scope();
        let resolved = resolve_value(&json!("{{variables.x}}{{input.count}}"), &s);
        assert_eq!(resolved, json!("hi2"));
    }

    #[test]
    fn nested_config_is_resolved_recursively() {
        let s = scope();
        let config = json!({
            "message": "count={{input.count}}",
            "payload": {"items": "{{variables.items}}"},
            "list": ["{{variables.x}}", 7, true]
        });
        let resolved = resolve_value(&config, &s);
        assert_eq!(resolved["message"], json!("count=2"));
        assert_eq!(resolved["payload"]["items"], json!([{"title": "a"}, {"title": "b"}]));
        assert_eq!(resolved["list"], json!(["hi", 7, true]));
    }

    #[test]
    fn non_string_leaves_pass_through() {
        let s = scope();
        let config = json!({"n": 42, "b": false, "nothing": null});
        assert_eq!(resolve_value(&config, &s), config);
    }

    #[test]
    fn idempotent_on_resolved_values() {
        let s = scope();
        let config = json!({"message": "count={{input.count}}", "raw": "{{variables.items}}"});
        let once = resolve_value(&config, &s);
        let twice = resolve_value(&once, &s);
        assert_eq!(once, twice);
    }

    #[test]
    fn numeric_index_in_template() {
        let s = scope();
        assert_eq!(
            resolve_str("first={{variables.items.0.title}}", &s),
            "first=a"
        );
    }
}
