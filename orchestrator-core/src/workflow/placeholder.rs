//! Placeholder evaluator: `{{ context.x }}` / `{{ outputs.step.path }}`.
//!
//! Pure and lazy — resolution only touches the fields a template actually
//! references, and the same `(context, outputs, template)` triple always
//! yields the same payload (§8 round-trip law). Hand-rolled rather than a
//! general templating crate, per the design notes: the placeholder syntax
//! is a closed, tiny grammar and does not need a Handlebars-class engine.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::OrchestratorError;

fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn resolve_placeholder(
    expr: &str,
    context: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value, OrchestratorError> {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix("context.") {
        lookup_path(context, rest)
            .cloned()
            .ok_or_else(|| OrchestratorError::TemplateError(format!("unresolved placeholder context.{rest}")))
    } else if let Some(rest) = expr.strip_prefix("outputs.") {
        let mut parts = rest.splitn(2, '.');
        let step_id = parts.next().unwrap_or_default();
        let step_output = outputs
            .get(step_id)
            .ok_or_else(|| OrchestratorError::TemplateError(format!("unresolved placeholder outputs.{rest}")))?;
        match parts.next() {
            Some(path) => lookup_path(step_output, path)
                .cloned()
                .ok_or_else(|| OrchestratorError::TemplateError(format!("unresolved placeholder outputs.{rest}"))),
            None => Ok(step_output.clone()),
        }
    } else {
        Err(OrchestratorError::TemplateError(format!(
            "unknown placeholder root: {expr}"
        )))
    }
}

/// Renders a full `{{ ... }}` expression embedded in a string. If the whole
/// string is exactly one placeholder, the resolved value's native JSON type
/// is preserved (so `"{{ context.pr_number }}"` can resolve to a number);
/// otherwise the resolved value is interpolated as text.
fn render_string(
    s: &str,
    context: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value, OrchestratorError> {
    let trimmed = s.trim();
    if let Some(expr) = trimmed.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
        if trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.matches("{{").count() == 1 {
            return resolve_placeholder(expr, context, outputs);
        }
    }

    let mut result = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after_start = &rest[start + 2..];
        let end = after_start.find("}}").ok_or_else(|| {
            OrchestratorError::TemplateError(format!("unterminated placeholder in {s}"))
        })?;
        let expr = &after_start[..end];
        let resolved = resolve_placeholder(expr, context, outputs)?;
        match resolved {
            Value::String(text) => result.push_str(&text),
            other => result.push_str(&other.to_string()),
        }
        rest = &after_start[end + 2..];
    }
    result.push_str(rest);
    Ok(Value::String(result))
}

/// Recursively renders every string leaf of `payload` against
/// `context`/`outputs`. Non-string leaves pass through unchanged.
pub fn render(
    payload: &Value,
    context: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value, OrchestratorError> {
    match payload {
        Value::String(s) => render_string(s, context, outputs),
        Value::Array(items) => {
            let rendered: Result<Vec<Value>, OrchestratorError> =
                items.iter().map(|v| render(v, context, outputs)).collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render(v, context, outputs)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_string_placeholder_preserves_native_type() {
        let context = serde_json::json!({"pr_number": 123});
        let outputs = HashMap::new();
        let rendered = render(&serde_json::json!("{{ context.pr_number }}"), &context, &outputs).unwrap();
        assert_eq!(rendered, serde_json::json!(123));
    }

    #[test]
    fn embedded_placeholder_interpolates_as_text() {
        let context = serde_json::json!({"branch": "feature/x"});
        let outputs = HashMap::new();
        let rendered = render(
            &serde_json::json!("deploying branch {{ context.branch }} now"),
            &context,
            &outputs,
        )
        .unwrap();
        assert_eq!(rendered, serde_json::json!("deploying branch feature/x now"));
    }

    #[test]
    fn outputs_placeholder_resolves_nested_path() {
        let context = serde_json::json!({});
        let mut outputs = HashMap::new();
        outputs.insert("run_tests".to_string(), serde_json::json!({"passed": 10, "total": 10}));
        let rendered = render(&serde_json::json!("{{ outputs.run_tests.passed }}"), &context, &outputs).unwrap();
        assert_eq!(rendered, serde_json::json!(10));
    }

    #[test]
    fn unresolved_placeholder_is_template_error() {
        let context = serde_json::json!({});
        let outputs = HashMap::new();
        let err = render(&serde_json::json!("{{ context.missing }}"), &context, &outputs).unwrap_err();
        assert!(matches!(err, OrchestratorError::TemplateError(_)));
    }

    #[test]
    fn rendering_is_pure_given_same_inputs() {
        let context = serde_json::json!({"branch": "main"});
        let outputs = HashMap::new();
        let payload = serde_json::json!({"msg": "on {{ context.branch }}"});
        let a = render(&payload, &context, &outputs).unwrap();
        let b = render(&payload, &context, &outputs).unwrap();
        assert_eq!(a, b);
    }
}
