//! Expression resolution over JSON-like value trees.
//!
//! String leaves carrying `{{ path }}` expressions are substituted
//! with values looked up from the execution context. A string that is
//! exactly one expression keeps the resolved value's native type; an
//! expression embedded in a larger string is stringified and spliced.
//! Paths that do not resolve leave the original text unchanged, so
//! resolution never fails on author typos. The only error case is
//! pathological nesting depth.

use crate::context::{ExecutionContext, Path};
use crate::error::ExpressionError;
use serde_json::Value as JsonValue;

/// Default recursion depth limit for value trees.
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Resolves every expression leaf in `value` against `context`.
///
/// Mappings and sequences are recursed into (keys untouched);
/// non-string scalars pass through unchanged. Deterministic for a
/// fixed `(value, context)` pair; no side effects.
///
/// # Errors
///
/// Returns [`ExpressionError::DepthExceeded`] when the tree nests
/// deeper than `max_depth`.
pub fn resolve(
    value: &JsonValue,
    context: &ExecutionContext,
    max_depth: usize,
) -> Result<JsonValue, ExpressionError> {
    resolve_at(value, context, max_depth, 0)
}

fn resolve_at(
    value: &JsonValue,
    context: &ExecutionContext,
    max_depth: usize,
    depth: usize,
) -> Result<JsonValue, ExpressionError> {
    if depth >= max_depth {
        return Err(ExpressionError::DepthExceeded { max_depth });
    }

    match value {
        JsonValue::String(s) => Ok(resolve_string(s, context)),
        JsonValue::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_at(item, context, max_depth, depth + 1)?);
            }
            Ok(JsonValue::Array(resolved))
        }
        JsonValue::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_at(item, context, max_depth, depth + 1)?);
            }
            Ok(JsonValue::Object(resolved))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn resolve_string(s: &str, context: &ExecutionContext) -> JsonValue {
    let trimmed = s.trim();

    // A string that is exactly one expression resolves type-preserving.
    if let Some(inner) = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        && !inner.contains("{{")
        && !inner.contains("}}")
    {
        if let Some(path) = Path::parse(inner)
            && let Some(value) = context.resolve_path(&path)
        {
            return value;
        }
        return JsonValue::String(s.to_string());
    }

    if !s.contains("{{") {
        return JsonValue::String(s.to_string());
    }

    // Embedded expressions stringify and splice; unresolvable ones are
    // left verbatim.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        let inner = &rest[start + 2..start + 2 + end];
        let raw = &rest[start..start + 2 + end + 2];

        out.push_str(&rest[..start]);
        match Path::parse(inner).and_then(|p| context.resolve_path(&p)) {
            Some(value) => out.push_str(&stringify(&value)),
            None => out.push_str(raw),
        }
        rest = &rest[start + 2 + end + 2..];
    }
    out.push_str(rest);
    JsonValue::String(out)
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepSnapshot;
    use serde_json::json;

    fn sample_context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(json!({
            "doc": {"id": 7, "title": "Hello", "published": true},
        }));
        ctx.record_step("fetch", StepSnapshot::succeeded(json!({"id": 7, "count": 3})));
        ctx
    }

    #[test]
    fn whole_string_keeps_native_type() {
        let ctx = sample_context();
        let value = json!({"ref": "{{ steps.fetch.output.id }}"});
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, json!({"ref": 7}));
    }

    #[test]
    fn embedded_expression_splices_as_text() {
        let ctx = sample_context();
        let value = json!("post {{ trigger.doc.id }}: {{ trigger.doc.title }}");
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, json!("post 7: Hello"));
    }

    #[test]
    fn non_string_splice_uses_json_text() {
        let ctx = sample_context();
        let value = json!("published={{ trigger.doc.published }}!");
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, json!("published=true!"));
    }

    #[test]
    fn unresolved_path_left_unchanged() {
        let ctx = sample_context();
        let value = json!({"ref": "{{ steps.missing.output.id }}"});
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, value);

        // Round-trip: resolving an already-resolved value is stable.
        let again = resolve(&resolved, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(again, resolved);
    }

    #[test]
    fn unanchored_text_is_literal() {
        let ctx = sample_context();
        let value = json!({"a": "{{ not a path }}", "b": "plain", "c": "{{doc.id}}"});
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, value);
    }

    #[test]
    fn idempotent_on_expression_free_values() {
        let ctx = sample_context();
        let value = json!({
            "n": 42,
            "nested": {"list": [1, "two", null], "flag": false},
        });
        assert_eq!(resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap(), value);
    }

    #[test]
    fn recurses_into_arrays_and_objects() {
        let ctx = sample_context();
        let value = json!({
            "refs": ["{{ trigger.doc.id }}", {"inner": "{{ steps.fetch.output.count }}"}],
        });
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, json!({"refs": [7, {"inner": 3}]}));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let ctx = sample_context();
        let mut value = json!("leaf");
        for _ in 0..60 {
            value = json!([value]);
        }
        let err = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::DepthExceeded {
                max_depth: DEFAULT_MAX_DEPTH
            }
        );
    }

    #[test]
    fn multiple_embedded_with_unresolved_tail() {
        let ctx = sample_context();
        let value = json!("{{ trigger.doc.id }}-{{ steps.gone.output.x }}");
        let resolved = resolve(&value, &ctx, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(resolved, json!("7-{{ steps.gone.output.x }}"));
    }
}
