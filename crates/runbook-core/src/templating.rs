// crates/runbook-core/src/templating.rs
// ============================================================================
// Module: Templating
// Description: Resolves `{{ path }}` references against a layered context.
// Purpose: Turn step parameters into concrete values before dispatch (§4.2).
// Dependencies: serde_json, runbook-core::context
// ============================================================================

//! Parsing is hand-rolled and bounded: the grammar (`{{ path | default:
//! value }}`) is small enough that pulling in a regex or template engine
//! would add a dependency for no real benefit, and bounded-input parsing
//! matters here because expressions can originate from an attacker's
//! runbook. A malformed expression (unterminated `{{`) is a
//! [`TemplateError`], never a panic; a *missing* path is not an error —
//! it resolves to `""` and is recorded in `unresolved_paths`.

use serde_json::Map;
use serde_json::Value;

use crate::context::ExecutionContext;

/// Maximum length, in bytes, of a single `{{ ... }}` expression body.
pub const MAX_EXPRESSION_LEN: usize = 2_000;
/// Maximum recursion depth walked into nested objects/arrays.
pub const MAX_NESTING_DEPTH: usize = 32;

/// A problem encountered while resolving templates, distinct from an
/// unresolved path (which is not an error — see module docs).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// A `{{` was never closed by a matching `}}`.
    #[error("unterminated template expression")]
    UnterminatedExpression,
    /// An expression body exceeded [`MAX_EXPRESSION_LEN`].
    #[error("template expression exceeds maximum length")]
    ExpressionTooLong,
    /// The value nested deeper than [`MAX_NESTING_DEPTH`].
    #[error("value nesting exceeds maximum depth")]
    NestingTooDeep,
}

/// Result of resolving templates within a value (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateResolution {
    /// The resolved value. Structurally identical to the input except
    /// for resolved template expressions.
    pub value: Value,
    /// Dotted paths that did not resolve against any context layer,
    /// recorded for step-executor audit entries.
    pub unresolved_paths: Vec<String>,
}

/// Resolves every `{{ path }}` expression within `value` against `ctx`
/// (§4.2). The input is never mutated; a new [`Value`] tree is returned.
///
/// # Errors
///
/// Returns [`TemplateError`] for malformed expressions or values nested
/// beyond [`MAX_NESTING_DEPTH`].
pub fn resolve_templates(
    value: &Value,
    ctx: &ExecutionContext,
) -> Result<TemplateResolution, TemplateError> {
    let mut unresolved = Vec::new();
    let resolved = resolve_value(value, ctx, 0, &mut unresolved)?;
    Ok(TemplateResolution {
        value: resolved,
        unresolved_paths: unresolved,
    })
}

fn resolve_value(
    value: &Value,
    ctx: &ExecutionContext,
    depth: usize,
    unresolved: &mut Vec<String>,
) -> Result<Value, TemplateError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(TemplateError::NestingTooDeep);
    }

    match value {
        Value::String(s) => resolve_string(s, ctx, unresolved),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, ctx, depth + 1, unresolved)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, ctx, depth + 1, unresolved)?);
            }
            Ok(Value::Object(out))
        }
        // Numbers, booleans, and null pass through unchanged (§4.2).
        Value::Number(_) | Value::Bool(_) | Value::Null => Ok(value.clone()),
    }
}

/// A located `{{ ... }}` expression within a source string.
struct Located<'a> {
    /// Byte range in the source string, including the delimiters.
    span: std::ops::Range<usize>,
    /// The trimmed expression body, without delimiters.
    body: &'a str,
}

fn find_expressions(s: &str) -> Result<Vec<Located<'_>>, TemplateError> {
    let mut found = Vec::new();
    let mut search_from = 0usize;
    while let Some(rel_start) = s[search_from..].find("{{") {
        let start = search_from + rel_start;
        let Some(rel_end) = s[start + 2..].find("}}") else {
            return Err(TemplateError::UnterminatedExpression);
        };
        let body_start = start + 2;
        let body_end = body_start + rel_end;
        let end = body_end + 2;
        let body = s[body_start..body_end].trim();
        if body.len() > MAX_EXPRESSION_LEN {
            return Err(TemplateError::ExpressionTooLong);
        }
        found.push(Located {
            span: start..end,
            body,
        });
        search_from = end;
    }
    Ok(found)
}

fn resolve_string(
    s: &str,
    ctx: &ExecutionContext,
    unresolved: &mut Vec<String>,
) -> Result<Value, TemplateError> {
    let expressions = find_expressions(s)?;
    if expressions.is_empty() {
        return Ok(Value::String(s.to_owned()));
    }

    // "If the entire string is a single template expression, the resolver
    // returns the raw value ... rather than the string form" (§4.2).
    if expressions.len() == 1 && expressions[0].span == (0..s.len()) {
        let parsed = parse_expression(expressions[0].body);
        return Ok(resolve_expression(&parsed, ctx, unresolved));
    }

    let mut out = String::with_capacity(s.len());
    let mut cursor = 0usize;
    for expr in &expressions {
        out.push_str(&s[cursor..expr.span.start]);
        let parsed = parse_expression(expr.body);
        let resolved = resolve_expression(&parsed, ctx, unresolved);
        out.push_str(&stringify(&resolved));
        cursor = expr.span.end;
    }
    out.push_str(&s[cursor..]);
    Ok(Value::String(out))
}

/// A parsed `path | default: value` expression.
struct ParsedExpression<'a> {
    path: &'a str,
    default: Option<Value>,
}

fn parse_expression(body: &str) -> ParsedExpression<'_> {
    let Some((path_part, filter_part)) = body.split_once('|') else {
        return ParsedExpression {
            path: body.trim(),
            default: None,
        };
    };

    let path = path_part.trim();
    let filter = filter_part.trim();
    let default = filter
        .strip_prefix("default:")
        .map(str::trim)
        .map(parse_default_literal);

    ParsedExpression { path, default }
}

fn parse_default_literal(raw: &str) -> Value {
    if let Some(inner) = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
    {
        return Value::String(inner.to_owned());
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        bareword => Value::String(bareword.to_owned()),
    }
}

fn resolve_expression(
    expr: &ParsedExpression<'_>,
    ctx: &ExecutionContext,
    unresolved: &mut Vec<String>,
) -> Value {
    match ctx.resolve_path(expr.path) {
        Some(value) => value,
        None => {
            unresolved.push(expr.path.to_owned());
            expr.default.clone().unwrap_or(Value::String(String::new()))
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code, reason = "tests mutate process env to exercise the env fallback")]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx_with_alert(alert: Value) -> ExecutionContext {
        ExecutionContext::new(alert, HashMap::new())
    }

    #[test]
    fn plain_string_without_expressions_is_unchanged() {
        let ctx = ctx_with_alert(json!({}));
        let result = resolve_templates(&json!("plain text"), &ctx).expect("resolve");
        assert_eq!(result.value, json!("plain text"));
        assert!(result.unresolved_paths.is_empty());
    }

    #[test]
    fn whole_string_template_returns_raw_value() {
        let ctx = ctx_with_alert(json!({"event": {"severity": 80}}));
        let result = resolve_templates(&json!("{{ alert.event.severity }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!(80));
    }

    #[test]
    fn whole_string_template_preserves_array_shape() {
        let mut vars = HashMap::new();
        vars.insert("hosts".to_owned(), json!(["a", "b"]));
        let ctx = ExecutionContext::new(json!({}), vars);
        let result = resolve_templates(&json!("{{ context.hosts }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!(["a", "b"]));
    }

    #[test]
    fn embedded_template_is_stringified_in_place() {
        let ctx = ctx_with_alert(json!({"host": {"name": "web-01"}}));
        let result =
            resolve_templates(&json!("host={{ alert.host.name }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!("host=web-01"));
    }

    #[test]
    fn missing_path_resolves_to_empty_string_and_is_recorded() {
        let ctx = ctx_with_alert(json!({}));
        let result = resolve_templates(&json!("{{ alert.nonexistent }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!(""));
        assert_eq!(result.unresolved_paths, vec!["alert.nonexistent".to_owned()]);
    }

    #[test]
    fn default_filter_supplies_quoted_string_fallback() {
        let ctx = ctx_with_alert(json!({}));
        let result =
            resolve_templates(&json!("{{ alert.missing | default: 'unknown' }}"), &ctx)
                .expect("resolve");
        assert_eq!(result.value, json!("unknown"));
    }

    #[test]
    fn default_filter_supplies_numeric_fallback() {
        let ctx = ctx_with_alert(json!({}));
        let result =
            resolve_templates(&json!("{{ alert.missing | default: 5 }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!(5));
    }

    #[test]
    fn default_filter_supplies_bareword_fallback() {
        let ctx = ctx_with_alert(json!({}));
        let result =
            resolve_templates(&json!("{{ alert.missing | default: unknown }}"), &ctx)
                .expect("resolve");
        assert_eq!(result.value, json!("unknown"));
    }

    #[test]
    fn whitespace_inside_braces_is_ignored() {
        let ctx = ctx_with_alert(json!({"event": {"severity": 1}}));
        let result =
            resolve_templates(&json!("{{    alert.event.severity   }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!(1));
    }

    #[test]
    fn recurses_into_objects_and_arrays() {
        let ctx = ctx_with_alert(json!({"host": {"name": "web-01"}}));
        let input = json!({
            "ids": ["{{ alert.host.name }}", "static"],
            "nested": {"value": "{{ alert.host.name }}"},
        });
        let result = resolve_templates(&input, &ctx).expect("resolve");
        assert_eq!(
            result.value,
            json!({"ids": ["web-01", "static"], "nested": {"value": "web-01"}})
        );
    }

    #[test]
    fn numbers_booleans_and_null_pass_through() {
        let ctx = ctx_with_alert(json!({}));
        let input = json!({"n": 1, "b": true, "z": null});
        let result = resolve_templates(&input, &ctx).expect("resolve");
        assert_eq!(result.value, input);
    }

    #[test]
    fn unterminated_expression_is_an_error() {
        let ctx = ctx_with_alert(json!({}));
        let err = resolve_templates(&json!("{{ alert.foo"), &ctx).unwrap_err();
        assert_eq!(err, TemplateError::UnterminatedExpression);
    }

    #[test]
    fn input_value_is_not_mutated() {
        let ctx = ctx_with_alert(json!({"x": 1}));
        let input = json!("{{ alert.x }}");
        let before = input.clone();
        let _ = resolve_templates(&input, &ctx).expect("resolve");
        assert_eq!(input, before);
    }

    #[test]
    fn env_falls_back_to_process_environment() {
        unsafe {
            std::env::set_var("RUNBOOK_TEMPLATE_TEST_VAR", "value-1");
        }
        let ctx = ExecutionContext::new(json!({}), HashMap::new());
        let result =
            resolve_templates(&json!("{{ env.RUNBOOK_TEMPLATE_TEST_VAR }}"), &ctx).expect("resolve");
        assert_eq!(result.value, json!("value-1"));
        unsafe {
            std::env::remove_var("RUNBOOK_TEMPLATE_TEST_VAR");
        }
    }

    proptest::proptest! {
        /// A string containing no `{{` can never introduce a template
        /// expression, so it must always resolve to itself with no
        /// unresolved paths, for any input bytes `find_expressions` sees.
        #[test]
        fn strings_without_braces_round_trip(s in "[^{}]{0,64}") {
            let ctx = ctx_with_alert(json!({}));
            let result = resolve_templates(&json!(s.clone()), &ctx).expect("resolve");
            prop_assert_eq!(result.value, json!(s));
            prop_assert!(result.unresolved_paths.is_empty());
        }
    }
}
