//! Default `{{path}}` binding resolver.
//!
//! A string that is exactly one `{{expr}}` resolves to the referenced value
//! with its JSON type preserved. Otherwise every `{{expr}}` inside the string
//! is replaced inline. `{{t:key}}` is looked up through the translator.
//! Placeholders that reference absent paths are left untouched.

use serde_json::Value;

use crate::collab::{BindingResolver, Translator};
use crate::path;

const TRANSLATE_PREFIX: &str = "t:";

/// Resolver for `{{dotted.path}}` templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateBindingResolver;

impl BindingResolver for TemplateBindingResolver {
    fn resolve(&self, expr: &Value, scope: &Value, translate: &dyn Translator) -> Value {
        resolve_value(expr, scope, translate)
    }
}

fn resolve_value(expr: &Value, scope: &Value, translate: &dyn Translator) -> Value {
    match expr {
        Value::String(s) => resolve_string(s, scope, translate),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, scope, translate)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, scope, translate))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, scope: &Value, translate: &dyn Translator) -> Value {
    let trimmed = s.trim();

    if trimmed.starts_with("{{") && trimmed.ends_with("}}") && count_patterns(trimmed) == 1 {
        let expr = &trimmed[2..trimmed.len() - 2];
        return lookup(expr, scope, translate).unwrap_or_else(|| Value::String(s.to_owned()));
    }

    if !s.contains("{{") {
        return Value::String(s.to_owned());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let placeholder = &rest[start..start + end + 2];
        let expr = &rest[start + 2..start + end];
        match lookup(expr, scope, translate) {
            Some(value) => out.push_str(&inline(&value)),
            None => out.push_str(placeholder),
        }
        rest = &rest[start + end + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn lookup(expr: &str, scope: &Value, translate: &dyn Translator) -> Option<Value> {
    let expr = expr.trim();
    if let Some(key) = expr.strip_prefix(TRANSLATE_PREFIX) {
        return translate.translate(key.trim()).map(Value::String);
    }
    if expr.is_empty() {
        return None;
    }
    path::get(scope, expr).cloned()
}

fn count_patterns(s: &str) -> usize {
    let mut count = 0;
    let mut pos = 0;
    while let Some(start) = s[pos..].find("{{") {
        if let Some(end) = s[pos + start..].find("}}") {
            count += 1;
            pos = pos + start + end + 2;
        } else {
            break;
        }
    }
    count
}

fn inline(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a string still carries a `{{...}}` placeholder.
pub fn has_placeholder(s: &str) -> bool {
    count_patterns(s) > 0
}
