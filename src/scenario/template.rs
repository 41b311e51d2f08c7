//! Placeholder substitution for URL paths and JSON bodies.
//!
//! Placeholders are `{name}`; `{{` and `}}` produce literal braces.
//!
//! | placeholder          | value                                        |
//! |----------------------|----------------------------------------------|
//! | `{key}`              | the work item key                            |
//! | `{key_lower}`        | the key, lowercased                          |
//! | `{now}` / `{now_ms}` | unix time in seconds / milliseconds          |
//! | `{uuid}`             | a fresh v4 UUID                              |
//! | `{payload.a.b}`      | field of the item payload                    |
//! | `{stage.a.0}`        | field of an earlier step's response          |

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::WorkItem;

use super::PriorResults;

/// Inputs available to placeholders while rendering one step.
pub struct Context<'a> {
    pub item: &'a WorkItem,
    pub prior: &'a PriorResults,
    pub now: DateTime<Utc>,
}

impl<'a> Context<'a> {
    pub fn new(item: &'a WorkItem, prior: &'a PriorResults) -> Self {
        Self {
            item,
            prior,
            now: Utc::now(),
        }
    }

    fn resolve(&self, expr: &str) -> Result<Value> {
        match expr {
            "key" => Ok(Value::String(self.item.key.clone())),
            "key_lower" => Ok(Value::String(self.item.key.to_lowercase())),
            "now" => Ok(Value::from(self.now.timestamp())),
            "now_ms" => Ok(Value::from(self.now.timestamp_millis())),
            "uuid" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            _ => {
                let (root, path) = expr.split_once('.').unwrap_or((expr, ""));
                let base = if root == "payload" {
                    self.item.payload.as_ref()
                } else {
                    self.prior.get(root)
                };
                let base = base.ok_or_else(|| {
                    Error::Template(format!("unknown placeholder {{{expr}}}"))
                })?;
                lookup(base, path)
                    .cloned()
                    .ok_or_else(|| Error::Template(format!("{{{expr}}} not found")))
            }
        }
    }
}

fn lookup<'v>(value: &'v Value, dotted: &str) -> Option<&'v Value> {
    if dotted.is_empty() {
        return Some(value);
    }
    let pointer = format!("/{}", dotted.replace('.', "/"));
    value.pointer(&pointer)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// If `s` is exactly one placeholder, return its expression.
fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(['{', '}']) {
        None
    } else {
        Some(inner)
    }
}

/// Render a string, replacing every placeholder with its text form.
pub fn render_str(template: &str, ctx: &Context<'_>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let rest = &template[i + 1..];
                let end = rest.find('}').ok_or_else(|| {
                    Error::Template(format!("unclosed placeholder in {template:?}"))
                })?;
                let expr = &rest[..end];
                out.push_str(&as_text(&ctx.resolve(expr)?));
                let close = i + 1 + end;
                while chars.next().is_some_and(|(j, _)| j < close) {}
            }
            '}' => {
                return Err(Error::Template(format!("stray '}}' in {template:?}")));
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Render a JSON template. A string holding a single placeholder keeps the
/// JSON type of the substituted value.
pub fn render_value(template: &Value, ctx: &Context<'_>) -> Result<Value> {
    match template {
        Value::String(s) => match sole_placeholder(s) {
            Some(expr) => ctx.resolve(expr),
            None => render_str(s, ctx).map(Value::String),
        },
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(v, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
