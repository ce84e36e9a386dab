//! Input sanitization.
//!
//! Two independent stages run over the parsed body and the query map:
//! - [`OperatorKeyFilter`] removes keys that could change a downstream
//!   query's structure (`$`-prefixed operators and dotted paths)
//! - [`MarkupEscaper`] neutralises markup by escaping `<` in every string
//!
//! Both walk nested objects and arrays, never fail, and are idempotent.
//! When escaping turns one key into another that is already present, the
//! entry that came first in the document wins.

use serde_json::map::Entry;
use serde_json::{Map, Value};

use crate::pipeline::{Flow, RequestContext, Stage, StageFuture};

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Remove operator keys from `value`, recursively.
pub fn strip_operator_keys(value: &mut Value) {
    match value {
        Value::Object(map) => strip_operator_keys_in_map(map),
        Value::Array(items) => items.iter_mut().for_each(strip_operator_keys),
        _ => {}
    }
}

pub fn strip_operator_keys_in_map(map: &mut Map<String, Value>) {
    let before = map.len();
    map.retain(|key, _| !is_operator_key(key));
    if map.len() != before {
        tracing::debug!(removed = before - map.len(), "Operator keys removed");
    }
    map.values_mut().for_each(strip_operator_keys);
}

fn escape_str(s: &str) -> String {
    s.replace('<', "&lt;")
}

/// Escape markup in every string of `value`, keys included.
pub fn escape_markup(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains('<') {
                *s = escape_str(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(escape_markup),
        Value::Object(map) => escape_markup_in_map(map),
        _ => {}
    }
}

pub fn escape_markup_in_map(map: &mut Map<String, Value>) {
    if map.keys().any(|k| k.contains('<')) {
        let entries = std::mem::take(map);
        for (key, value) in entries {
            let key = if key.contains('<') { escape_str(&key) } else { key };
            match map.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(slot) => {
                    tracing::warn!(key = %slot.key(), "Escaped key collides, later entry dropped");
                }
            }
        }
    }
    map.values_mut().for_each(escape_markup);
}

/// Query-injection neutralisation stage.
#[derive(Debug, Clone, Default)]
pub struct OperatorKeyFilter;

impl Stage for OperatorKeyFilter {
    fn name(&self) -> &'static str {
        "operator_key_filter"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            if let Some(body) = ctx.body.as_mut() {
                strip_operator_keys(body);
            }
            strip_operator_keys_in_map(&mut ctx.query);
            Ok(Flow::Continue)
        })
    }
}

/// Markup neutralisation stage.
#[derive(Debug, Clone, Default)]
pub struct MarkupEscaper;

impl Stage for MarkupEscaper {
    fn name(&self) -> &'static str {
        "markup_escaper"
    }

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        Box::pin(async move {
            if let Some(body) = ctx.body.as_mut() {
                escape_markup(body);
            }
            escape_markup_in_map(&mut ctx.query);
            Ok(Flow::Continue)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::forwarded::ProxyTrust;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "$where": "sleep(1000)",
            "name": "<script>alert(1)</script>",
            "profile.admin": true,
            "nested": {
                "$gt": "",
                "tags": ["ok", "<b>", {"$ne": 1, "<k>": "v"}],
                "deep": {"deeper": {"$or": [], "keep": "x<y"}}
            },
            "count": 3
        })
    }

    #[test]
    fn test_strip_operator_keys() {
        let mut value = sample();
        strip_operator_keys(&mut value);

        assert!(value.get("$where").is_none());
        assert!(value.get("profile.admin").is_none());
        assert!(value["nested"].get("$gt").is_none());
        assert!(value["nested"]["tags"][2].get("$ne").is_none());
        assert!(value["nested"]["deep"]["deeper"].get("$or").is_none());
        assert_eq!(value["nested"]["deep"]["deeper"]["keep"], "x<y");
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_escape_markup() {
        let mut value = sample();
        escape_markup(&mut value);

        assert_eq!(value["name"], "&lt;script>alert(1)&lt;/script>");
        assert_eq!(value["nested"]["tags"][1], "&lt;b>");
        assert_eq!(value["nested"]["tags"][2]["&lt;k>"], "v");
        assert_eq!(value["nested"]["deep"]["deeper"]["keep"], "x&lt;y");
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_both_are_idempotent() {
        let inputs = vec![
            sample(),
            json!("<<<"),
            json!([["<a>", {"$x": {"$y": "<"}}], null, 1.5]),
            json!({"a.b": {"c.d": "<"}, "&lt;": "<"}),
        ];
        for input in inputs {
            let mut once = input.clone();
            strip_operator_keys(&mut once);
            let mut twice = once.clone();
            strip_operator_keys(&mut twice);
            assert_eq!(once, twice);

            let mut once = input.clone();
            escape_markup(&mut once);
            let mut twice = once.clone();
            escape_markup(&mut twice);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_escaped_key_collision_keeps_first() {
        let mut value = json!({"<a": 1, "&lt;a": 2, "b": 3});
        escape_markup(&mut value);
        assert_eq!(value, json!({"&lt;a": 1, "b": 3}));

        let mut value = json!({"&lt;a": 2, "<a": 1});
        escape_markup(&mut value);
        assert_eq!(value, json!({"&lt;a": 2}));

        let mut again = value.clone();
        escape_markup(&mut again);
        assert_eq!(again, value);
    }

    #[test]
    fn test_escape_keeps_key_order() {
        let mut value = json!({"z": 1, "<m>": 2, "a": 3});
        escape_markup(&mut value);
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "&lt;m>", "a"]);
    }

    #[tokio::test]
    async fn test_stages_cover_query() {
        let req = Request::builder()
            .uri("/api/v1/user?%24where=1&name=%3Cb%3E")
            .body(Body::empty())
            .unwrap();
        let mut ctx = RequestContext::from_request(req, None, &ProxyTrust::new(false));
        ctx.body = Some(json!({"$where": "x", "bio": "<i>"}));

        OperatorKeyFilter.on_request(&mut ctx).await.unwrap();
        MarkupEscaper.on_request(&mut ctx).await.unwrap();

        assert!(ctx.query.get("$where").is_none());
        assert_eq!(ctx.query["name"], "&lt;b>");
        assert_eq!(ctx.body, Some(json!({"bio": "&lt;i>"})));
    }
}
