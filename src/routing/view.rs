//! View rendering.
//!
//! Templates are `<name>.html` files loaded once from the views directory.
//! `{{ key }}` placeholders are replaced by HTML-escaped locals.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const BUILTIN_BASE: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{{ title }}</title>
  </head>
  <body>
    <main>
      <h1>{{ title }}</h1>
    </main>
  </body>
</html>
"#;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("view '{0}' not found")]
    NotFound(String),
    #[error("failed to read views: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders named views to HTML.
pub trait ViewRenderer: Send + Sync {
    fn render(&self, name: &str, locals: &Map<String, Value>) -> Result<String, ViewError>;
}

/// Templates loaded from a directory at startup.
#[derive(Debug, Clone)]
pub struct TemplateDir {
    templates: HashMap<String, String>,
}

impl TemplateDir {
    /// Only the built-in `base` view.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert("base".to_string(), BUILTIN_BASE.to_string());
        Self { templates }
    }

    /// Load every `*.html` file of `dir` on top of the built-in views.
    /// A missing directory yields the built-ins only.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ViewError> {
        let dir = dir.as_ref();
        let mut views = Self::builtin();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "Views directory missing, using built-in views");
            return Ok(views);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            views.templates.insert(name.to_string(), fs::read_to_string(&path)?);
        }
        tracing::info!(dir = %dir.display(), count = views.templates.len(), "Views loaded");
        Ok(views)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl ViewRenderer for TemplateDir {
    fn render(&self, name: &str, locals: &Map<String, Value>) -> Result<String, ViewError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ViewError::NotFound(name.to_string()))?;
        Ok(substitute(template, locals))
    }
}

fn substitute(template: &str, locals: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = rest[start + 2..start + len].trim();
        match locals.get(key) {
            Some(Value::String(s)) => out.push_str(&escape_html(s)),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&escape_html(&other.to_string())),
        }
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
