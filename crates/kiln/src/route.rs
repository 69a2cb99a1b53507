//! Route identity and per-request payloads.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Key under which the request path is exposed to router-mode apps.
pub const REQUEST_PATH_PROP: &str = "__requestPath";

/// Stable identifier of the route rendered from `path`.
///
/// First 8 bytes of the SHA-256 of the path, hex-encoded (16 characters).
pub fn route_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

/// Serialize props to the JSON payload injected into builds.
///
/// Absent props become `null`. With a request path, object props (or absent
/// props) gain a `__requestPath` entry.
///
/// The payload is embedded in inline `<script>` elements, so `<`, `>` and `&`
/// are written as `\u003c`, `\u003e` and `\u0026`. The JSON decodes to the
/// same value.
pub fn props_to_json(props: Option<&Value>, request_path: Option<&str>) -> serde_json::Result<String> {
    let Some(request_path) = request_path else {
        return match props {
            Some(props) => script_safe_json(props),
            None => Ok("null".to_string()),
        };
    };

    let mut props = match props {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => return script_safe_json(other),
        None => serde_json::Map::new(),
    };
    props.insert(
        REQUEST_PATH_PROP.to_string(),
        Value::String(request_path.to_string()),
    );
    script_safe_json(&props)
}

fn script_safe_json(value: &impl serde::Serialize) -> serde_json::Result<String> {
    serde_json::to_string(value).map(|json| escape_html_in_json(&json))
}

/// Rewrite the HTML-significant characters of serialized JSON as unicode
/// escapes. They can only occur inside string literals.
pub fn escape_html_in_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            c => out.push(c),
        }
    }
    out
}

/// Prefix compiled code with the props declaration it reads.
pub fn inject_props(props_json: &str, code: &str) -> String {
    format!("var props = {}; {}", props_json, code)
}

/// One render request.
#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    /// Root component file. Relative paths resolve against `frontend_dir`.
    pub file: PathBuf,
    pub title: String,
    /// `name -> content` pairs rendered as `<meta>` tags.
    pub meta_tags: BTreeMap<String, String>,
    pub props: Option<Value>,
    /// Request path handed to single-page apps in router mode.
    pub request_path: Option<String>,
}

impl RenderConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }

    pub fn with_meta(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.meta_tags.insert(name.into(), content.into());
        self
    }

    pub fn with_request_path(mut self, path: impl Into<String>) -> Self {
        self.request_path = Some(path.into());
        self
    }
}

/// Output of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRoute {
    pub route_id: String,
    /// Server markup placed inside the root element.
    pub markup: String,
    pub stylesheet: String,
    /// Client script. Props are injected unless a shared SPA bundle was used.
    pub script: String,
    /// The payload, also embedded in the page as a JSON data element.
    pub props_json: String,
}
