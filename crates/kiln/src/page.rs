//! HTML documents around rendered routes.

use std::collections::BTreeMap;

use minijinja::{Environment, context};

use crate::route::escape_html_in_json;

const DOCUMENT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{ title }}</title>
{% for name, content in meta_tags|items %}<meta name="{{ name }}" content="{{ content }}">
{% endfor %}<style>{{ css|safe }}</style>
</head>
<body>
<div id="root">{{ markup|safe }}</div>
<script id="__SSR_PROPS__" type="application/json">{{ props_json|safe }}</script>
{% if script_src %}<script src="{{ script_src }}"></script>{% else %}<script>{{ script|safe }}</script>{% endif %}
{% include "reload.html" %}
</body>
</html>
"#;

const ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Render error</title>
<style>body{font-family:sans-serif;margin:2rem}pre{background:#fee;padding:1rem;white-space:pre-wrap}</style>
</head>
<body>
<main data-route="{{ route_id }}">
<h1>Failed to render route</h1>
<pre>{{ message }}</pre>
</main>
{% include "reload.html" %}
</body>
</html>
"#;

const RELOAD_TEMPLATE: &str = r#"{% if reload_port %}<script>
const socket = new WebSocket("ws://" + location.hostname + ":{{ reload_port }}/ws");
socket.addEventListener("open", () => socket.send({{ route_id|tojson }}));
socket.addEventListener("message", (event) => { if (event.data === "reload") location.reload(); });
</script>{% endif %}"#;

/// Inputs of a rendered document.
#[derive(Debug, Clone, Default)]
pub struct PageParams<'a> {
    pub title: &'a str,
    pub meta_tags: Option<&'a BTreeMap<String, String>>,
    pub route_id: &'a str,
    pub markup: &'a str,
    pub stylesheet: &'a str,
    /// Inline client script, used when `script_src` is unset.
    pub script: &'a str,
    /// URL of an external client script.
    pub script_src: Option<&'a str>,
    pub props_json: &'a str,
    /// Pages connect to the reload server on this port when set.
    pub reload_port: Option<u16>,
}

fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("document.html", DOCUMENT_TEMPLATE)?;
    env.add_template("error.html", ERROR_TEMPLATE)?;
    env.add_template("reload.html", RELOAD_TEMPLATE)?;
    Ok(env)
}

/// Keep embedded text from closing its element early.
fn escape_close_tag(text: &str, tag: &str) -> String {
    let needle = format!("</{}", tag);
    if !text.to_ascii_lowercase().contains(&needle) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + 8);
    let mut rest = text;
    while let Some(pos) = rest.to_ascii_lowercase().find(&needle) {
        out.push_str(&rest[..pos]);
        out.push_str("<\\/");
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// Render the full document for a route.
pub fn render_document(params: &PageParams<'_>) -> Result<String, minijinja::Error> {
    let empty = BTreeMap::new();
    let env = environment()?;
    env.get_template("document.html")?.render(context! {
        title => params.title,
        meta_tags => params.meta_tags.unwrap_or(&empty),
        route_id => params.route_id,
        markup => params.markup,
        css => escape_close_tag(params.stylesheet, "style"),
        script => escape_close_tag(params.script, "script"),
        script_src => params.script_src,
        props_json => escape_html_in_json(params.props_json),
        reload_port => params.reload_port,
    })
}

/// Render the error page for a failed route. Never fails: a template problem
/// degrades to a bare message.
pub fn render_error(message: &str, route_id: &str, reload_port: Option<u16>) -> String {
    let rendered = environment().and_then(|env| {
        env.get_template("error.html")?.render(context! {
            message => message,
            route_id => route_id,
            reload_port => reload_port,
        })
    });

    rendered.unwrap_or_else(|_| {
        let escaped = message
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let route_id: String = route_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!(
            "<!DOCTYPE html><html><body><main data-route=\"{}\"><pre>{}</pre></main></body></html>",
            route_id, escaped
        )
    })
}
