//! Entry sources handed to the bundler.
//!
//! Every entry imports React, the extra imports (layout stylesheet, layout
//! component, renderer), then the root component as `App`, and ends with one
//! render statement. Props are not part of the entry: the compiled output
//! reads a free `props` variable declared at render time.

use std::path::Path;

use minijinja::{Environment, context};
use serde::Deserialize;

use crate::config::SpaMode;

const ENTRY_TEMPLATE: &str = r#"
import React from "react";
{% for line in imports %}{{ line }} {% endfor %}
import App from "{{ path }}";
{% if suppress_console %}console.log = () => {};{% endif %}
{{ render }}"#;

const SERVER_RENDER: &str = "renderToString(<App {...props} />);";
const SERVER_RENDER_WITH_LAYOUT: &str = "renderToString(<Layout><App {...props} /></Layout>);";
const CLIENT_RENDER: &str = r#"hydrateRoot(document.getElementById("root"), <App {...props} />);"#;
const CLIENT_RENDER_WITH_LAYOUT: &str =
    r#"hydrateRoot(document.getElementById("root"), <Layout><App {...props} /></Layout>);"#;

// The result goes through globalThis so minification cannot rename it.
const SERVER_SPA_ROUTER_RENDER: &str = "try { globalThis.__ssr_result = renderToString(<StaticRouter location={props.__requestPath}><App {...props} /></StaticRouter>); } catch(e) { globalThis.__ssr_errors.push('RENDER_ERROR: ' + (e.stack || e.message || String(e))); globalThis.__ssr_result = ''; }";

const CLIENT_SPA_ROUTER_RENDER: &str = r#"
const ssrPropsEl = document.getElementById("__SSR_PROPS__");
const ssrProps = ssrPropsEl ? JSON.parse(ssrPropsEl.textContent || "{}") : {};
hydrateRoot(document.getElementById("root"), <BrowserRouter><App {...ssrProps} /></BrowserRouter>);"#;

const CLIENT_SPA_REPLACE_RENDER: &str = r#"
const root = document.getElementById("root");
root.innerHTML = "";
createRoot(root).render(<App />);"#;

const DEFAULT_ROUTER_MAJOR: u32 = 6;

fn render_entry(
    imports: &[String],
    path: &str,
    render: &str,
    suppress_console: bool,
) -> Result<String, minijinja::Error> {
    Environment::new().render_str(
        ENTRY_TEMPLATE,
        context! {
            imports => imports,
            path => path,
            render => render,
            suppress_console => suppress_console,
        },
    )
}

fn with_import(imports: &[String], extra: &[&str]) -> Vec<String> {
    imports
        .iter()
        .cloned()
        .chain(extra.iter().map(|line| line.to_string()))
        .collect()
}

/// Imports shared by every route entry: the built layout stylesheet and the
/// layout component, when configured.
pub fn entry_imports(layout_css: Option<&str>, layout: Option<&str>) -> Vec<String> {
    let mut imports = Vec::new();
    if let Some(css) = layout_css {
        imports.push(format!(r#"import "{}";"#, css));
    }
    if let Some(layout) = layout {
        imports.push(format!(r#"import Layout from "{}";"#, layout));
    }
    imports
}

/// Server entry rendering `path` to a string. Console output is silenced.
pub fn server_contents(
    imports: &[String],
    path: &str,
    use_layout: bool,
) -> Result<String, minijinja::Error> {
    let imports = with_import(
        imports,
        &[r#"import { renderToString } from "react-dom/server.browser";"#],
    );
    let render = if use_layout {
        SERVER_RENDER_WITH_LAYOUT
    } else {
        SERVER_RENDER
    };
    render_entry(&imports, path, render, true)
}

/// Client entry hydrating the `#root` element.
pub fn client_contents(
    imports: &[String],
    path: &str,
    use_layout: bool,
) -> Result<String, minijinja::Error> {
    let imports = with_import(
        imports,
        &[r#"import { hydrateRoot } from "react-dom/client";"#],
    );
    let render = if use_layout {
        CLIENT_RENDER_WITH_LAYOUT
    } else {
        CLIENT_RENDER
    };
    render_entry(&imports, path, render, false)
}

/// Server entry for a single-page app.
///
/// Router mode renders inside a `StaticRouter` at `props.__requestPath`.
/// Replace mode has no server entry, so `None` is returned.
pub fn server_spa_contents(
    imports: &[String],
    app_path: &str,
    mode: SpaMode,
    frontend_dir: &Path,
) -> Result<Option<String>, minijinja::Error> {
    match mode {
        SpaMode::Router => {
            let static_router = if react_router_major_version(frontend_dir) >= 7 {
                r#"import { StaticRouter } from "react-router";"#
            } else {
                r#"import { StaticRouter } from "react-router-dom/server";"#
            };
            let imports = with_import(
                imports,
                &[
                    r#"import { renderToString } from "react-dom/server.browser";"#,
                    static_router,
                ],
            );
            render_entry(&imports, app_path, SERVER_SPA_ROUTER_RENDER, true).map(Some)
        }
        SpaMode::Replace => Ok(None),
    }
}

/// Client entry for a single-page app.
pub fn client_spa_contents(
    imports: &[String],
    app_path: &str,
    mode: SpaMode,
) -> Result<String, minijinja::Error> {
    match mode {
        SpaMode::Router => {
            let imports = with_import(
                imports,
                &[
                    r#"import { hydrateRoot } from "react-dom/client";"#,
                    r#"import { BrowserRouter } from "react-router-dom";"#,
                ],
            );
            render_entry(&imports, app_path, CLIENT_SPA_ROUTER_RENDER, false)
        }
        SpaMode::Replace => {
            let imports = with_import(
                imports,
                &[r#"import { createRoot } from "react-dom/client";"#],
            );
            render_entry(&imports, app_path, CLIENT_SPA_REPLACE_RENDER, false)
        }
    }
}

#[derive(Deserialize)]
struct PackageJson {
    #[serde(default)]
    dependencies: std::collections::HashMap<String, String>,
}

/// Major version of `react-router-dom` declared in `package.json`.
///
/// Looks in `frontend_dir`, then its parent. Defaults to 6 when the file or
/// the dependency is missing or unparsable.
pub fn react_router_major_version(frontend_dir: &Path) -> u32 {
    let candidates = [
        Some(frontend_dir.join("package.json")),
        frontend_dir.parent().map(|parent| parent.join("package.json")),
    ];
    let Some(data) = candidates
        .into_iter()
        .flatten()
        .find_map(|path| std::fs::read_to_string(path).ok())
    else {
        return DEFAULT_ROUTER_MAJOR;
    };

    let Ok(package) = serde_json::from_str::<PackageJson>(&data) else {
        return DEFAULT_ROUTER_MAJOR;
    };

    package
        .dependencies
        .get("react-router-dom")
        .and_then(|version| {
            version
                .trim_start_matches(['^', '~'])
                .split('.')
                .next()?
                .parse()
                .ok()
        })
        .unwrap_or(DEFAULT_ROUTER_MAJOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_server_contents() {
        let imports = entry_imports(Some("/app/.kiln/layout.css"), None);
        let contents = server_contents(&imports, "/app/pages/home.tsx", false).unwrap();

        assert!(contents.contains(r#"import React from "react";"#));
        assert!(contents.contains(r#"import "/app/.kiln/layout.css";"#));
        assert!(contents.contains(r#"from "react-dom/server.browser";"#));
        assert!(contents.contains(r#"import App from "/app/pages/home.tsx";"#));
        assert!(contents.contains("console.log = () => {};"));
        assert!(contents.trim_end().ends_with("renderToString(<App {...props} />);"));
    }

    #[test]
    fn test_client_contents_with_layout() {
        let imports = entry_imports(None, Some("/app/Layout.tsx"));
        let contents = client_contents(&imports, "/app/pages/home.tsx", true).unwrap();

        assert!(contents.contains(r#"import Layout from "/app/Layout.tsx";"#));
        assert!(contents.contains("<Layout><App {...props} /></Layout>"));
        assert!(contents.contains("hydrateRoot"));
        assert!(!contents.contains("console.log"));
    }

    #[test]
    fn test_path_is_not_escaped() {
        let contents = client_contents(&[], "/app/pages/<odd>&.tsx", false).unwrap();
        assert!(contents.contains(r#""/app/pages/<odd>&.tsx""#));
    }

    #[test]
    fn test_spa_router_contents() {
        let temp = TempDir::new().unwrap();
        let server = server_spa_contents(&[], "/app/App.tsx", SpaMode::Router, temp.path())
            .unwrap()
            .unwrap();
        assert!(server.contains(r#"from "react-router-dom/server";"#));
        assert!(server.contains("location={props.__requestPath}"));
        assert!(server.contains("globalThis.__ssr_result"));

        let client = client_spa_contents(&[], "/app/App.tsx", SpaMode::Router).unwrap();
        assert!(client.contains("__SSR_PROPS__"));
        assert!(client.contains("<BrowserRouter>"));
    }

    #[test]
    fn test_spa_replace_contents() {
        let temp = TempDir::new().unwrap();
        assert!(
            server_spa_contents(&[], "/app/App.tsx", SpaMode::Replace, temp.path())
                .unwrap()
                .is_none()
        );

        let client = client_spa_contents(&[], "/app/App.tsx", SpaMode::Replace).unwrap();
        assert!(client.contains(r#"root.innerHTML = "";"#));
        assert!(client.contains("createRoot(root).render(<App />);"));
    }

    #[test]
    fn test_router_version_from_parent_package() {
        let temp = TempDir::new().unwrap();
        let frontend = temp.path().join("src");
        fs::create_dir(&frontend).unwrap();
        assert_eq!(react_router_major_version(&frontend), 6);

        fs::write(
            temp.path().join("package.json"),
            r#"{"dependencies":{"react-router-dom":"^7.1.0"}}"#,
        )
        .unwrap();
        assert_eq!(react_router_major_version(&frontend), 7);

        let server = server_spa_contents(&[], "/app/App.tsx", SpaMode::Router, &frontend)
            .unwrap()
            .unwrap();
        assert!(server.contains(r#"import { StaticRouter } from "react-router";"#));
    }

    #[test]
    fn test_router_version_unparsable() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("package.json"),
            r#"{"dependencies":{"react-router-dom":"latest"}}"#,
        )
        .unwrap();
        assert_eq!(react_router_major_version(temp.path()), 6);
    }
}
