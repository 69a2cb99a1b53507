//! Cached build artifacts and the two kinds of build.

use serde::{Deserialize, Serialize};

/// Which side of a render a build is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// Executed in a script engine to produce markup.
    Server,
    /// Shipped to the browser for hydration.
    Client,
}

impl BuildKind {
    /// Both kinds, server first.
    pub const ALL: [BuildKind; 2] = [BuildKind::Server, BuildKind::Client];

    /// Lowercase name, also used as the networked key segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::Server => "server",
            BuildKind::Client => "client",
        }
    }
}

impl std::fmt::Display for BuildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiled build of one source file for one [`BuildKind`].
///
/// Artifacts are replaced wholesale on rebuild and never patched in place.
/// The compiled code is stored without props so that a single cached build
/// serves every request for the route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Compiled script text.
    #[serde(rename = "js")]
    pub code: String,

    /// Stylesheet text extracted during the build.
    #[serde(rename = "css", default)]
    pub stylesheet: String,

    /// Files the build read, as reported by the bundler.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl BuildArtifact {
    pub fn new(code: impl Into<String>, stylesheet: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stylesheet: stylesheet.into(),
            dependencies: Vec::new(),
        }
    }

    /// Attach the dependency list reported by the bundler.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_kind_display() {
        assert_eq!(BuildKind::Server.to_string(), "server");
        assert_eq!(BuildKind::Client.to_string(), "client");
    }

    #[test]
    fn test_artifact_json_field_names() {
        let artifact = BuildArtifact::new("render()", "body{}").with_dependencies(["/a.tsx"]);
        let json = serde_json::to_value(&artifact).unwrap();

        assert_eq!(json["js"], "render()");
        assert_eq!(json["css"], "body{}");
        assert_eq!(json["dependencies"][0], "/a.tsx");
    }

    #[test]
    fn test_artifact_missing_optional_fields() {
        let artifact: BuildArtifact = serde_json::from_str(r#"{"js":"x"}"#).unwrap();
        assert_eq!(artifact.code, "x");
        assert!(artifact.stylesheet.is_empty());
        assert!(artifact.dependencies.is_empty());
    }
}
