//! Compiling entry sources into cached build artifacts.
//!
//! [`Bundler`] is the seam between rendering and the JavaScript toolchain.
//! [`EsbuildBundler`] drives the `esbuild` CLI: the entry is piped over stdin,
//! output and metafile land in a scratch directory, and the metafile inputs
//! become the artifact's dependency list.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kiln_cache::{BuildArtifact, BuildKind};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::config::slash_path;
use crate::error::BuildError;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Asset types inlined into bundles as data URLs.
const DATAURL_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

/// One compilation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Entry source (see [`crate::contents`]).
    pub contents: String,
    /// Directory imports in `contents` resolve against.
    pub base_dir: PathBuf,
    /// Public path for emitted asset URLs.
    pub asset_route: String,
    pub kind: BuildKind,
    pub production: bool,
}

/// Compiles entry sources.
///
/// A failed build returns an error and produces nothing to cache.
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn build(&self, request: BuildRequest) -> Result<BuildArtifact, BuildError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Deserialize)]
struct Metafile {
    #[serde(default)]
    inputs: BTreeMap<String, serde::de::IgnoredAny>,
}

/// [`Bundler`] backed by the `esbuild` executable.
#[derive(Debug)]
pub struct EsbuildBundler {
    program: String,
    work_dir: PathBuf,
    timeout_secs: u64,
    counter: AtomicU64,
}

impl EsbuildBundler {
    /// `program` is the esbuild executable, `work_dir` holds per-build scratch
    /// directories.
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn args(&self, request: &BuildRequest, out_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--bundle".to_string(),
            "--loader=tsx".to_string(),
            "--sourcefile=entry.tsx".to_string(),
            "--platform=browser".to_string(),
            format!("--resolve-dir={}", request.base_dir.display()),
            format!("--outfile={}", out_dir.join("out.js").display()),
            format!("--metafile={}", out_dir.join("meta.json").display()),
            format!("--public-path={}", request.asset_route),
        ];

        let node_env = if request.production {
            "production"
        } else {
            "development"
        };
        args.push(format!(r#"--define:process.env.NODE_ENV="{}""#, node_env));

        for ext in DATAURL_EXTENSIONS {
            args.push(format!("--loader:{}=dataurl", ext));
        }

        match request.kind {
            BuildKind::Server => args.push("--format=esm".to_string()),
            BuildKind::Client => {
                args.push("--format=iife".to_string());
                if request.production {
                    args.push("--minify".to_string());
                }
            }
        }
        args
    }

    async fn run(&self, request: &BuildRequest, out_dir: &Path) -> Result<BuildArtifact, BuildError> {
        let mut child = Command::new(&self.program)
            .args(self.args(request, out_dir))
            .current_dir(&request.base_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BuildError::BundlerNotFound {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            BuildError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Failed to capture bundler stdin",
            ))
        })?;
        stdin.write_all(request.contents.as_bytes()).await?;
        drop(stdin);

        let output = timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| BuildError::Timeout {
            tool: "esbuild",
            secs: self.timeout_secs,
        })??;

        if !output.status.success() {
            return Err(BuildError::Failed {
                tool: "esbuild",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let js_path = out_dir.join("out.js");
        let code = tokio::fs::read_to_string(&js_path)
            .await
            .map_err(|_| BuildError::MissingOutput(js_path))?;

        // Only present when the entry imported CSS.
        let stylesheet = tokio::fs::read_to_string(out_dir.join("out.css"))
            .await
            .unwrap_or_default();

        let metafile = tokio::fs::read_to_string(out_dir.join("meta.json")).await?;
        let dependencies = dependencies_from_metafile(&metafile, &request.base_dir)?;

        Ok(BuildArtifact::new(code, stylesheet).with_dependencies(dependencies))
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn build(&self, request: BuildRequest) -> Result<BuildArtifact, BuildError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let out_dir = self
            .work_dir
            .join(format!("build-{}-{}", std::process::id(), n));
        tokio::fs::create_dir_all(&out_dir).await?;

        let result = self.run(&request, &out_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&out_dir).await {
            warn!(path = %out_dir.display(), error = %e, "Failed to remove build scratch directory");
        }

        if let Ok(artifact) = &result {
            debug!(
                kind = %request.kind,
                bytes = artifact.code.len(),
                dependencies = artifact.dependencies.len(),
                "esbuild finished"
            );
        }
        result
    }

    fn name(&self) -> &'static str {
        "esbuild"
    }
}

/// Absolute source files read by a build, from an esbuild metafile.
///
/// Metafile input paths are relative to the working directory. Virtual
/// inputs such as `<stdin>` and anything under `node_modules` are skipped.
pub fn dependencies_from_metafile(metafile: &str, base_dir: &Path) -> Result<Vec<String>, BuildError> {
    let metafile: Metafile = serde_json::from_str(metafile)?;

    let mut dependencies: Vec<String> = metafile
        .inputs
        .keys()
        .filter(|input| !input.starts_with('<') && !input.contains("node_modules"))
        .map(|input| {
            let path = base_dir.join(input);
            let path = std::fs::canonicalize(&path).unwrap_or(path);
            slash_path(&path)
        })
        .collect();
    dependencies.sort();
    dependencies.dedup();
    Ok(dependencies)
}

/// Compile the layout stylesheet with the Tailwind CLI into `output`.
pub async fn compile_tailwind(
    program: &str,
    config: &Path,
    input: &Path,
    output: &Path,
    cwd: &Path,
    minify: bool,
) -> Result<(), BuildError> {
    let mut cmd = Command::new(program);
    cmd.arg("--config")
        .arg(config)
        .arg("-i")
        .arg(input)
        .arg("-o")
        .arg(output);
    if minify {
        cmd.arg("--minify");
    }
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| BuildError::BundlerNotFound {
        program: program.to_string(),
        source,
    })?;

    let output_result = timeout(
        Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| BuildError::Timeout {
        tool: "tailwindcss",
        secs: DEFAULT_TIMEOUT_SECS,
    })??;

    if !output_result.status.success() {
        return Err(BuildError::Failed {
            tool: "tailwindcss",
            message: String::from_utf8_lossy(&output_result.stderr).trim().to_string(),
        });
    }
    if !output.exists() {
        return Err(BuildError::MissingOutput(output.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn request(kind: BuildKind, production: bool) -> BuildRequest {
        BuildRequest {
            contents: String::new(),
            base_dir: PathBuf::from("/app/frontend"),
            asset_route: "/assets".to_string(),
            kind,
            production,
        }
    }

    #[test]
    fn test_server_args() {
        let bundler = EsbuildBundler::new("esbuild", "/tmp/kiln");
        let args = bundler.args(&request(BuildKind::Server, true), Path::new("/tmp/kiln/b"));

        assert!(args.contains(&"--format=esm".to_string()));
        assert!(!args.contains(&"--minify".to_string()));
        assert!(args.contains(&"--resolve-dir=/app/frontend".to_string()));
        assert!(args.contains(&r#"--define:process.env.NODE_ENV="production""#.to_string()));
    }

    #[test]
    fn test_client_args_minify_in_production() {
        let bundler = EsbuildBundler::new("esbuild", "/tmp/kiln");
        let out = Path::new("/tmp/kiln/b");

        let args = bundler.args(&request(BuildKind::Client, true), out);
        assert!(args.contains(&"--format=iife".to_string()));
        assert!(args.contains(&"--minify".to_string()));

        let args = bundler.args(&request(BuildKind::Client, false), out);
        assert!(!args.contains(&"--minify".to_string()));
        assert!(args.contains(&r#"--define:process.env.NODE_ENV="development""#.to_string()));
    }

    #[test]
    fn test_dependencies_from_metafile() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("pages")).unwrap();
        fs::write(temp.path().join("pages/home.tsx"), "").unwrap();
        fs::write(temp.path().join("Nav.tsx"), "").unwrap();

        let metafile = r#"{
            "inputs": {
                "<stdin>": {"bytes": 10},
                "pages/home.tsx": {"bytes": 20},
                "Nav.tsx": {"bytes": 30},
                "node_modules/react/index.js": {"bytes": 40}
            },
            "outputs": {}
        }"#;

        let deps = dependencies_from_metafile(metafile, temp.path()).unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        assert_eq!(
            deps,
            vec![
                slash_path(&root.join("Nav.tsx")),
                slash_path(&root.join("pages/home.tsx")),
            ]
        );
    }

    #[test]
    fn test_invalid_metafile() {
        let err = dependencies_from_metafile("not json", Path::new("/")).unwrap_err();
        assert!(matches!(err, BuildError::Metafile(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let temp = TempDir::new().unwrap();
        let bundler = EsbuildBundler::new("kiln-no-such-esbuild", temp.path());
        let mut req = request(BuildKind::Client, false);
        req.base_dir = temp.path().to_path_buf();

        let err = bundler.build(req).await.unwrap_err();
        assert!(matches!(err, BuildError::BundlerNotFound { .. }));
        // Scratch directories are cleaned up on failure too.
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_build_is_killed() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("finished");
        let program = temp.path().join("slow-esbuild");
        fs::write(
            &program,
            format!("#!/bin/sh\nsleep 3\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let scratch = TempDir::new().unwrap();
        let bundler =
            EsbuildBundler::new(program.to_string_lossy(), scratch.path()).with_timeout(1);
        let mut req = request(BuildKind::Server, false);
        req.base_dir = temp.path().to_path_buf();

        let err = bundler.build(req).await.unwrap_err();
        assert!(matches!(err, BuildError::Timeout { tool: "esbuild", secs: 1 }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }
}
