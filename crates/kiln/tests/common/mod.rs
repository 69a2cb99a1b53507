//! Shared fixtures: a frontend directory on disk and a bundler that emits
//! plain scripts instead of invoking esbuild.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kiln::{
    BuildArtifact, BuildCache, BuildError, BuildKind, BuildRequest, Bundler, EnginePool, Kiln,
    KilnConfig, LocalCache, PoolConfig,
};
use kiln_cache::CacheError;
use kiln_runtime::BoaEngineFactory;
use tempfile::TempDir;

/// Builds server code that renders `<main id='{stem}'>{props.name}</main>`
/// and client code that echoes its props.
#[derive(Default)]
pub struct FakeBundler {
    builds: AtomicUsize,
    server_builds: AtomicUsize,
    client_builds: AtomicUsize,
    fail_server: AtomicBool,
    fail_client: AtomicBool,
    dependencies: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeBundler {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn builds_of(&self, kind: BuildKind) -> usize {
        match kind {
            BuildKind::Server => self.server_builds.load(Ordering::SeqCst),
            BuildKind::Client => self.client_builds.load(Ordering::SeqCst),
        }
    }

    pub fn fail_server(&self, fail: bool) {
        self.fail_server.store(fail, Ordering::SeqCst);
    }

    pub fn fail_client(&self, fail: bool) {
        self.fail_client.store(fail, Ordering::SeqCst);
    }

    /// Files reported as read when building `root`, besides `root` itself.
    pub fn set_imports(&self, root: &str, imports: &[&str]) {
        let mut deps: Vec<String> = imports.iter().map(|s| s.to_string()).collect();
        deps.push(root.to_string());
        self.dependencies
            .lock()
            .unwrap()
            .insert(root.to_string(), deps);
    }
}

/// Path in `import App from "..."`.
fn app_path(contents: &str) -> Option<&str> {
    let start = contents.find(r#"import App from ""#)? + r#"import App from ""#.len();
    let end = contents[start..].find('"')?;
    Some(&contents[start..start + end])
}

#[async_trait]
impl Bundler for FakeBundler {
    async fn build(&self, request: BuildRequest) -> Result<BuildArtifact, BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);

        let Some(path) = app_path(&request.contents) else {
            // Stylesheet-only entry.
            return Ok(BuildArtifact::new("", "body{margin:0}"));
        };

        match request.kind {
            BuildKind::Server => self.server_builds.fetch_add(1, Ordering::SeqCst),
            BuildKind::Client => self.client_builds.fetch_add(1, Ordering::SeqCst),
        };

        if request.kind == BuildKind::Server && self.fail_server.load(Ordering::SeqCst) {
            return Err(BuildError::Failed {
                tool: "fake",
                message: format!("cannot resolve import in {}", path),
            });
        }
        if request.kind == BuildKind::Client && self.fail_client.load(Ordering::SeqCst) {
            return Err(BuildError::Failed {
                tool: "fake",
                message: format!("unexpected token in {}", path),
            });
        }

        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("app")
            .to_string();
        let code = match request.kind {
            BuildKind::Server => format!(
                r#""<main id='{}'>" + ((props && props.name) || "anon") + "</main>""#,
                stem
            ),
            BuildKind::Client => "hydrate(props);".to_string(),
        };
        let dependencies = self
            .dependencies
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| vec![path.to_string()]);

        Ok(BuildArtifact::new(code, format!("#{}{{}}", stem)).with_dependencies(dependencies))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Cache whose backend rejects every command.
#[derive(Default)]
pub struct FailingCache;

fn rejected<T>() -> kiln_cache::Result<T> {
    Err(CacheError::Backend("connection reset by peer".to_string()))
}

#[async_trait]
impl BuildCache for FailingCache {
    async fn get_build(&self, _: BuildKind, _: &str) -> kiln_cache::Result<Option<BuildArtifact>> {
        rejected()
    }

    async fn set_build(&self, _: BuildKind, _: &str, _: BuildArtifact) -> kiln_cache::Result<()> {
        rejected()
    }

    async fn remove_build(&self, _: BuildKind, _: &str) -> kiln_cache::Result<()> {
        rejected()
    }

    async fn set_parent_file(&self, _: &str, _: &str) -> kiln_cache::Result<()> {
        rejected()
    }

    async fn route_ids_for_file(&self, _: &str) -> kiln_cache::Result<Vec<String>> {
        rejected()
    }

    async fn all_route_ids(&self) -> kiln_cache::Result<Vec<String>> {
        rejected()
    }

    async fn set_dependencies(&self, _: &str, _: &[String]) -> kiln_cache::Result<()> {
        rejected()
    }

    async fn parent_files(&self, _: &str) -> kiln_cache::Result<Vec<String>> {
        rejected()
    }

    async fn clear(&self) -> kiln_cache::Result<()> {
        rejected()
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub kiln: Kiln,
    pub bundler: Arc<FakeBundler>,
    pub cache: Arc<LocalCache>,
}

impl Fixture {
    /// Absolute path of a fixture file, as the cache keys it.
    pub fn path(&self, relative: &str) -> String {
        self.kiln.resolve_file(Path::new(relative))
    }
}

/// Frontend with `pages/a.tsx`, `pages/c.tsx`, `components/b.tsx`,
/// `Layout.tsx`, `global.css` and `App.tsx`.
pub fn frontend() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("pages")).unwrap();
    fs::create_dir_all(dir.path().join("components")).unwrap();
    for file in [
        "pages/a.tsx",
        "pages/c.tsx",
        "components/b.tsx",
        "Layout.tsx",
        "App.tsx",
    ] {
        fs::write(dir.path().join(file), "export default () => null;").unwrap();
    }
    fs::write(dir.path().join("global.css"), "body{}").unwrap();
    dir
}

/// Renderer over `dir` with a fake bundler and the given cache.
pub async fn kiln_with_cache(
    dir: &TempDir,
    cache: Arc<dyn BuildCache>,
    configure: impl FnOnce(&mut KilnConfig),
) -> (Kiln, Arc<FakeBundler>) {
    let mut config = KilnConfig::new(dir.path());
    config.pool_size = 2;
    configure(&mut config);

    let bundler = Arc::new(FakeBundler::default());
    let pool = EnginePool::new(BoaEngineFactory::new(), PoolConfig::with_capacity(2)).unwrap();

    let kiln = Kiln::with_parts(config, cache, pool, bundler.clone() as Arc<dyn Bundler>)
        .await
        .unwrap();
    (kiln, bundler)
}

pub async fn fixture_with(dir: TempDir, configure: impl FnOnce(&mut KilnConfig)) -> Fixture {
    let cache = Arc::new(LocalCache::new());
    let (kiln, bundler) =
        kiln_with_cache(&dir, cache.clone() as Arc<dyn BuildCache>, configure).await;

    Fixture {
        dir,
        kiln,
        bundler,
        cache,
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(frontend(), |_| {}).await
}

/// Wait for the background dependency write-back of a render.
pub async fn wait_for_parents(cache: &dyn BuildCache, dependency: &str) -> Vec<String> {
    for _ in 0..200 {
        let parents = cache.parent_files(dependency).await.unwrap();
        if !parents.is_empty() {
            return parents;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no dependents recorded for {}", dependency);
}
