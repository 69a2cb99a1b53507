//! Redis-backed build cache shared across server instances.
//!
//! Key layout under the configured prefix `{p}`:
//!
//! | key               | type   | contents                               |
//! |-------------------|--------|----------------------------------------|
//! | `{p}server:{path}` | string | JSON [`BuildArtifact`]                 |
//! | `{p}client:{path}` | string | JSON [`BuildArtifact`]                 |
//! | `{p}routes`        | hash   | route id -> root file                  |
//! | `{p}deps:{path}`   | string | JSON array of the root's dependencies  |
//! | `{p}revdeps:{dep}` | set    | roots whose last build read `dep`      |
//!
//! The TTL applies to build keys only.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use crate::artifact::{BuildArtifact, BuildKind};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::BuildCache;

/// Cursor batch size for SCAN and HSCAN.
const SCAN_COUNT: usize = 100;

/// Replaces a root's dependency list and rewrites its reverse entries.
///
/// KEYS[1] forward key. ARGV: root, encoded list, reverse key prefix, then
/// each dependency. Reverse keys are derived inside the script, so the whole
/// prefix must live on one node.
///
/// Graph keys never expire: the old forward list is the only record of which
/// reverse sets name this root, and it has to outlive every one of them.
const SET_DEPENDENCIES_LUA: &str = r#"
local old = redis.call('GET', KEYS[1])
if old then
  for _, dep in ipairs(cjson.decode(old)) do
    redis.call('SREM', ARGV[3] .. dep, ARGV[1])
  end
end
redis.call('SET', KEYS[1], ARGV[2])
for i = 4, #ARGV do
  redis.call('SADD', ARGV[3] .. ARGV[i], ARGV[1])
end
return 1
"#;

/// Escape `SCAN MATCH` glob metacharacters so `text` matches literally.
fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build cache stored in Redis.
///
/// Cloning is cheap; clones share one multiplexed connection that reconnects
/// on its own after a dropped link.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
    set_dependencies: Script,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect and verify the server answers `PING` within the connect timeout.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            CacheError::InvalidConfig("redis backend requires a connection url".to_string())
        })?;
        let client = redis::Client::open(url)?;

        let timeout = config.connect_timeout();
        let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Unavailable(format!("connect timed out after {:?}", timeout)))??;

        let _: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| CacheError::Unavailable(format!("ping timed out after {:?}", timeout)))??;

        let prefix = if config.prefix.is_empty() {
            CacheConfig::default().prefix
        } else {
            config.prefix.clone()
        };
        info!(prefix = %prefix, "connected to redis build cache");

        Ok(Self {
            conn,
            prefix,
            ttl_secs: config.ttl().map(|d| d.as_secs()).unwrap_or(0),
            set_dependencies: Script::new(SET_DEPENDENCIES_LUA),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn build_key(&self, kind: BuildKind, path: &str) -> String {
        format!("{}{}:{}", self.prefix, kind.as_str(), path)
    }

    fn routes_key(&self) -> String {
        format!("{}routes", self.prefix)
    }

    fn deps_key(&self, path: &str) -> String {
        format!("{}deps:{}", self.prefix, path)
    }

    fn revdeps_prefix(&self) -> String {
        format!("{}revdeps:", self.prefix)
    }

    /// Drop both builds of `path` with a single `DEL`.
    pub async fn invalidate(&self, path: &str) -> Result<()> {
        let keys = [
            self.build_key(BuildKind::Server, path),
            self.build_key(BuildKind::Client, path),
        ];
        let mut conn = self.conn.clone();
        let _: () = conn.del(&keys[..]).await?;
        Ok(())
    }

    /// Number of keys under this cache's prefix.
    pub async fn key_count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.scan_prefixed(|keys| {
            count += keys.len() as u64;
            async { Ok(()) }
        })
        .await?;
        Ok(count)
    }

    /// Walk every key under the prefix in `SCAN` batches.
    async fn scan_prefixed<F, Fut>(&self, mut on_batch: F) -> Result<()>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let pattern = format!("{}*", escape_glob(&self.prefix));
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                on_batch(keys).await?;
            }
            cursor = next;
            if cursor == 0 {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl BuildCache for RedisCache {
    async fn get_build(&self, kind: BuildKind, path: &str) -> Result<Option<BuildArtifact>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(self.build_key(kind, path)).await?;
        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_build(&self, kind: BuildKind, path: &str, artifact: BuildArtifact) -> Result<()> {
        let data = serde_json::to_vec(&artifact)?;
        let key = self.build_key(kind, path);
        let mut conn = self.conn.clone();
        if self.ttl_secs > 0 {
            let _: () = conn.set_ex(key, data, self.ttl_secs).await?;
        } else {
            let _: () = conn.set(key, data).await?;
        }
        Ok(())
    }

    async fn remove_build(&self, kind: BuildKind, path: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.build_key(kind, path)).await?;
        Ok(())
    }

    async fn set_parent_file(&self, route_id: &str, path: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(self.routes_key(), route_id, path).await?;
        Ok(())
    }

    async fn route_ids_for_file(&self, path: &str) -> Result<Vec<String>> {
        let key = self.routes_key();
        let mut conn = self.conn.clone();
        let mut ids = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, pairs): (u64, HashMap<String, String>) = redis::cmd("HSCAN")
                .arg(&key)
                .arg(cursor)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            ids.extend(
                pairs
                    .into_iter()
                    .filter(|(_, file)| file == path)
                    .map(|(id, _)| id),
            );
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn all_route_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.hkeys(self.routes_key()).await?;
        ids.sort();
        Ok(ids)
    }

    async fn set_dependencies(&self, path: &str, dependencies: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(dependencies)?;
        let mut invocation = self.set_dependencies.key(self.deps_key(path));
        invocation
            .arg(path)
            .arg(encoded)
            .arg(self.revdeps_prefix());
        for dep in dependencies {
            invocation.arg(dep);
        }

        let mut conn = self.conn.clone();
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        debug!(root = %path, count = dependencies.len(), "stored dependency edges");
        Ok(())
    }

    async fn parent_files(&self, dependency: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut parents: Vec<String> = conn
            .smembers(format!("{}{}", self.revdeps_prefix(), dependency))
            .await?;
        parents.sort();
        Ok(parents)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.clone();
        self.scan_prefixed(|keys| {
            let mut conn = conn.clone();
            async move {
                let _: () = conn.del(keys).await?;
                Ok(())
            }
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
