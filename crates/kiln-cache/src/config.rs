//! Cache backend selection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which store backs the build cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process maps, private to one server instance.
    #[default]
    Local,
    /// Redis, shared by every instance pointing at the same server and prefix.
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "memory" | "" => Ok(CacheBackend::Local),
            "redis" => Ok(CacheBackend::Redis),
            other => Err(format!("Invalid cache backend: {}", other)),
        }
    }
}

/// Build cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Connection URL for the networked backend, e.g. `redis://:secret@cache:6379/2`.
    /// `rediss://` selects TLS and needs the `tls` feature.
    #[serde(default)]
    pub url: Option<String>,

    /// Namespace prepended to every networked key.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Expiry applied to networked build entries. `None` or zero keeps them
    /// forever. Route and dependency records never expire.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// How long to wait for the initial connection check.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Local,
            url: None,
            prefix: default_prefix(),
            ttl_secs: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl CacheConfig {
    /// Local in-process cache.
    pub fn local() -> Self {
        Self::default()
    }

    /// Redis cache at `url` with the default prefix.
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            backend: CacheBackend::Redis,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_prefix() -> String {
    "kiln:".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("local".parse::<CacheBackend>().unwrap(), CacheBackend::Local);
        assert_eq!("".parse::<CacheBackend>().unwrap(), CacheBackend::Local);
        assert_eq!("REDIS".parse::<CacheBackend>().unwrap(), CacheBackend::Redis);
        assert!("memcached".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let mut config = CacheConfig::redis("redis://localhost");
        assert_eq!(config.ttl(), None);

        config.ttl_secs = Some(0);
        assert_eq!(config.ttl(), None);

        config.ttl_secs = Some(30);
        assert_eq!(config.ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{"backend":"redis"}"#).unwrap();
        assert_eq!(config.backend, CacheBackend::Redis);
        assert_eq!(config.prefix, "kiln:");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }
}
