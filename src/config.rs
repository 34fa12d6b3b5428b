// src/config.rs

//! Manages server configuration: loading, resolving, and validating.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// Identifies the cache backend. Only `dir` is implemented; the variant
/// exists so the config shape survives a future backend without a breaking
/// change to the file format.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacherKind {
    #[default]
    Dir,
}

/// Settings for the `DirCacher` artifact store and its background eviction.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub cacher: CacherKind,
    #[serde(default = "default_cacher_dir")]
    pub cacher_dir: String,
    /// Cap for the on-disk size enforcement task, in bytes. `0` means unlimited.
    #[serde(default)]
    pub max_disk_size: u64,
    /// How often the size-enforcement task scans the cache root.
    #[serde(default = "default_gc_interval_secs", with = "humantime_serde")]
    pub gc_interval: std::time::Duration,
    /// Mutable artifacts (`list`, `@latest`) older than this are refreshed
    /// in the background on the next hit instead of served forever.
    #[serde(default = "default_freshness_secs", with = "humantime_serde")]
    pub freshness: std::time::Duration,
}

fn default_cacher_dir() -> String {
    "goproxycache_data/cache".to_string()
}
fn default_gc_interval_secs() -> std::time::Duration {
    std::time::Duration::from_secs(300)
}
fn default_freshness_secs() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cacher: CacherKind::default(),
            cacher_dir: default_cacher_dir(),
            max_disk_size: 0,
            gc_interval: default_gc_interval_secs(),
            freshness: default_freshness_secs(),
        }
    }
}

/// Settings for the upstream chain (C3) and direct toolchain fetcher (C4).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FetchConfig {
    /// `GOPROXY`-style chain string, e.g. `"https://proxy.golang.org,direct"`.
    #[serde(default = "default_upstream_proxies")]
    pub upstream_proxies: String,
    /// Executable name or path of the Go toolchain.
    #[serde(default = "default_go_bin")]
    pub go_bin: String,
    /// Directory used as `GOMODCACHE` and as the toolchain's working directory.
    #[serde(default = "default_gomodcache")]
    pub gomodcache: String,
    /// Directory used for toolchain cwd scratch space and cache tempfiles.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    /// Concurrency cap for toolchain invocations. `0` means unbounded.
    #[serde(default)]
    pub max_direct_fetches: usize,
    /// Disables TLS certificate verification for upstream fetches.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: std::time::Duration,
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: std::time::Duration,
    /// Interval between GOMODCACHE lock-reaper sweeps.
    #[serde(default = "default_lock_reap_interval", with = "humantime_serde")]
    pub lock_reap_interval: std::time::Duration,
}

fn default_upstream_proxies() -> String {
    "https://proxy.golang.org,direct".to_string()
}
fn default_go_bin() -> String {
    "go".to_string()
}
fn default_gomodcache() -> String {
    "goproxycache_data/gomodcache".to_string()
}
fn default_temp_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}
fn default_connect_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(10)
}
fn default_fetch_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(120)
}
fn default_lock_reap_interval() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            upstream_proxies: default_upstream_proxies(),
            go_bin: default_go_bin(),
            gomodcache: default_gomodcache(),
            temp_dir: default_temp_dir(),
            max_direct_fetches: 0,
            insecure: false,
            connect_timeout: default_connect_timeout(),
            fetch_timeout: default_fetch_timeout(),
            lock_reap_interval: default_lock_reap_interval(),
        }
    }
}

/// Settings for the `sumdb/` checksum-database proxy (C5).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SumdbConfig {
    /// Allow-list of checksum-database hosts eligible for forwarding.
    #[serde(default = "default_proxied_sumdbs")]
    pub proxied_sumdbs: Vec<String>,
}

fn default_proxied_sumdbs() -> Vec<String> {
    vec!["sum.golang.org".to_string()]
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_bind_host")]
    bind_host: String,
    #[serde(default = "default_bind_port")]
    bind_port: u16,
    #[serde(default = "default_path_prefix")]
    path_prefix: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    fetch: FetchConfig,
    #[serde(default)]
    sumdb: SumdbConfig,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_port() -> u16 {
    8080
}
fn default_path_prefix() -> String {
    String::new()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub path_prefix: String,
    pub log_level: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sumdb: SumdbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            path_prefix: default_path_prefix(),
            log_level: default_log_level(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            sumdb: SumdbConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file. Missing
    /// files are not an error at this layer; `main` decides whether to fall
    /// back to defaults or fail, per the `--config` CLI contract.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let config = Config {
            bind_host: raw.bind_host,
            bind_port: raw.bind_port,
            path_prefix: raw.path_prefix,
            log_level: raw.log_level,
            cache: raw.cache,
            fetch: raw.fetch,
            sumdb: raw.sumdb,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bind_port == 0 {
            return Err(anyhow!("bind_port cannot be 0"));
        }
        if self.bind_host.trim().is_empty() {
            return Err(anyhow!("bind_host cannot be empty"));
        }
        if self.cache.cacher_dir.trim().is_empty() {
            return Err(anyhow!("cache.cacher_dir cannot be empty"));
        }
        if self.fetch.go_bin.trim().is_empty() {
            return Err(anyhow!("fetch.go_bin cannot be empty"));
        }
        if self.sumdb.proxied_sumdbs.is_empty() {
            warn!("sumdb.proxied_sumdbs is empty: all sumdb/ requests will 404");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn loads_minimal_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bind_port = 9090\n").unwrap();
        let cfg = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.bind_port, 9090);
        assert_eq!(cfg.bind_host, "127.0.0.1");
        assert_eq!(cfg.fetch.upstream_proxies, "https://proxy.golang.org,direct");
    }

    #[test]
    fn rejects_zero_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bind_port = 0\n").unwrap();
        assert!(Config::from_file(path.to_str().unwrap()).is_err());
    }
}
