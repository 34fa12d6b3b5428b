//! Direct/toolchain fetcher (C4): produces artifacts by invoking a locally
//! installed Go toolchain binary when the upstream chain resolves to
//! `direct`.

use crate::core::errors::{ProxyError, Result};
use crate::core::path::{ModuleRequest, RequestKind};
use bytes::Bytes;
use fs4::tokio::AsyncFileExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::warn;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub(crate) const LOCK_FILE_NAME: &str = ".goproxycache-gomodcache.lock";

#[derive(Deserialize)]
struct GoModDownload {
    #[serde(rename = "Version")]
    #[allow(dead_code)]
    version: String,
    #[serde(rename = "Time")]
    #[allow(dead_code)]
    time: Option<String>,
    #[serde(rename = "GoMod")]
    go_mod: Option<String>,
    #[serde(rename = "Zip")]
    zip: Option<String>,
    #[serde(rename = "Info")]
    info: Option<String>,
}

#[derive(Deserialize)]
struct GoListVersions {
    #[serde(rename = "Versions")]
    versions: Option<Vec<String>>,
}

/// Invokes `go` to resolve a single module request. Serializes access to
/// `GOMODCACHE` with an advisory exclusive lock and optionally bounds
/// concurrent invocations with a semaphore.
pub struct ToolchainFetcher {
    go_bin: String,
    gomodcache: PathBuf,
    temp_dir: PathBuf,
    timeout: Duration,
    semaphore: Option<Arc<Semaphore>>,
}

impl ToolchainFetcher {
    pub fn new(
        go_bin: String,
        gomodcache: PathBuf,
        temp_dir: PathBuf,
        timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            go_bin,
            gomodcache,
            temp_dir,
            timeout,
            semaphore: (max_concurrency > 0).then(|| Arc::new(Semaphore::new(max_concurrency))),
        }
    }

    pub async fn fetch(&self, req: &ModuleRequest) -> Result<Bytes> {
        let _permit = match &self.semaphore {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ProxyError::FetchCancelled)?,
            ),
            None => None,
        };

        tokio::fs::create_dir_all(&self.gomodcache).await?;
        let lock_file = self.acquire_lock().await?;

        let result = self.run(req).await;

        AsyncFileExt::unlock_async(&lock_file)
            .await
            .map_err(|e| ProxyError::Internal(format!("failed to release gomodcache lock: {e}")))?;

        result
    }

    async fn acquire_lock(&self) -> Result<tokio::fs::File> {
        let path = self.gomodcache.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        loop {
            if file.try_lock_exclusive()? {
                return Ok(file);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn run(&self, req: &ModuleRequest) -> Result<Bytes> {
        match req.kind {
            RequestKind::List => self.run_list(req).await,
            RequestKind::Info | RequestKind::Latest => self.run_info(req).await,
            RequestKind::Mod => self.run_download_field(req, |d| d.go_mod).await,
            RequestKind::Zip => self.run_download_field(req, |d| d.zip).await,
            _ => Err(ProxyError::BadRequest("unsupported direct fetch kind".into())),
        }
    }

    async fn run_list(&self, req: &ModuleRequest) -> Result<Bytes> {
        let target = format!("{}@latest", req.module_path);
        let stdout = self
            .invoke(&["list", "-m", "-json", "-versions", &target])
            .await?;
        let parsed: GoListVersions = serde_json::from_slice(&stdout)
            .map_err(|e| ProxyError::BadUpstream(format!("malformed go list output: {e}")))?;
        let mut body = String::new();
        for v in parsed.versions.unwrap_or_default() {
            body.push_str(&v);
            body.push('\n');
        }
        Ok(Bytes::from(body))
    }

    async fn run_info(&self, req: &ModuleRequest) -> Result<Bytes> {
        let selector = req
            .version
            .as_deref()
            .or(req.query.as_deref())
            .unwrap_or("latest");
        let target = format!("{}@{selector}", req.module_path);
        let stdout = self.invoke(&["mod", "download", "-json", &target]).await?;
        let parsed: GoModDownload = serde_json::from_slice(&stdout)
            .map_err(|e| ProxyError::BadUpstream(format!("malformed go mod download output: {e}")))?;
        match parsed.info {
            Some(info_path) => Ok(Bytes::from(tokio::fs::read(&info_path).await?)),
            None => Ok(stdout),
        }
    }

    async fn run_download_field(
        &self,
        req: &ModuleRequest,
        field: impl Fn(GoModDownload) -> Option<String>,
    ) -> Result<Bytes> {
        let version = req
            .version
            .as_deref()
            .ok_or_else(|| ProxyError::BadRequest("missing version".into()))?;
        let target = format!("{}@{version}", req.module_path);
        let stdout = self.invoke(&["mod", "download", "-json", &target]).await?;
        let parsed: GoModDownload = serde_json::from_slice(&stdout)
            .map_err(|e| ProxyError::BadUpstream(format!("malformed go mod download output: {e}")))?;
        let path = field(parsed)
            .ok_or_else(|| ProxyError::BadUpstream("toolchain did not produce a file path".into()))?;
        Ok(Bytes::from(tokio::fs::read(&path).await?))
    }

    /// Spawns `go` with a scrubbed environment, draining stdout/stderr
    /// concurrently with waiting on the child so a full pipe buffer never
    /// deadlocks the supervisor. Races the child against the configured
    /// deadline; on timeout (or if this future is dropped because the
    /// caller went away) the child is killed and its exit is awaited
    /// before the lock is released, via `kill_on_drop`.
    async fn invoke(&self, args: &[&str]) -> Result<Bytes> {
        let mut cmd = Command::new(&self.go_bin);
        cmd.args(args)
            .current_dir(&self.temp_dir)
            .env_clear()
            .env("GOPROXY", "off")
            .env("GOFLAGS", "-mod=mod")
            .env("GOSUMDB", "off")
            .env("GOMODCACHE", &self.gomodcache)
            .env("GOPATH", &self.gomodcache)
            .env("TMPDIR", &self.temp_dir)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Ok(home) = std::env::var("HOME") {
            cmd.env("HOME", home);
        }
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ProxyError::Internal(format!("failed to spawn {}: {e}", self.go_bin)))?;

        let mut stdout_pipe = child.stdout.take().expect("piped stdout");
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let wait_result = tokio::select! {
            result = child.wait() => result,
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ProxyError::FetchTimedOut);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let status = match wait_result {
            Ok(status) => status,
            Err(e) => {
                let _ = child.start_kill();
                return Err(ProxyError::Internal(format!("failed to wait on go: {e}")));
            }
        };

        if status.success() {
            return Ok(Bytes::from(stdout));
        }

        let stderr_text = String::from_utf8_lossy(&stderr);
        warn!(stderr = %stderr_text, "go toolchain invocation failed");
        if stderr_text.contains("not found")
            || stderr_text.contains("unknown revision")
            || stderr_text.contains("invalid version")
        {
            Err(ProxyError::not_found(stderr_text.trim().to_string()))
        } else {
            Err(ProxyError::BadUpstream(stderr_text.trim().to_string()))
        }
    }
}
