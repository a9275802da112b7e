//! Configuration for the import server, worker and client
//!
//! Values come from `ImportConfig::default()`, then an optional TOML file named
//! by `NOTES_IMPORT_CONFIG`, then individual environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ingestion::ParserConfig;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "NOTES_IMPORT_CONFIG";

/// Main import system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Job queue configuration
    pub queue: QueueConfig,
    /// Scratch storage configuration
    pub scratch: ScratchConfig,
    /// Slide parser configuration
    pub parser: ParserConfig,
    /// Worker configuration
    pub worker: WorkerConfig,
    /// Bearer token authentication
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            enable_cors: true,
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// SQLite database shared by the server and the workers
    pub path: PathBuf,
    /// Queue name; several queues may share one database
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let path = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("notes-import")
            .join("queue.db");

        Self {
            path,
            name: "importQueue".to_string(),
        }
    }
}

/// Scratch storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Root for per-upload directories. Must be shared by server and workers.
    pub dir: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("notes-import-scratch"),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Tasks processed at once (default: CPU count, max 4)
    pub concurrency: Option<usize>,
    /// Claims per task before it is abandoned
    pub max_attempts: u32,
    /// How long a claim stays valid without a progress report
    pub lease_secs: u64,
    /// Sleep between claims when the queue is empty
    pub idle_poll_ms: u64,
    /// Interval of the recovery, retention and orphan sweeps
    pub recovery_interval_secs: u64,
    /// How long terminal tasks stay queryable
    pub retention_secs: u64,
    /// Minimum age before an unreferenced scratch directory is removed
    pub orphan_grace_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: None, // Auto-detect from CPU count
            max_attempts: 3,
            lease_secs: 300,
            idle_poll_ms: 500,
            recovery_interval_secs: 30,
            retention_secs: 24 * 60 * 60,
            orphan_grace_secs: 60 * 60,
        }
    }
}

impl WorkerConfig {
    pub fn concurrency(&self) -> usize {
        self.concurrency
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }
}

/// Bearer token authentication. Disabled when no tokens are configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token -> user id
    pub tokens: HashMap<String, String>,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Parse `user:token,user:token`
    pub fn parse_tokens(value: &str) -> Result<HashMap<String, String>> {
        let mut tokens = HashMap::new();
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (user, token) = entry
                .split_once(':')
                .map(|(u, t)| (u.trim(), t.trim()))
                .filter(|(u, t)| !u.is_empty() && !t.is_empty())
                .ok_or_else(|| {
                    Error::Config(format!("invalid token entry '{}', expected user:token", entry))
                })?;
            tokens.insert(token.to_string(), user.to_string());
        }
        Ok(tokens)
    }
}

impl ImportConfig {
    /// Load from the optional config file and the process environment
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work together.
    ///
    /// A task's lease is only renewed between parse steps, so it must outlast
    /// the longest parse.
    pub fn validate(&self) -> Result<()> {
        if self.worker.lease_secs <= self.parser.timeout_secs {
            return Err(Error::Config(format!(
                "worker.lease_secs ({}) must be greater than parser.timeout_secs ({})",
                self.worker.lease_secs, self.parser.timeout_secs
            )));
        }
        Ok(())
    }

    /// Apply environment-style overrides through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_var("PORT", &port)?;
        }
        if let Some(bytes) = lookup("IMPORT_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_var("IMPORT_MAX_UPLOAD_BYTES", &bytes)?;
        }
        if let Some(path) = lookup("IMPORT_QUEUE_PATH") {
            self.queue.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("IMPORT_SCRATCH_DIR") {
            self.scratch.dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("PARSER_URL") {
            self.parser.base_url = url;
        }
        if let Some(secs) = lookup("IMPORT_PARSE_TIMEOUT_SECS") {
            self.parser.timeout_secs = parse_var("IMPORT_PARSE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(n) = lookup("IMPORT_WORKER_CONCURRENCY") {
            self.worker.concurrency = Some(parse_var("IMPORT_WORKER_CONCURRENCY", &n)?);
        }
        if let Some(tokens) = lookup("IMPORT_API_TOKENS") {
            self.auth.tokens = AuthConfig::parse_tokens(&tokens)?;
        }
        self.validate()
    }

    /// Socket address the server binds to
    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: '{}'", name, value)))
}
