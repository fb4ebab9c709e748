//! Configuration file management for the engine binary.
//!
//! Provides a TOML-based config file at `~/.config/cxe/config.toml` and a
//! resolution chain per key: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use cxe_core::config::EngineConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExecutionSection {
    pub worker_count: Option<usize>,
    pub compile_timeout_seconds: Option<u64>,
    pub run_timeout_seconds: Option<u64>,
    pub run_memory_limit_bytes: Option<u64>,
    pub run_cpu_share: Option<f64>,
    pub temp_dir: Option<PathBuf>,
    pub keep_workdir: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheSection {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SandboxSection {
    pub mode: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the cxe config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/cxe` or `~/.config/cxe`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("cxe");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("cxe")
}

/// Return the path to the cxe config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse a config file. A missing file is not an error -- every
/// key has a default -- but an unreadable or malformed file is.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CxeConfig {
    pub engine: EngineConfig,
    pub bind: String,
    pub port: u16,
}

impl CxeConfig {
    /// Resolve using the chain: env var > config file > default. CLI
    /// overrides (`--bind`, `--port`, `--config`) are applied by the
    /// caller.
    pub fn resolve(config_file: Option<&Path>) -> Result<Self> {
        let path = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(config_path);
        let file = load_config(&path)?;
        let defaults = EngineConfig::default();

        let engine = EngineConfig {
            worker_count: resolve_key(
                "CXE_WORKER_COUNT",
                file.execution.worker_count,
                defaults.worker_count,
            )?,
            compile_timeout: Duration::from_secs(resolve_key(
                "CXE_COMPILE_TIMEOUT_SECONDS",
                file.execution.compile_timeout_seconds,
                defaults.compile_timeout.as_secs(),
            )?),
            run_timeout: Duration::from_secs(resolve_key(
                "CXE_RUN_TIMEOUT_SECONDS",
                file.execution.run_timeout_seconds,
                defaults.run_timeout.as_secs(),
            )?),
            run_memory_limit_bytes: resolve_key(
                "CXE_RUN_MEMORY_LIMIT_BYTES",
                file.execution.run_memory_limit_bytes,
                defaults.run_memory_limit_bytes,
            )?,
            run_cpu_share: resolve_key(
                "CXE_RUN_CPU_SHARE",
                file.execution.run_cpu_share,
                defaults.run_cpu_share,
            )?,
            cache_ttl: Duration::from_secs(resolve_key(
                "CXE_CACHE_TTL_SECONDS",
                file.cache.ttl_seconds,
                defaults.cache_ttl.as_secs(),
            )?),
            temp_dir: resolve_key("CXE_TEMP_DIR", file.execution.temp_dir, defaults.temp_dir)?,
            sandbox_mode: resolve_key(
                "CXE_SANDBOX_MODE",
                file.sandbox.mode,
                defaults.sandbox_mode,
            )?,
            keep_workdir: resolve_key(
                "CXE_KEEP_WORKDIR",
                file.execution.keep_workdir,
                defaults.keep_workdir,
            )?,
        };

        let bind = resolve_key("CXE_BIND", file.server.bind, "127.0.0.1".to_string())?;
        let port = resolve_key("CXE_PORT", file.server.port, 8080)?;

        Ok(Self { engine, bind, port })
    }
}

/// One key through the env > file > default chain.
fn resolve_key<T>(env_name: &str, file_value: Option<T>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(env_name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid {env_name}={raw:?}: {e}")),
        Err(_) => Ok(file_value.unwrap_or(default)),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
