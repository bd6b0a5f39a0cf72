//! Engine configuration and path helpers.
//!
//! Uses Figment to merge serialized defaults + `vdoc.toml` + `vdoc.<env>.toml`
//! + `VDOC_*` env vars. Provides helpers to expand `~` and `${VAR}` and to
//! resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// What the admission gate does once `max_in_flight` operations are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    Block,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Data directory; dumps are written under `<path>/dump`.
    pub path: PathBuf,
    /// Relative values resolve against `path`.
    pub log_dir: Option<PathBuf>,
    /// Store capacity in doc numbers. Every write takes a new number and an
    /// overwrite does not free the old one, so overwrite-heavy loads reach
    /// this limit with fewer live documents.
    pub max_doc_size: u32,
    pub max_in_flight: usize,
    pub admission: AdmissionPolicy,
    pub build_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vdoc-data"),
            log_dir: None,
            max_doc_size: 10_000_000,
            max_in_flight: 64,
            admission: AdmissionPolicy::Block,
            build_threads: 4,
        }
    }
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("vdoc.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("vdoc.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("vdoc.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("vdoc.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("VDOC_"));

        Self::from_figment(&figment)
    }

    pub fn from_figment(figment: &Figment) -> anyhow::Result<Self> {
        let mut config: EngineConfig = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract engine config: {}", e))?;
        let path = expand_path(config.path.to_string_lossy());
        config.log_dir = config.log_dir.map(|d| resolve_with_base(&path, d.to_string_lossy()));
        config.path = path;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig("max_in_flight must be at least 1".into()));
        }
        if self.build_threads == 0 {
            return Err(Error::InvalidConfig("build_threads must be at least 1".into()));
        }
        if self.max_doc_size == 0 {
            return Err(Error::InvalidConfig("max_doc_size must be at least 1".into()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("path is empty".into()));
        }
        Ok(())
    }

    pub fn dump_dir(&self) -> PathBuf {
        self.path.join("dump")
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Expands `p` and anchors it under `base` unless it is already absolute.
/// A relative `log_dir` lives under the data directory.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let expanded = expand_path(p);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}
