//! Startup configuration (spec §4.8): an ordered project list plus
//! tunables, resolved `env var > config file > hardcoded default`.
//!
//! ```text
//! Field                      Env Var                       Config Key                 Default
//! ────────────────────────── ───────────────────────────── ────────────────────────── ───────
//! readiness_retry_budget     ROTOR_READINESS_RETRY_BUDGET   readiness_retry_budget     1
//! build_retry_on_transient   ROTOR_BUILD_RETRY_ON_TRANSIENT build_retry_on_transient   false
//! pull_timeout               ROTOR_PULL_TIMEOUT             pull_timeout               60s
//! build_timeout               ROTOR_BUILD_TIMEOUT            build_timeout              600s
//! exec_timeout                ROTOR_EXEC_TIMEOUT             exec_timeout               30s
//! webhook_listen             ROTOR_WEBHOOK_LISTEN           webhook_listen             0.0.0.0:8080
//! admin_listen                ROTOR_ADMIN_LISTEN             admin_listen               127.0.0.1:8081
//! log_level                   ROTOR_LOG_LEVEL                log_level                  info
//! ```
//!
//! The project list itself (clone URL, container range, recipe path, hook
//! directory) is file-only (spec §4.8): it is a list, not a scalar, so no
//! single env var can override one entry. Resolution order and the
//! env-wins-over-file shape are grounded on `sipag-core/src/config.rs`'s
//! `WorkerConfig`; the project list is additionally read from JSON
//! (`serde_json`, already in the dependency stack for the status snapshot)
//! rather than the teacher's flat key=value format, since it is structured
//! data rather than scalar tunables.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;

use crate::error::EngineError;

/// One entry from the static project list (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub clone_url: String,
    pub container_range: (u32, u32),
    pub dockerfile: String,
    pub hook_dir: String,
}

impl ProjectConfig {
    fn validate(&self) -> Result<(), EngineError> {
        let (min, max) = self.container_range;
        if min < 1 || min > max {
            return Err(EngineError::Config(format!(
                "project {}: container_range ({min}, {max}) must satisfy 1 <= min <= max",
                self.clone_url
            )));
        }
        Ok(())
    }
}

/// Retry and timeout knobs (spec §3 `RetryPolicy`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub readiness_retry_budget: u32,
    pub build_retry_on_transient: bool,
    pub pull_timeout: Duration,
    pub build_timeout: Duration,
    pub exec_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            readiness_retry_budget: 1,
            build_retry_on_transient: false,
            pull_timeout: Duration::from_secs(60),
            build_timeout: Duration::from_secs(600),
            exec_timeout: Duration::from_secs(30),
        }
    }
}

/// Full resolved startup configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub projects: Vec<ProjectConfig>,
    pub retry: RetryPolicy,
    pub webhook_listen: String,
    pub admin_listen: String,
    pub log_level: String,
}

impl EngineConfig {
    /// Load the project list from `project_list_path` (JSON) and tunables
    /// from `tunables_path` (`key=value`), with environment overrides.
    pub fn load(project_list_path: &Path, tunables_path: &Path) -> Result<Self, EngineError> {
        Self::load_with_env(project_list_path, tunables_path, |k| env::var(k).ok())
    }

    fn load_with_env(
        project_list_path: &Path,
        tunables_path: &Path,
        get_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EngineError> {
        let projects = Self::load_projects(project_list_path)?;

        let mut cfg = EngineConfig {
            projects,
            retry: RetryPolicy::default(),
            webhook_listen: "0.0.0.0:8080".to_string(),
            admin_listen: "127.0.0.1:8081".to_string(),
            log_level: "info".to_string(),
        };

        if tunables_path.exists() {
            let content = fs::read_to_string(tunables_path).map_err(|e| {
                EngineError::Config(format!(
                    "reading {}: {e}",
                    tunables_path.display()
                ))
            })?;
            for (key, value) in parse_key_value(&content) {
                cfg.apply_file_entry(key, value);
            }
        }

        cfg.apply_env_overrides(get_env);
        Ok(cfg)
    }

    fn load_projects(path: &Path) -> Result<Vec<ProjectConfig>, EngineError> {
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("reading {}: {e}", path.display())))?;
        let projects: Vec<ProjectConfig> = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("parsing {}: {e}", path.display())))?;
        if projects.is_empty() {
            return Err(EngineError::Config(format!(
                "{}: project list must not be empty",
                path.display()
            )));
        }
        for p in &projects {
            p.validate()?;
        }
        Ok(projects)
    }

    fn apply_file_entry(&mut self, key: &str, value: &str) {
        match key {
            "readiness_retry_budget" => {
                if let Ok(n) = value.parse() {
                    self.retry.readiness_retry_budget = n;
                }
            }
            "build_retry_on_transient" => self.retry.build_retry_on_transient = value == "true",
            "pull_timeout" => {
                if let Ok(n) = value.parse() {
                    self.retry.pull_timeout = Duration::from_secs(n);
                }
            }
            "build_timeout" => {
                if let Ok(n) = value.parse() {
                    self.retry.build_timeout = Duration::from_secs(n);
                }
            }
            "exec_timeout" => {
                if let Ok(n) = value.parse() {
                    self.retry.exec_timeout = Duration::from_secs(n);
                }
            }
            "webhook_listen" => self.webhook_listen = value.to_string(),
            "admin_listen" => self.admin_listen = value.to_string(),
            "log_level" => self.log_level = value.to_string(),
            _ => {}
        }
    }

    fn apply_env_overrides(&mut self, get_env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get_env("ROTOR_READINESS_RETRY_BUDGET") {
            if let Ok(n) = v.parse() {
                self.retry.readiness_retry_budget = n;
            }
        }
        if let Some(v) = get_env("ROTOR_BUILD_RETRY_ON_TRANSIENT") {
            self.retry.build_retry_on_transient = v == "true";
        }
        if let Some(v) = get_env("ROTOR_PULL_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.retry.pull_timeout = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("ROTOR_BUILD_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.retry.build_timeout = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("ROTOR_EXEC_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.retry.exec_timeout = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("ROTOR_WEBHOOK_LISTEN") {
            self.webhook_listen = v;
        }
        if let Some(v) = get_env("ROTOR_ADMIN_LISTEN") {
            self.admin_listen = v;
        }
        if let Some(v) = get_env("ROTOR_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// Working directory for a repo, derived from the index of the first
    /// project referencing it (spec §6).
    pub fn working_dir_for(&self, clone_url: &str, state_root: &Path) -> Option<PathBuf> {
        let index = self
            .projects
            .iter()
            .position(|p| p.clone_url == clone_url)?;
        Some(state_root.join(format!("repo-{index}")))
    }
}

fn parse_key_value(content: &str) -> impl Iterator<Item = (&str, &str)> {
    content.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        line.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
    })
}
