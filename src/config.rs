// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";
pub const ENV_USERS: &str = "MONITOR_USERS";
pub const ENV_NEWS: &str = "MONITOR_NEWS";
pub const ENV_BATTLE_OVER: &str = "BATTLE_OVER_DETECTION";

fn default_true() -> bool {
    true
}
fn default_team_interval() -> u64 {
    3600
}
fn default_request_interval() -> u64 {
    300
}
fn default_news_interval() -> u64 {
    3600
}
fn default_rate_limit_interval() -> u64 {
    300
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_error_cooldown() -> u64 {
    300
}
fn default_shutdown_timeout() -> u64 {
    5
}
fn default_store_path() -> PathBuf {
    PathBuf::from("state/monitor.json")
}
fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("fixtures")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Display names of the two teams (logging only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamNames {
    pub team1: String,
    pub team2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default = "default_team_interval")]
    pub team_check_interval_secs: u64,
    /// Interval of the per-user attack/defense pass.
    #[serde(default = "default_request_interval")]
    pub request_interval_secs: u64,
    #[serde(default = "default_news_interval")]
    pub news_check_interval_secs: u64,
    #[serde(default = "default_rate_limit_interval")]
    pub rate_limit_interval_secs: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub cache_sweep_interval_secs: u64,
    #[serde(default)]
    pub battle_over_detection: bool,
    #[serde(default = "default_true")]
    pub monitor_news: bool,
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,
    #[serde(default)]
    pub teams: Option<TeamNames>,
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            team_check_interval_secs: default_team_interval(),
            request_interval_secs: default_request_interval(),
            news_check_interval_secs: default_news_interval(),
            rate_limit_interval_secs: default_rate_limit_interval(),
            cache_ttl_secs: default_cache_ttl(),
            cache_sweep_interval_secs: default_sweep_interval(),
            battle_over_detection: false,
            monitor_news: true,
            error_cooldown_secs: default_error_cooldown(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            store_path: default_store_path(),
            fixtures_dir: default_fixtures_dir(),
            teams: None,
            metrics_addr: None,
        }
    }
}

impl MonitorConfig {
    /// Enabled usernames, trimmed and deduplicated (first occurrence wins).
    pub fn monitored_users(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for u in self.users.iter().filter(|u| u.enabled) {
            let name = u.username.trim();
            if !name.is_empty() && !out.iter().any(|o| o == name) {
                out.push(name.to_string());
            }
        }
        out
    }

    pub fn team_interval(&self) -> Duration {
        Duration::from_secs(self.team_check_interval_secs)
    }

    pub fn user_interval(&self) -> Duration {
        Duration::from_secs(self.request_interval_secs)
    }

    pub fn news_interval(&self) -> Duration {
        Duration::from_secs(self.news_check_interval_secs)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// True when a rate-limited team pass can land after its cached result
    /// expired. That pass is answered from the stored standing, which resets
    /// the battle-over counter, so the heuristic may never fire.
    pub fn battle_over_blind_spot(&self) -> bool {
        self.battle_over_detection
            && self.team_check_interval_secs < self.rate_limit_interval_secs
            && self.cache_ttl_secs < self.rate_limit_interval_secs
    }

    /// Apply `MONITOR_USERS`, `MONITOR_NEWS` and `BATTLE_OVER_DETECTION`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(ENV_USERS) {
            self.users = parse_user_list(&raw)
                .into_iter()
                .map(|username| UserConfig {
                    username,
                    enabled: true,
                })
                .collect();
        }
        if let Ok(raw) = std::env::var(ENV_NEWS) {
            self.monitor_news = parse_bool(&raw).with_context(|| format!("{ENV_NEWS}={raw}"))?;
        }
        if let Ok(raw) = std::env::var(ENV_BATTLE_OVER) {
            self.battle_over_detection =
                parse_bool(&raw).with_context(|| format!("{ENV_BATTLE_OVER}={raw}"))?;
        }
        Ok(())
    }
}

/// Load configuration from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<MonitorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading monitor config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing monitor config {}", path.display()))
}

/// Load configuration using env var + fallbacks, then env overrides:
/// 1) $MONITOR_CONFIG_PATH
/// 2) config/monitor.toml
/// 3) config/monitor.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<MonitorConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_config_from(&pb)?
    } else {
        let toml_p = PathBuf::from("config/monitor.toml");
        let json_p = PathBuf::from("config/monitor.json");
        if toml_p.exists() {
            load_config_from(&toml_p)?
        } else if json_p.exists() {
            load_config_from(&json_p)?
        } else {
            MonitorConfig::default()
        }
    };
    cfg.apply_env_overrides()?;
    Ok(cfg)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<MonitorConfig> {
    // JSON documents start with '{'; everything else is treated as TOML first.
    let looks_json = s.trim_start().starts_with('{');
    if hint_ext == "json" || looks_json {
        if let Ok(v) = serde_json::from_str(s) {
            return Ok(v);
        }
    }
    match toml::from_str(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => {
            if hint_ext != "json" && !looks_json {
                if let Ok(v) = serde_json::from_str(s) {
                    return Ok(v);
                }
            }
            Err(anyhow!("unsupported monitor config format: {toml_err}"))
        }
    }
}

/// JSON array or comma-separated list; trimmed, empties dropped, order kept.
pub fn parse_user_list(raw: &str) -> Vec<String> {
    let items: Vec<String> = match serde_json::from_str::<Vec<String>>(raw) {
        Ok(v) => v,
        Err(_) => raw.split(',').map(str::to_string).collect(),
    };
    let mut out: Vec<String> = Vec::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("not a boolean: {other}")),
    }
}
