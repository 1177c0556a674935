//! Configuration loader and validator for the progress backend.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::leveling::Rules;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub http: Http,
    pub telegram: Telegram,
    #[serde(default)]
    pub supabase: Option<Supabase>,
    pub progression: Progression,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub log_level: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Http {
    pub host: String,
    pub port: u16,
    pub session_ttl_seconds: u64,
    /// Token required in `X-Admin-Token` for ad management. Admin routes are
    /// closed when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

/// Telegram bot and Web App settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Maximum accepted age of Web App init data; 0 disables the check.
    pub init_data_max_age_seconds: u64,
    pub connect_code_ttl_seconds: u64,
}

/// Supabase identity mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Supabase {
    pub url: String,
    pub service_key: String,
    pub table: String,
}

/// Experience, level and streak tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progression {
    pub base_experience: i64,
    pub max_level: i64,
    pub daily_experience: i64,
    pub streak_milestones: Vec<i64>,
}

impl Progression {
    pub fn rules(&self) -> Rules {
        Rules {
            base_experience: self.base_experience,
            max_level: self.max_level,
            daily_experience: self.daily_experience,
            streak_milestones: self.streak_milestones.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Admin token with blank values treated as unset.
    pub fn admin_token(&self) -> Option<&str> {
        self.http
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.http.host.trim().is_empty() {
        return Err(ConfigError::Invalid("http.host must be non-empty"));
    }
    if cfg.http.port == 0 {
        return Err(ConfigError::Invalid("http.port must be > 0"));
    }
    if cfg.http.session_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("http.session_ttl_seconds must be > 0"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.connect_code_ttl_seconds == 0 {
        return Err(ConfigError::Invalid(
            "telegram.connect_code_ttl_seconds must be > 0",
        ));
    }

    if let Some(sb) = &cfg.supabase {
        if !sb.url.starts_with("http://") && !sb.url.starts_with("https://") {
            return Err(ConfigError::Invalid("supabase.url must be an http(s) URL"));
        }
        if sb.service_key.trim().is_empty() {
            return Err(ConfigError::Invalid("supabase.service_key must be non-empty"));
        }
        if sb.table.trim().is_empty() {
            return Err(ConfigError::Invalid("supabase.table must be non-empty"));
        }
    }

    let p = &cfg.progression;
    if p.base_experience <= 0 {
        return Err(ConfigError::Invalid("progression.base_experience must be > 0"));
    }
    if p.max_level < 1 {
        return Err(ConfigError::Invalid("progression.max_level must be >= 1"));
    }
    if p.daily_experience < 0 {
        return Err(ConfigError::Invalid("progression.daily_experience must be >= 0"));
    }
    if p.streak_milestones.iter().any(|m| *m <= 0) {
        return Err(ConfigError::Invalid(
            "progression.streak_milestones must be positive",
        ));
    }

    Ok(())
}

/// Example configuration covering every section.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  log_level: "info"
  poll_interval_ms: 500
  max_backoff_seconds: 300

http:
  host: "0.0.0.0"
  port: 8080
  session_ttl_seconds: 604800
  admin_token: "CHANGE_ME_ADMIN_TOKEN"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  init_data_max_age_seconds: 86400
  connect_code_ttl_seconds: 600

supabase:
  url: "https://YOUR_PROJECT.supabase.co"
  service_key: "YOUR_SUPABASE_SERVICE_ROLE_KEY"
  table: "profiles"

progression:
  base_experience: 100
  max_level: 100
  daily_experience: 10
  streak_milestones: [3, 7, 14, 30, 100]
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.admin_token(), Some("CHANGE_ME_ADMIN_TOKEN"));
        assert_eq!(cfg.progression.rules().streak_milestones, vec![3, 7, 14, 30, 100]);
    }

    #[test]
    fn supabase_section_is_optional() {
        let yaml = example().split("supabase:").next().unwrap().to_string()
            + "progression:\n  base_experience: 50\n  max_level: 10\n  daily_experience: 0\n  streak_milestones: []\n";
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        validate(&cfg).unwrap();
        assert!(cfg.supabase.is_none());
    }

    #[test]
    fn invalid_bot_token() {
        let mut cfg = example_cfg();
        cfg.telegram.bot_token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("telegram.bot_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_supabase_settings() {
        let mut cfg = example_cfg();
        cfg.supabase.as_mut().unwrap().url = "ftp://nope".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("supabase.url")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.supabase.as_mut().unwrap().service_key = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_progression() {
        let mut cfg = example_cfg();
        cfg.progression.base_experience = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.progression.max_level = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.progression.streak_milestones = vec![3, 0];
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn blank_admin_token_is_unset() {
        let mut cfg = example_cfg();
        cfg.http.admin_token = Some("   ".into());
        assert_eq!(cfg.admin_token(), None);
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.http.port, 8080);
    }
}
