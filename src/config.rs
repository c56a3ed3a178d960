//! Configuration loader and validator for the blogdesk service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub server: Server,
    pub backend: Backend,
    #[serde(default)]
    pub cron: Cron,
}

/// Deployment environment. Only production-like environments enforce the
/// cron secret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Preview,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production_like(&self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "preview" => Some(Environment::Preview),
            "staging" => Some(Environment::Staging),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(default)]
    pub environment: Environment,
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
    /// Failed pushes at or beyond this many attempts are logged as errors.
    pub failure_alert_attempts: i32,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

/// Remote document-collection backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    pub api_key: String,
    pub collections: Collections,
}

/// Collection names on the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collections {
    pub articles: String,
    pub settings: String,
}

/// Scheduled-publication trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Cron {
    #[serde(default)]
    pub secret: Option<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite location inside the data dir.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/blogdesk.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }

    /// The configured cron secret, ignoring blank values.
    pub fn cron_secret(&self) -> Option<&str> {
        self.cron
            .secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Apply environment overrides. `get` abstracts the environment lookup.
    pub fn apply_overrides<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = get("APP_ENV") {
            self.app.environment = Environment::parse(&env)
                .ok_or(ConfigError::Invalid("APP_ENV must be development, preview, staging or production"))?;
        }
        if let Some(secret) = get("CRON_SECRET") {
            self.cron.secret = Some(secret);
        }
        if let Some(url) = get("BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(key) = get("BACKEND_API_KEY") {
            self.backend.api_key = key;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.failure_alert_attempts <= 0 {
        return Err(ConfigError::Invalid("app.failure_alert_attempts must be > 0"));
    }

    if cfg.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("server.bind must be a socket address"));
    }

    if reqwest::Url::parse(&cfg.backend.base_url).is_err() {
        return Err(ConfigError::Invalid("backend.base_url must be a valid URL"));
    }
    if cfg.backend.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.api_key must be non-empty"));
    }
    if cfg.backend.collections.articles.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.collections.articles must be non-empty"));
    }
    if cfg.backend.collections.settings.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.collections.settings must be non-empty"));
    }

    Ok(())
}

/// Returns the sample configuration.
pub fn example() -> &'static str {
    r#"app:
  environment: "development"
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 60
  failure_alert_attempts: 5

server:
  bind: "127.0.0.1:8080"

backend:
  base_url: "https://backend.example.com/"
  api_key: "YOUR_BACKEND_API_KEY"
  collections:
    articles: "articles"
    settings: "settings"

cron:
  secret: "YOUR_CRON_SECRET"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.environment, Environment::Development);
        assert_eq!(cfg.cron_secret(), Some("YOUR_CRON_SECRET"));
    }

    #[test]
    fn cron_section_is_optional() {
        let yaml = example().split("cron:").next().unwrap().to_string();
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.cron_secret(), None);
    }

    #[test]
    fn blank_secret_counts_as_unset() {
        let mut cfg = example_cfg();
        cfg.cron.secret = Some("   ".into());
        assert_eq!(cfg.cron_secret(), None);
    }

    #[test]
    fn invalid_backend() {
        let mut cfg = example_cfg();
        cfg.backend.api_key = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("backend.api_key")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.backend.base_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.backend.collections.settings = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("collections.settings")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_app_and_server() {
        let mut cfg = example_cfg();
        cfg.app.poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.app.failure_alert_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.server.bind = "localhost".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("APP_ENV", "prod"),
            ("CRON_SECRET", "s3cret"),
            ("BACKEND_URL", "http://127.0.0.1:9000/"),
            ("BACKEND_API_KEY", "key-from-env"),
        ]
        .into_iter()
        .collect();
        let mut cfg = example_cfg();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.app.environment, Environment::Production);
        assert!(cfg.app.environment.is_production_like());
        assert_eq!(cfg.cron_secret(), Some("s3cret"));
        assert_eq!(cfg.backend.base_url, "http://127.0.0.1:9000/");
        assert_eq!(cfg.backend.api_key, "key-from-env");
    }

    #[test]
    fn unknown_environment_rejected() {
        let mut cfg = example_cfg();
        let err = cfg
            .apply_overrides(|k| (k == "APP_ENV").then(|| "moon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.database_url().ends_with("/data/blogdesk.db"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.backend.collections.articles, "articles");
    }
}
