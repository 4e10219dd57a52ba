use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use irma_server::ServerConfig;

use crate::error::{RootError, RootResult};

/// Listener and public address of the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// URL wallets use to reach `/irma/`. Put in QR codes.
    #[serde(default)]
    pub url: String,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            url: String::new(),
        }
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionsConfig {
    /// Idle time after which an unfinished session times out.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// How long a finished session's result stays available.
    #[serde(default = "default_timeout")]
    pub result_retention_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    10
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            result_retention_secs: default_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Top-level configuration, loaded from `~/.irma/config.toml` by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    /// JSON document with credential types and issuer public keys.
    #[serde(default = "default_trust_store_path")]
    pub trust_store_path: PathBuf,

    /// Directory of `<issuer>.json` signing keys. Without it no issuance
    /// sessions can be started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_keys_path: Option<PathBuf>,

    #[serde(default)]
    pub server: HttpConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,
}

fn default_trust_store_path() -> PathBuf {
    dirs_or_default(".irma/trust_store.json")
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            trust_store_path: default_trust_store_path(),
            issuer_keys_path: None,
            server: HttpConfig::default(),
            sessions: SessionsConfig::default(),
        }
    }
}

impl RootConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: RootConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        if self.server.port == 0 {
            return Err(RootError::Config("server.port must be > 0".into()));
        }
        let url = &self.server.url;
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(RootError::Config(format!(
                "server.url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if self.sessions.timeout_secs == 0 {
            return Err(RootError::Config("sessions.timeout_secs must be > 0".into()));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(RootError::Config(
                "sessions.sweep_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Public URL with a trailing slash, or empty when unset.
    pub fn normalized_url(&self) -> String {
        let url = self.server.url.trim();
        if url.is_empty() || url.ends_with('/') {
            url.to_string()
        } else {
            format!("{}/", url)
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            url: self.normalized_url(),
            session_timeout: secs(self.sessions.timeout_secs),
            result_retention: secs(self.sessions.result_retention_secs),
            ..ServerConfig::default()
        }
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".irma/config.toml")
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RootConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.sessions.timeout_secs, 300);
        assert_eq!(config.sessions.result_retention_secs, 300);
        assert_eq!(config.sessions.sweep_interval_secs, 10);
        assert!(config
            .trust_store_path
            .to_str()
            .unwrap()
            .contains(".irma/trust_store.json"));
        assert!(config.issuer_keys_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
trust_store_path = "/etc/irma/trust.json"
issuer_keys_path = "/etc/irma/keys"

[server]
bind = "0.0.0.0"
port = 9000
url = "https://irma.example.com/irma"

[sessions]
timeout_secs = 60
"#;
        let config: RootConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sessions.timeout_secs, 60);
        assert_eq!(config.sessions.sweep_interval_secs, 10);
        assert_eq!(config.trust_store_path, PathBuf::from("/etc/irma/trust.json"));
        assert_eq!(config.issuer_keys_path, Some(PathBuf::from("/etc/irma/keys")));
        assert_eq!(config.normalized_url(), "https://irma.example.com/irma/");
    }

    #[test]
    fn test_server_config_conversion() {
        let mut config = RootConfig::default();
        config.server.url = "http://localhost:8088/irma/".into();
        config.sessions.timeout_secs = 120;
        let server = config.server_config();
        assert_eq!(server.url, "http://localhost:8088/irma/");
        assert_eq!(server.session_timeout, Duration::seconds(120));
        assert_eq!(server.result_retention, Duration::seconds(300));
    }

    #[test]
    fn test_config_validate_rejects() {
        let mut config = RootConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = RootConfig::default();
        config.server.url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        let mut config = RootConfig::default();
        config.sessions.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RootConfig::default();
        config.sessions.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_missing_file_returns_default() {
        let config = RootConfig::load(Path::new("/nonexistent/irma/config.toml")).unwrap();
        assert_eq!(config.server.port, 8088);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RootConfig::default();
        config.server.port = 9999;
        config.issuer_keys_path = Some(dir.path().join("keys"));
        config.save(&path).unwrap();

        let loaded = RootConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9999);
        assert_eq!(loaded.issuer_keys_path, config.issuer_keys_path);
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(RootConfig::load(&path), Err(RootError::Config(_))));
    }
}
