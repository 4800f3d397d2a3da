//! Runtime configuration for formcoach-daemon.
//!
//! Values come from an optional TOML file, then environment overrides. A
//! missing file is not an error: every section has working defaults.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use formcoach_protocol::{DEFAULT_EXERCISE_NAME, DEFAULT_TARGET_REPS, MAX_FRAME_BYTES};

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "FORMCOACH_CONFIG";
const BIND_ADDR_ENV: &str = "FORMCOACH_BIND_ADDR";
const VISION_URL_ENV: &str = "FORMCOACH_VISION_URL";
const LEGACY_VISION_URL_ENV: &str = "PYTHON_SERVICE_URL";
const DB_PATH_ENV: &str = "FORMCOACH_DB_PATH";
const MAX_COOLDOWN_SECS: u64 = 24 * 60 * 60;
const MAX_IDLE_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Base URL of the pose-estimation service. Unset means frames are
    /// answered with `python_unavailable`.
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 10,
            failure_threshold: 6,
            cooldown_secs: 10,
        }
    }
}

impl VisionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs.min(MAX_COOLDOWN_SECS) as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl RegistryConfig {
    pub fn idle_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_ttl_secs.min(MAX_IDLE_TTL_SECS) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("sessions.db")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndPolicy {
    /// Ending without an active session still writes a zero-valued record.
    #[default]
    RecordEmpty,
    /// Ending without an active session answers `no_active_session`.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub default_target_reps: u32,
    pub default_exercise: String,
    pub end_without_session: EndPolicy,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_target_reps: DEFAULT_TARGET_REPS,
            default_exercise: DEFAULT_EXERCISE_NAME.to_string(),
            end_without_session: EndPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token -> user id.
    pub tokens: HashMap<String, String>,
}

impl DaemonConfig {
    /// Applies environment overrides on top of file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: u64| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        if self.vision.request_timeout_secs == 0 {
            return Err(invalid("vision.request_timeout_secs", 0));
        }
        if self.vision.failure_threshold == 0 {
            return Err(invalid("vision.failure_threshold", 0));
        }
        if self.vision.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(invalid("vision.cooldown_secs", self.vision.cooldown_secs));
        }
        if self.registry.idle_ttl_secs > MAX_IDLE_TTL_SECS {
            return Err(invalid("registry.idle_ttl_secs", self.registry.idle_ttl_secs));
        }
        if self.registry.sweep_interval_secs == 0 {
            return Err(invalid("registry.sweep_interval_secs", 0));
        }
        Ok(())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(BIND_ADDR_ENV) {
            self.server.bind_addr = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: BIND_ADDR_ENV.to_string(),
                value: value.clone(),
            })?;
        }

        let vision_url = lookup(VISION_URL_ENV).or_else(|| lookup(LEGACY_VISION_URL_ENV));
        if let Some(value) = vision_url {
            let trimmed = value.trim();
            self.vision.base_url = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }

        if let Some(value) = lookup(DB_PATH_ENV) {
            if !value.trim().is_empty() {
                self.storage.db_path = Some(PathBuf::from(value.trim()));
            }
        }

        Ok(())
    }
}

pub fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, ConfigError> {
    let config_path = match path.or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from)) {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<DaemonConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}

pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".formcoach").join("daemon"))
}

fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.server.bind_addr.port(), 3000);
        assert_eq!(config.vision.base_url, None);
        assert_eq!(config.vision.request_timeout_secs, 10);
        assert_eq!(config.vision.failure_threshold, 6);
        assert_eq!(config.vision.cooldown_secs, 10);
        assert_eq!(config.sessions.default_target_reps, DEFAULT_TARGET_REPS);
        assert_eq!(config.sessions.end_without_session, EndPolicy::RecordEmpty);
    }

    #[test]
    fn load_config_parses_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[server]
bind_addr = "127.0.0.1:4100"

[vision]
base_url = "http://localhost:8000"
failure_threshold = 3

[registry]
idle_ttl_secs = 120

[sessions]
default_exercise = "Squat"
end_without_session = "reject"

[auth.tokens]
"token-a" = "user-a"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.server.bind_addr.port(), 4100);
        assert_eq!(config.server.max_frame_bytes, MAX_FRAME_BYTES);
        assert_eq!(
            config.vision.base_url.as_deref(),
            Some("http://localhost:8000")
        );
        assert_eq!(config.vision.failure_threshold, 3);
        assert_eq!(config.vision.cooldown_secs, 10);
        assert_eq!(config.registry.idle_ttl_secs, 120);
        assert_eq!(config.registry.sweep_interval_secs, 60);
        assert_eq!(config.sessions.default_exercise, "Squat");
        assert_eq!(config.sessions.end_without_session, EndPolicy::Reject);
        assert_eq!(
            config.auth.tokens.get("token-a").map(String::as_str),
            Some("user-a")
        );
    }

    #[test]
    fn load_config_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[server\nbind_addr = ").expect("write config");
        let err = load_config(Some(path)).expect_err("malformed config");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = DaemonConfig::default();
        let vars: HashMap<&str, &str> = [
            ("FORMCOACH_BIND_ADDR", "127.0.0.1:9000"),
            ("PYTHON_SERVICE_URL", "http://legacy:8000"),
            ("FORMCOACH_DB_PATH", "/tmp/sessions.db"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| vars.get(key).map(|value| value.to_string()))
            .expect("apply overrides");

        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.vision.base_url.as_deref(), Some("http://legacy:8000"));
        assert_eq!(
            config.storage.db_path,
            Some(PathBuf::from("/tmp/sessions.db"))
        );
    }

    #[test]
    fn validate_accepts_defaults() {
        DaemonConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut zero_timeout = DaemonConfig::default();
        zero_timeout.vision.request_timeout_secs = 0;
        let err = zero_timeout.validate().expect_err("zero timeout");
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "vision.request_timeout_secs")
        );

        let mut long_cooldown = DaemonConfig::default();
        long_cooldown.vision.cooldown_secs = u64::MAX;
        assert!(long_cooldown.validate().is_err());
        assert_eq!(long_cooldown.vision.cooldown(), chrono::Duration::seconds(86_400));

        let mut long_ttl = DaemonConfig::default();
        long_ttl.registry.idle_ttl_secs = u64::MAX;
        assert!(long_ttl.validate().is_err());

        let mut no_threshold = DaemonConfig::default();
        no_threshold.vision.failure_threshold = 0;
        assert!(no_threshold.validate().is_err());
    }

    #[test]
    fn env_override_rejects_bad_bind_addr() {
        let mut config = DaemonConfig::default();
        let err = config
            .apply_overrides(|key| (key == "FORMCOACH_BIND_ADDR").then(|| "nope".to_string()))
            .expect_err("bad addr");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
