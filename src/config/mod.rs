use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StopkranError};

/// Returns the global config directory path: `~/.config/stopkran/`
pub fn dirs_global() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("stopkran")
}

/// Default config file location: `~/.config/stopkran/config.yml`
pub fn default_config_path() -> PathBuf {
    dirs_global().join("config.yml")
}

/// Seconds the hook client waits beyond the daemon timeout, so the daemon's
/// `timed_out` answer always reaches it before its own receive deadline.
pub const HOOK_MARGIN_SECS: u64 = 10;

/// Daemon configuration from `~/.config/stopkran/config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Telegram bot token.
    #[serde(default)]
    pub token: Option<String>,

    /// Owner chat, set by `/start`.
    #[serde(default)]
    pub chat_id: Option<i64>,

    /// Seconds before an unanswered request times out. Default: 300.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Marker file whose presence pauses mediation.
    #[serde(default = "default_pause_file")]
    pub pause_file: PathBuf,

    /// How long in-flight connections may drain on shutdown. Default: 5.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Long-poll timeout passed to `getUpdates`. Default: 30.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    300
}
fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/stopkran.sock")
}
fn default_pause_file() -> PathBuf {
    dirs_global().join("paused")
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_api_base_url() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            chat_id: None,
            timeout_secs: default_timeout(),
            socket_path: default_socket_path(),
            pause_file: default_pause_file(),
            shutdown_grace_secs: default_shutdown_grace(),
            api_base_url: default_api_base_url(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl Config {
    /// Load config from a YAML file. Returns default if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| StopkranError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load config and apply `STOPKRAN_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from(path)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("STOPKRAN_TOKEN") {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
        if let Ok(socket) = std::env::var("STOPKRAN_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Ok(pause) = std::env::var("STOPKRAN_PAUSE_FILE") {
            self.pause_file = PathBuf::from(pause);
        }
    }

    /// Check the settings the daemon cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.token.as_deref().map_or(true, str::is_empty) {
            return Err(StopkranError::Config {
                reason: "no bot token configured".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(StopkranError::Config {
                reason: "timeout_secs must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Receive deadline for the hook client.
    pub fn hook_timeout_secs(&self) -> u64 {
        self.timeout_secs + HOOK_MARGIN_SECS
    }

    /// Write the config back atomically with owner-only permissions. The
    /// file holds the bot token.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(yaml.as_bytes())?;
            file.sync_all()?;
        }
        set_file_permissions_0600(&tmp_path);
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) fn set_file_permissions_0600(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    let _ = fs::set_permissions(path, perms);
}

#[cfg(not(unix))]
pub(crate) fn set_file_permissions_0600(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_from(&tmp.path().join("nope.yml")).unwrap();
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.shutdown_grace_secs, 5);
        assert!(config.token.is_none());
        assert_eq!(config.hook_timeout_secs(), 310);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yml");
        fs::write(&path, "token: abc\ntimeout_secs: 42\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.timeout_secs, 42);
        assert_eq!(config.api_base_url, "https://api.telegram.org");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_yaml_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yml");
        fs::write(&path, "timeout_secs: [not, a, number]\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, StopkranError::ConfigParse { .. }));
    }

    #[test]
    fn validate_rejects_missing_token_and_zero_timeout() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let config = Config {
            token: Some("t".into()),
            timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load_keeps_chat_id() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.yml");
        let config = Config {
            token: Some("t".into()),
            chat_id: Some(4242),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.chat_id, Some(4242));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
