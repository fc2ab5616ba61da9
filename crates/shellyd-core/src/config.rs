use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shellyd_proto::{SecurityProfileWire, SettingKey, SettingsValue};

use crate::error::ShellydError;

/// Filesystem layout under `~/.shellyd/` (spec.md 6).
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self, ShellydError> {
        let home = dirs::home_dir().ok_or(ShellydError::HomeDirUnresolved)?;
        Ok(Self {
            root: home.join(".shellyd"),
        })
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn authorized_keys(&self) -> PathBuf {
        self.root.join("authorized_keys")
    }

    pub fn certificate(&self) -> PathBuf {
        self.root.join("server.crt")
    }

    pub fn private_key(&self) -> PathBuf {
        self.root.join("server.key")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.root.join("audit.log")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("shellyd.pid")
    }

    pub fn pairing_code(&self) -> PathBuf {
        self.root.join("pairing_code")
    }

    pub fn ensure_root(&self) -> Result<(), ShellydError> {
        fs::create_dir_all(&self.root).map_err(|source| ShellydError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        fs::set_permissions(&self.root, fs::Permissions::from_mode(0o700)).map_err(|source| {
            ShellydError::SetPermissions {
                path: self.root.clone(),
                source,
            }
        })
    }
}

/// On-disk settings, matching the `config.json` schema in spec.md 6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub shell: String,
    pub enable_sudo_interception: bool,
    pub push_notifications_enabled: bool,
    /// Legacy mirror of `session_timeout_seconds`, kept for wire/schema
    /// compatibility with clients that only know the older field name.
    pub session_timeout: u32,
    pub max_connections: u32,
    pub tls_enabled: bool,
    pub certificate_pinning_enabled: bool,
    pub session_timeout_enabled: bool,
    pub session_timeout_seconds: u32,
    pub audit_logging_enabled: bool,
    pub audit_log_retention_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8765,
            host: "0.0.0.0".to_string(),
            shell: default_shell(),
            enable_sudo_interception: true,
            push_notifications_enabled: false,
            session_timeout: 0,
            max_connections: 4,
            tls_enabled: true,
            certificate_pinning_enabled: true,
            session_timeout_enabled: false,
            session_timeout_seconds: 0,
            audit_logging_enabled: true,
            audit_log_retention_days: 30,
        }
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

impl Config {
    pub fn security_profile(&self) -> SecurityProfileWire {
        SecurityProfileWire {
            tls_enabled: self.tls_enabled,
            certificate_pinning_enabled: self.certificate_pinning_enabled,
            session_timeout_enabled: self.session_timeout_enabled,
            session_timeout_seconds: self.session_timeout_seconds,
            audit_logging_enabled: self.audit_logging_enabled,
            audit_log_retention_days: self.audit_log_retention_days,
            max_connections: self.max_connections,
            push_notifications_enabled: self.push_notifications_enabled,
            enable_sudo_interception: self.enable_sudo_interception,
        }
    }

    /// Applies a recognized `settingsUpdate`. Returns `false` when the
    /// setting name is unrecognized or the value has the wrong shape.
    pub fn apply_setting(&mut self, key: SettingKey, value: &SettingsValue) -> bool {
        match key {
            SettingKey::TlsEnabled => self.set_bool(value, |c, v| c.tls_enabled = v),
            SettingKey::CertificatePinningEnabled => {
                self.set_bool(value, |c, v| c.certificate_pinning_enabled = v)
            }
            SettingKey::SessionTimeoutEnabled => {
                self.set_bool(value, |c, v| c.session_timeout_enabled = v)
            }
            SettingKey::AuditLoggingEnabled => {
                self.set_bool(value, |c, v| c.audit_logging_enabled = v)
            }
            SettingKey::PushNotificationsEnabled => {
                self.set_bool(value, |c, v| c.push_notifications_enabled = v)
            }
            SettingKey::EnableSudoInterception => {
                self.set_bool(value, |c, v| c.enable_sudo_interception = v)
            }
            SettingKey::SessionTimeoutSeconds => {
                self.set_u32(value, |c, v| c.session_timeout_seconds = v)
            }
            SettingKey::AuditLogRetentionDays => {
                self.set_u32(value, |c, v| c.audit_log_retention_days = v)
            }
            SettingKey::MaxConnections => self.set_u32(value, |c, v| c.max_connections = v),
        }
    }

    fn set_bool(&mut self, value: &SettingsValue, apply: impl FnOnce(&mut Self, bool)) -> bool {
        match value.as_bool() {
            Some(b) => {
                apply(self, b);
                true
            }
            None => false,
        }
    }

    fn set_u32(&mut self, value: &SettingsValue, apply: impl FnOnce(&mut Self, u32)) -> bool {
        match value.as_int().and_then(|i| u32::try_from(i).ok()) {
            Some(n) => {
                apply(self, n);
                true
            }
            None => false,
        }
    }
}

/// Loads, persists, and bootstraps `config.json`.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load_or_default(&self) -> Result<Config, ShellydError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| ShellydError::ParseConfig {
                    path: self.path.clone(),
                    source,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                self.save(&config)?;
                Ok(config)
            }
            Err(source) => Err(ShellydError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn save(&self, config: &Config) -> Result<(), ShellydError> {
        let json = serde_json::to_string_pretty(config).unwrap_or_default();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ShellydError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, json).map_err(|source| ShellydError::Write {
            path: self.path.clone(),
            source,
        })?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            ShellydError::SetPermissions {
                path: self.path.clone(),
                source,
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
