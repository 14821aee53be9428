//! Bot configuration.
//!
//! Values are layered, lowest precedence first:
//! built-in defaults, the TOML config file, `ROSTERBOT__SECTION__KEY`
//! environment variables, then the well-known variables `BOT_EMAIL`,
//! `BOT_PASSWORD`, `DATABASE_URL` and `PG*`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "rosterbot";

/// Default WebSocket endpoint of the chat bridge.
pub const DEFAULT_CHAT_ENDPOINT: &str = "ws://127.0.0.1:7420/bridge";

/// Default Postgres port.
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Well-known environment variables and the config keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("BOT_EMAIL", "chat.email"),
    ("BOT_PASSWORD", "chat.password"),
    ("DATABASE_URL", "database.url"),
    ("PGDATABASE", "database.name"),
    ("PGHOST", "database.host"),
    ("PGPORT", "database.port"),
    ("PGUSER", "database.user"),
    ("PGPASSWORD", "database.password"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub chat: ChatConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Chat bridge connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// WebSocket URL of the chat bridge.
    pub endpoint: String,
    /// Login name of the bot account.
    pub email: Option<String>,
    /// Password of the bot account.
    pub password: Option<String>,
    /// Device identifier the account is bound to, if any.
    pub device_id: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            email: None,
            password: None,
            device_id: None,
        }
    }
}

/// Login credentials for the chat service.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub device_id: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl ChatConfig {
    /// Resolve login credentials, failing if either half is missing.
    pub fn credentials(&self) -> Result<Credentials> {
        let username = non_empty(self.email.as_deref())
            .ok_or_else(|| anyhow!("bot email not configured (set BOT_EMAIL or chat.email)"))?;
        let password = non_empty(self.password.as_deref()).ok_or_else(|| {
            anyhow!("bot password not configured (set BOT_PASSWORD or chat.password)")
        })?;

        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
            device_id: non_empty(self.device_id.as_deref()).map(str::to_string),
        })
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection string. Only used when `host` is unset.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: DEFAULT_PG_PORT,
            name: None,
            user: None,
            password: None,
            max_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    /// Build the connection string.
    ///
    /// Discrete parameters win over `url`. A host starting with `/` is a
    /// unix socket directory and is passed through the `host` query
    /// parameter.
    pub fn connection_url(&self) -> Result<String> {
        let Some(host) = non_empty(self.host.as_deref()) else {
            return non_empty(self.url.as_deref())
                .map(str::to_string)
                .ok_or_else(|| {
                    anyhow!("no database configured (set PGHOST or DATABASE_URL)")
                });
        };

        let mut url = String::from("postgres://");
        if let Some(user) = non_empty(self.user.as_deref()) {
            url.push_str(&urlencoding::encode(user));
            if let Some(password) = non_empty(self.password.as_deref()) {
                url.push(':');
                url.push_str(&urlencoding::encode(password));
            }
            url.push('@');
        }

        let socket_dir = host.starts_with('/').then_some(host);
        url.push_str(if socket_dir.is_some() { "localhost" } else { host });
        url.push_str(&format!(":{}", self.port));

        if let Some(name) = non_empty(self.name.as_deref()) {
            url.push('/');
            url.push_str(&urlencoding::encode(name));
        }
        if let Some(dir) = socket_dir {
            url.push_str("?host=");
            url.push_str(&urlencoding::encode(dir));
        }

        Ok(url)
    }

    /// Connection target without credentials, for logs.
    pub fn describe(&self) -> String {
        match non_empty(self.host.as_deref()) {
            Some(host) => format!(
                "{}:{}/{}",
                host,
                self.port,
                non_empty(self.name.as_deref()).unwrap_or("")
            ),
            None => "DATABASE_URL".to_string(),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BotConfig {
    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "<redacted>".to_string());
        let mut config = self.clone();
        config.chat.password = mask(&self.chat.password);
        config.database.password = mask(&self.database.password);
        config.database.url = mask(&self.database.url);
        config
    }

    /// Load configuration from `config_file` and the process environment.
    pub fn load(config_file: &Path) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(config_file, &env)
    }

    /// Load configuration from `config_file` and an explicit environment.
    pub fn load_from(config_file: &Path, env: &HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .separator("__")
                    .source(Some(env.clone().into_iter().collect())),
            );

        for (var, key) in ENV_OVERRIDES {
            let value = env.get(*var).filter(|v| !v.is_empty()).cloned();
            builder = builder.set_override_option(*key, value)?;
        }

        let built = builder
            .build()
            .with_context(|| format!("loading config from {}", config_file.display()))?;
        built
            .try_deserialize()
            .context("deserializing configuration")
    }
}

/// Write the default configuration file, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = BotConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# Credentials are usually supplied via BOT_EMAIL / BOT_PASSWORD and PG* variables.\n");
    body.push('\n');
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
