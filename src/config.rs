use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::domain::{Coverage, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub store: StoreConfig,
    pub db: DbConfig,
    pub auth: AuthConfig,
    pub merge: MergeConfig,
    pub sync: SyncConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub cors_origin: String,
    pub request_timeout_secs: u64,
    /// JSON log lines; plain text when false
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
            cors_origin: "http://localhost:5173".to_string(),
            request_timeout_secs: 30,
            log_json: true,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Hosted backend-as-a-service: REST tables, auth and functions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub http_timeout_seconds: u64,
    pub read_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            http_timeout_seconds: 10,
            read_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Hosted,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Preload the in-memory store with sample Lagos stations
    pub seed_demo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fuel_tracker".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accounts treated as administrators regardless of their profile role
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub coverage: Coverage,
    pub page_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            coverage: Coverage::PetrolBase,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub source_url: String,
    pub interval_minutes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source_url: String::new(),
            interval_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::figment().extract().map_err(Into::into)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("FUEL__").split("__"))
    }

    /// Startup checks for settings the chosen backend cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.store.kind == StoreKind::Hosted {
            if self.backend.url.trim().is_empty() {
                anyhow::bail!("backend URL missing: set FUEL__BACKEND__URL");
            }
            if self.backend.anon_key.trim().is_empty() {
                anyhow::bail!("backend API key missing: set FUEL__BACKEND__ANON_KEY");
            }
        }
        if self.sync.enabled && self.sync.source_url.trim().is_empty() {
            anyhow::bail!("form sync enabled without sync.source_url");
        }
        if self.merge.page_size == 0 {
            anyhow::bail!("merge.page_size must be at least 1");
        }
        Ok(())
    }
}
