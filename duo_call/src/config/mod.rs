use config::{Config, ConfigError, Environment, File};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::{error, info};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay endpoint; the channel adapter appends `?userId=<role>`.
    pub signaling_server: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// "all" or "relay"
    pub ice_transport_policy: String,
    pub stats_interval_ms: u64,
}

impl RtcConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// "term" or "json"
    pub format: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CallConfig {
    pub call_id: String,
    /// Start a fresh Session in the same call after one ends.
    pub rejoin: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub rtc: RtcConfig,
    pub call: CallConfig,
}

// active configuration; each new Session is built from a snapshot of it
pub static CONFIG: Lazy<Arc<RwLock<AppConfig>>> =
    Lazy::new(|| Arc::new(RwLock::new(AppConfig::default())));

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            signaling_server: "ws://127.0.0.1:8080/ws/signaling".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "term".to_string(),
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            ice_transport_policy: "all".to_string(),
            stats_interval_ms: 1000,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            call_id: "call1".to_string(),
            rejoin: false,
        }
    }
}

impl AppConfig {
    /// File values layered with `DUO_CALL__SECTION__KEY` environment overrides.
    pub async fn load(config_path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(Environment::with_prefix("DUO_CALL").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Snapshot of the active configuration.
    pub async fn current() -> Self {
        CONFIG.read().await.clone()
    }

    pub async fn reload(config_path: &str) -> Result<(), ConfigError> {
        let new_config = Self::load(config_path).await?;
        let mut config = CONFIG.write().await;
        *config = new_config;
        info!("configuration reloaded from {}", config_path);
        Ok(())
    }

    /// Reload `CONFIG` whenever the file changes. The watcher stops when the
    /// returned handle is dropped. Must be called inside a tokio runtime.
    pub fn watch_config(config_path: String) -> notify::Result<RecommendedWatcher> {
        let runtime = tokio::runtime::Handle::current();
        let path = config_path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(_) => {
                    let path = path.clone();
                    runtime.spawn(async move {
                        if let Err(e) = AppConfig::reload(&path).await {
                            error!("failed to reload config: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("config watch error: {}", e);
                }
            },
            notify::Config::default(),
        )?;

        watcher.watch(Path::new(&config_path), RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}
