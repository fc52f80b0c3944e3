// Конфигурация приложения
// Фильтр логирования по умолчанию зависит от режима сборки, RUST_LOG его переопределяет

use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug"; // В режиме отладки логируем подробно

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn"; // В продакшене только предупреждения

/// Метка data-channel для чата
pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

pub const DEFAULT_INVITE_BASE: &str = "http://localhost:3000/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server {0}: url cannot be empty")]
    EmptyUrl(String),
    #[error("server {0}: TURN servers require username and credential")]
    MissingTurnCredentials(String),
    #[error("media constraints request neither audio nor video")]
    NoMedia,
}

/// Какие устройства запрашивать у платформы
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub channel_label: String,
    pub media: MediaConstraints,
    pub invite_base: String,
    pub log_filter: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            channel_label: DEFAULT_CHANNEL_LABEL.into(),
            media: MediaConstraints::default(),
            invite_base: DEFAULT_INVITE_BASE.into(),
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl CallConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Проверка серверов: пустой url и TURN без учётных данных недопустимы
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::EmptyUrl(server.id.clone()));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
            }
        }

        if !self.media.audio && !self.media.video {
            return Err(ConfigError::NoMedia);
        }
        Ok(())
    }
}

/// Дефолтные публичные STUN серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
