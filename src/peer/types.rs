use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Идентификатор data-link внутри менеджера каналов
pub type LinkId = u64;

/// Корреляционный ключ попытки звонка: события медиасессии помечаются им
pub type AttemptId = u64;

/// Полезная нагрузка, передаваемая по data-link
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WirePayload {
    Chat { text: String },
}

impl WirePayload {
    pub fn chat(text: impl Into<String>) -> Self {
        WirePayload::Chat { text: text.into() }
    }

    pub fn encode(&self) -> Bytes {
        // сериализация enum без map-ключей не падает
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Неизвестный тип или битый JSON - не ошибка, просто игнорируем
    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}
