use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Текущее время в миллисекундах Unix
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Ссылка-приглашение: `{base}?peer={id}`
pub fn invite_link(base: &str, local_id: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{}{}peer={}", base, sep, urlencoding::encode(local_id))
}

/// Достаёт id собеседника из ссылки-приглашения
pub fn peer_from_invite(link: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "peer")
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_is_added_by_type() {
        assert_eq!(add_ice_url_scheme(&server("turn", "relay:3478")), "turn:relay:3478");
        assert_eq!(add_ice_url_scheme(&server("stun", "stun.host:19302")), "stun:stun.host:19302");
        assert_eq!(add_ice_url_scheme(&server("turn", "stun:x:1")), "stun:x:1");
    }

    #[test]
    fn invite_link_round_trip() {
        let link = invite_link("https://call.example/", "ab cd");
        assert_eq!(link, "https://call.example/?peer=ab%20cd");
        assert_eq!(peer_from_invite(&link).as_deref(), Some("ab cd"));
    }

    #[test]
    fn invite_link_keeps_existing_query() {
        let link = invite_link("https://call.example/?lang=en", "B123");
        assert_eq!(link, "https://call.example/?lang=en&peer=B123");
        assert_eq!(peer_from_invite(&link).as_deref(), Some("B123"));
    }

    #[test]
    fn missing_or_empty_peer_param() {
        assert_eq!(peer_from_invite("https://call.example/"), None);
        assert_eq!(peer_from_invite("https://call.example/?peer="), None);
        assert_eq!(peer_from_invite("https://call.example/?x=1#peer=2"), None);
    }

    #[test]
    fn random_ids_are_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
