use serde::Serialize;
use thiserror::Error;

/// Ошибки, которые видит UI
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum CallError {
    /// Фатально: без идентификатора работать нельзя, нужен перезапуск
    #[error("failed to initialize networking: {0}")]
    Initialization(String),
    #[error("camera/microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera/microphone unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("peer {0} not found")]
    PeerUnavailable(String),
    #[error("connection error: {0}")]
    Transport(String),
    #[error("{pending} message(s) could not be delivered")]
    SendWhileDisconnected { pending: usize },
    #[error("a call is already in progress")]
    Busy,
    #[error("local identifier is not assigned yet")]
    NotReady,
    #[error("target identifier is empty")]
    EmptyTarget,
    #[error("call session loop has stopped")]
    Closed,
}

/// Отказ платформы выдать камеру/микрофон
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Ошибки rendezvous-транспорта
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {0} is unavailable")]
    PeerUnavailable(String),
    #[error("{0}")]
    Failure(String),
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied(msg) => CallError::PermissionDenied(msg),
            MediaError::DeviceUnavailable(msg) => CallError::DeviceUnavailable(msg),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PeerUnavailable(id) => CallError::PeerUnavailable(id),
            TransportError::Failure(msg) => CallError::Transport(msg),
        }
    }
}

impl From<webrtc::Error> for TransportError {
    fn from(err: webrtc::Error) -> Self {
        TransportError::Failure(err.to_string())
    }
}
