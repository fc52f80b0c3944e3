//! Контракты внешних коллабораторов: rendezvous-транспорт, медиасессия, data-link.
//!
//! Колбэки транспорта переведены в каналы: каждый объект один раз отдаёт
//! приёмник своих событий (`take_events`), порядок внутри объекта сохраняется.

use crate::error::TransportError;
use crate::media::MediaStream;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Непрозрачный хэндл удалённого потока
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Stream(RemoteStream),
    Closed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Open,
    Data(Bytes),
    Closed,
    Error(String),
}

/// Входящие уведомления от rendezvous-слоя
pub enum TransportEvent {
    IncomingCall(Box<dyn MediaSession>),
    IncomingLink(Arc<dyn DataLink>),
    Error(TransportError),
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::IncomingCall(call) => write!(f, "IncomingCall({})", call.peer()),
            TransportEvent::IncomingLink(link) => write!(f, "IncomingLink({})", link.peer()),
            TransportEvent::Error(err) => write!(f, "Error({err})"),
        }
    }
}

#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Запрос идентификатора этого узла
    async fn open(&self) -> Result<String, TransportError>;

    /// Исходящая медиасессия; завершение приходит событиями
    fn call(
        &self,
        remote_id: &str,
        stream: Arc<dyn MediaStream>,
    ) -> Result<Box<dyn MediaSession>, TransportError>;

    /// Исходящий data-link; пригоден для отправки только после `LinkEvent::Open`
    fn connect(&self, remote_id: &str) -> Result<Arc<dyn DataLink>, TransportError>;
}

#[async_trait]
pub trait MediaSession: Send + Sync {
    fn peer(&self) -> &str;

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MediaEvent>>;

    /// Ответ на входящий звонок локальным потоком
    async fn answer(&self, stream: Arc<dyn MediaStream>) -> Result<(), TransportError>;

    async fn close(&self);
}

#[async_trait]
pub trait DataLink: Send + Sync {
    fn peer(&self) -> &str;

    fn is_open(&self) -> bool;

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>>;

    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    async fn close(&self);
}
