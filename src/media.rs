use crate::config::MediaConstraints;
use crate::error::MediaError;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    fn stop(&self);
}

pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;
}

/// getUserMedia-подобный API платформы
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, MediaError>;
}

/// Владеет локальным потоком в пределах одной попытки звонка
pub struct MediaAcquirer {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    local: Option<Arc<dyn MediaStream>>,
}

impl MediaAcquirer {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            local: None,
        }
    }

    pub fn current(&self) -> Option<Arc<dyn MediaStream>> {
        self.local.clone()
    }

    pub fn is_held(&self) -> bool {
        self.local.is_some()
    }

    /// Запрос устройств в отрыве от `self`, чтобы не держать цикл событий
    pub fn request(
        &self,
    ) -> impl Future<Output = Result<Arc<dyn MediaStream>, MediaError>> + Send + 'static {
        let devices = self.devices.clone();
        let constraints = self.constraints;
        async move { devices.get_user_media(constraints).await }
    }

    /// Сохраняет полученный поток; если поток уже есть, новый сразу гасится
    pub fn hold(&mut self, stream: Arc<dyn MediaStream>) -> Arc<dyn MediaStream> {
        match &self.local {
            Some(held) => {
                if held.id() != stream.id() {
                    debug!("Local stream already held, stopping duplicate {}", stream.id());
                    stop_tracks(&stream);
                }
                held.clone()
            }
            None => {
                info!("Local stream {} acquired", stream.id());
                self.local = Some(stream.clone());
                stream
            }
        }
    }

    /// Идемпотентно: при наличии потока повторного запроса нет
    pub async fn acquire(&mut self) -> Result<Arc<dyn MediaStream>, MediaError> {
        if let Some(stream) = &self.local {
            return Ok(stream.clone());
        }
        let stream = self.request().await?;
        Ok(self.hold(stream))
    }

    /// Переключает первую дорожку нужного типа; возвращает новое значение флага
    /// "выключено" или `None`, если переключать нечего
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let stream = self.local.as_ref()?;
        let track = stream.tracks().into_iter().find(|t| t.kind() == kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        debug!("{:?} track enabled={}", kind, enabled);
        Some(!enabled)
    }

    /// Останавливает все дорожки; повторный вызов ничего не делает
    pub fn release(&mut self) -> bool {
        match self.local.take() {
            Some(stream) => {
                info!("Releasing local stream {}", stream.id());
                stop_tracks(&stream);
                true
            }
            None => false,
        }
    }
}

pub(crate) fn stop_tracks(stream: &Arc<dyn MediaStream>) {
    for track in stream.tracks() {
        track.stop();
    }
}
