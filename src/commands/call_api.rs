use super::{CallHandle, Command};
use crate::error::CallError;
use crate::media::TrackKind;

impl CallHandle {
    /// Звонок по идентификатору собеседника; итог приходит событиями
    pub async fn start_call(&self, target: impl Into<String>) -> Result<(), CallError> {
        let target = target.into();
        self.request(|reply| Command::StartCall { target, reply })
            .await?
    }

    /// Завершение звонка; безопасно вызывать повторно
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::EndCall { reply }).await
    }

    /// Новое значение `audio_muted`, `None` если локального медиа нет
    pub async fn toggle_audio(&self) -> Result<Option<bool>, CallError> {
        self.request(|reply| Command::Toggle {
            kind: TrackKind::Audio,
            reply,
        })
        .await
    }

    pub async fn toggle_video(&self) -> Result<Option<bool>, CallError> {
        self.request(|reply| Command::Toggle {
            kind: TrackKind::Video,
            reply,
        })
        .await
    }
}
