use super::{CallHandle, Command};
use crate::error::CallError;
use crate::events::CallEvent;
use crate::session::{CallStatus, Message, Session};
use crate::utils::invite_link;
use tokio::sync::{broadcast, watch};

impl CallHandle {
    /// текст по каналу; сообщение сразу попадает в ленту
    pub async fn send_text(&self, text: impl Into<String>) -> Result<Message, CallError> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply }).await
    }

    pub async fn transcript(&self) -> Result<Vec<Message>, CallError> {
        self.request(|reply| Command::Transcript { reply }).await
    }

    pub fn session(&self) -> Session {
        self.emitter.watch_state().borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.emitter.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.emitter.subscribe()
    }

    /// проверка готовности соединения
    pub fn is_connected(&self) -> bool {
        self.session().status == CallStatus::Connected
    }

    pub fn local_id(&self) -> Option<String> {
        self.identity.local_id()
    }

    pub fn watch_local_id(&self) -> watch::Receiver<Option<String>> {
        self.identity.subscribe()
    }

    /// Ссылка-приглашение; `None`, пока id не назначен
    pub fn invite_link(&self) -> Option<String> {
        self.local_id().map(|id| invite_link(&self.invite_base, &id))
    }
}
