use crate::error::CallError;
use crate::session::{Message, Session};
use crate::transport::RemoteStream;
use log::{debug, warn};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

/// Буфер событий для медленных подписчиков UI
pub const EVENT_CAPACITY: usize = 256;

/// События для UI-слоя
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum CallEvent {
    Ready { local_id: String },
    State(Session),
    LocalStream(Option<String>),
    RemoteStream(Option<RemoteStream>),
    Message(Message),
    Error(CallError),
    Ended { remote_id: String },
}

/// Рассылка состояния и событий подписчикам
pub struct Emitter {
    events: broadcast::Sender<CallEvent>,
    state: watch::Sender<Session>,
}

impl Emitter {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(Session::default());
        Self { events, state }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    fn emit(&self, event: CallEvent) {
        // нет подписчиков - не ошибка
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    /// Публикует снимок сессии, только если он изменился
    pub fn emit_state(&self, session: &Session) {
        let changed = self.state.send_if_modified(|current| {
            if current != session {
                *current = session.clone();
                true
            } else {
                false
            }
        });
        if changed {
            debug!(
                "emit_state: status={:?} remote={:?}",
                session.status, session.remote_id
            );
            self.emit(CallEvent::State(session.clone()));
        }
    }

    pub fn emit_ready(&self, local_id: &str) {
        self.emit(CallEvent::Ready {
            local_id: local_id.to_string(),
        });
    }

    pub fn emit_message(&self, message: &Message) {
        self.emit(CallEvent::Message(message.clone()));
    }

    pub fn emit_local_stream(&self, id: Option<&str>) {
        self.emit(CallEvent::LocalStream(id.map(str::to_string)));
    }

    pub fn emit_remote_stream(&self, stream: Option<RemoteStream>) {
        self.emit(CallEvent::RemoteStream(stream));
    }

    pub fn emit_error(&self, err: CallError) {
        warn!("emit_error: {}", err);
        self.emit(CallEvent::Error(err));
    }

    pub fn emit_ended(&self, remote_id: &str) {
        self.emit(CallEvent::Ended {
            remote_id: remote_id.to_string(),
        });
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}
