//! Команды UI-слоя: намерения пользователя уходят в цикл сессии,
//! ответ приходит через oneshot.

pub mod call_api;
pub mod util_api;

use crate::error::CallError;
use crate::events::Emitter;
use crate::identity::IdentityService;
use crate::media::TrackKind;
use crate::session::Message;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub(crate) enum Command {
    StartCall {
        target: String,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    EndCall {
        reply: oneshot::Sender<()>,
    },
    Toggle {
        kind: TrackKind,
        reply: oneshot::Sender<Option<bool>>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<Message>,
    },
    Transcript {
        reply: oneshot::Sender<Vec<Message>>,
    },
}

/// Хэндл для UI. Клонируется; цикл сессии живёт, пока жив хотя бы один хэндл
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
    emitter: Arc<Emitter>,
    identity: Arc<IdentityService>,
    invite_base: String,
}

impl CallHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        emitter: Arc<Emitter>,
        identity: Arc<IdentityService>,
        invite_base: String,
    ) -> Self {
        Self {
            commands,
            emitter,
            identity,
            invite_base,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }
}
