use crate::utils::{now_millis, random_id};
use serde::{Deserialize, Serialize};

/// Статус звонка. `Ended` как отдельное состояние не наблюдается:
/// после teardown статус сразу схлопывается в `Idle` (см. `CallEvent::Ended`)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
}

/// Текущий звонок. Инвариант: `remote_id` не пуст тогда и только тогда,
/// когда статус `Connecting` или `Connected`
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub local_id: String,
    pub remote_id: String,
    pub status: CallStatus,
    pub audio_muted: bool,
    pub video_stopped: bool,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status != CallStatus::Idle
    }

    pub(crate) fn begin(&mut self, remote_id: &str, status: CallStatus) {
        debug_assert!(!remote_id.is_empty());
        self.remote_id = remote_id.to_string();
        self.status = status;
    }

    /// Сброс к Idle; возвращает true, если что-то изменилось
    pub(crate) fn reset(&mut self) -> bool {
        let before = self.clone();
        self.remote_id.clear();
        self.status = CallStatus::Idle;
        self.audio_muted = false;
        self.video_stopped = false;
        before != *self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Me,
    Peer,
    System,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: i64,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: random_id(),
            sender,
            text: text.into(),
            timestamp: now_millis(),
        }
    }
}

/// Лента сообщений: только дописывается, переживает сброс звонка
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_call_fields_but_keeps_local_id() {
        let mut session = Session {
            local_id: "me".into(),
            ..Default::default()
        };
        session.begin("B123", CallStatus::Connecting);
        session.audio_muted = true;
        assert!(session.is_active());

        assert!(session.reset());
        assert_eq!(session.local_id, "me");
        assert_eq!(session.remote_id, "");
        assert_eq!(session.status, CallStatus::Idle);
        assert!(!session.audio_muted);

        // повторный сброс ничего не меняет
        assert!(!session.reset());
    }

    #[test]
    fn transcript_is_append_only() {
        let mut transcript = Transcript::default();
        transcript.push(Message::new(Sender::Me, "one"));
        transcript.push(Message::new(Sender::Peer, "two"));
        let texts: Vec<_> = transcript.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two"]);
        assert_eq!(transcript.messages()[1].sender, Sender::Peer);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&CallStatus::Connecting).unwrap(), "\"CONNECTING\"");
        assert_eq!(serde_json::to_string(&Sender::System).unwrap(), "\"system\"");
    }
}
