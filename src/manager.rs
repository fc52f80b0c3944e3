//! Машина состояний звонка.
//!
//! Один tokio-таск владеет сессией и реагирует на команды UI, события
//! транспорта, завершение запроса медиа и события медиасессии/data-link.
//! Звонок - это пара ресурсов (медиасессия + data-link) с общим `remote_id`;
//! в `Connected` переводит только появление удалённого потока.

use crate::commands::{CallHandle, Command};
use crate::config::CallConfig;
use crate::error::{CallError, MediaError, TransportError};
use crate::events::Emitter;
use crate::identity::IdentityService;
use crate::logger;
use crate::media::{stop_tracks, MediaAcquirer, MediaDevices, MediaStream, TrackKind};
use crate::peer::data_channel::{DataChannelManager, LinkNotice};
use crate::peer::types::{AttemptId, LinkId, WirePayload};
use crate::session::{CallStatus, Message, Sender, Session, Transcript};
use crate::transport::{
    DataLink, LinkEvent, MediaEvent, MediaSession, Rendezvous, RemoteStream, TransportEvent,
};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum Internal {
    Identity(Result<String, CallError>),
    Acquired {
        attempt: AttemptId,
        result: Result<Arc<dyn MediaStream>, MediaError>,
    },
    Media {
        attempt: AttemptId,
        event: MediaEvent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

/// Ресурсы текущей попытки звонка
struct ActiveCall {
    attempt: AttemptId,
    remote_id: String,
    direction: Direction,
    media_session: Option<Box<dyn MediaSession>>,
    forwarder: Option<JoinHandle<()>>,
    remote_stream: Option<RemoteStream>,
}

impl ActiveCall {
    fn new(attempt: AttemptId, remote_id: &str, direction: Direction) -> Self {
        Self {
            attempt,
            remote_id: remote_id.to_string(),
            direction,
            media_session: None,
            forwarder: None,
            remote_stream: None,
        }
    }
}

pub struct CallSessionManager {
    transport: Arc<dyn Rendezvous>,
    identity: Arc<IdentityService>,
    media: MediaAcquirer,
    links: DataChannelManager,
    session: Session,
    transcript: Transcript,
    call: Option<ActiveCall>,
    next_attempt: AttemptId,
    emitter: Arc<Emitter>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

/// Запускает цикл сессии и возвращает хэндл для UI.
/// `transport_events` - входящие уведомления rendezvous-слоя
pub fn spawn(
    config: CallConfig,
    transport: Arc<dyn Rendezvous>,
    devices: Arc<dyn MediaDevices>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> CallHandle {
    logger::init(&config.log_filter);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (link_tx, link_rx) = mpsc::unbounded_channel();

    let emitter = Arc::new(Emitter::new());
    let identity = Arc::new(IdentityService::new());

    let manager = CallSessionManager {
        transport: transport.clone(),
        identity: identity.clone(),
        media: MediaAcquirer::new(devices, config.media),
        links: DataChannelManager::new(transport, link_tx),
        session: Session::default(),
        transcript: Transcript::default(),
        call: None,
        next_attempt: 1,
        emitter: emitter.clone(),
        internal_tx,
    };

    let handle = CallHandle::new(command_tx, emitter, identity, config.invite_base);
    tokio::spawn(manager.run(command_rx, transport_events, internal_rx, link_rx));
    handle
}

impl CallSessionManager {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut link_events: mpsc::UnboundedReceiver<(LinkId, LinkEvent)>,
    ) {
        self.request_identity();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = transport_events.recv() => self.on_transport_event(event).await,
                Some(event) = internal.recv() => self.on_internal(event).await,
                Some((id, event)) = link_events.recv() => self.on_link_event(id, event).await,
            }
        }

        info!("All call handles dropped - stopping session loop");
        self.teardown().await;
    }

    fn request_identity(&self) {
        let identity = self.identity.clone();
        let transport = self.transport.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = identity.initialize(transport.as_ref()).await;
            let _ = tx.send(Internal::Identity(result));
        });
    }

    fn next_attempt(&mut self) -> AttemptId {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        attempt
    }

    fn publish(&self) {
        debug_assert_eq!(
            self.session.remote_id.is_empty(),
            self.session.status == CallStatus::Idle,
            "remote_id must be set exactly while a call is in progress"
        );
        self.emitter.emit_state(&self.session);
    }

    fn append(&mut self, message: Message) -> Message {
        let message = self.transcript.push(message).clone();
        self.emitter.emit_message(&message);
        message
    }

    fn report_undelivered(&mut self, pending: usize) {
        self.append(Message::new(
            Sender::System,
            format!("{pending} message(s) could not be delivered"),
        ));
        self.emitter
            .emit_error(CallError::SendWhileDisconnected { pending });
    }

    /// ========== COMMANDS ==========

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::StartCall { target, reply } => {
                let result = self.start_call(target).await;
                let _ = reply.send(result);
            }
            Command::EndCall { reply } => {
                info!("end_call requested");
                self.teardown().await;
                let _ = reply.send(());
            }
            Command::Toggle { kind, reply } => {
                let _ = reply.send(self.toggle(kind));
            }
            Command::SendText { text, reply } => {
                let message = self.send_text(text).await;
                let _ = reply.send(message);
            }
            Command::Transcript { reply } => {
                let _ = reply.send(self.transcript.messages().to_vec());
            }
        }
    }

    async fn start_call(&mut self, target: String) -> Result<(), CallError> {
        let target = target.trim().to_string();
        if target.is_empty() {
            return Err(CallError::EmptyTarget);
        }
        if self.session.local_id.is_empty() {
            return Err(CallError::NotReady);
        }
        if self.call.is_some() || self.session.is_active() {
            warn!("start_call({}) rejected - call already in progress", target);
            return Err(CallError::Busy);
        }

        self.rebind_links(&target).await;
        let attempt = self.next_attempt();
        self.call = Some(ActiveCall::new(attempt, &target, Direction::Outbound));
        self.session.begin(&target, CallStatus::Connecting);
        self.publish();
        info!("Calling {} (attempt {})", target, attempt);

        self.acquire_media(attempt);
        Ok(())
    }

    fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let disabled = self.media.toggle(kind)?;
        match kind {
            TrackKind::Audio => self.session.audio_muted = disabled,
            TrackKind::Video => self.session.video_stopped = disabled,
        }
        self.publish();
        Some(disabled)
    }

    /// Сообщение попадает в ленту сразу, доставка - по готовности канала
    async fn send_text(&mut self, text: String) -> Message {
        let message = self.append(Message::new(Sender::Me, text.clone()));
        match self.links.send(&WirePayload::chat(text)).await {
            Ok(outcome) => debug!("send_text: {:?}", outcome),
            Err(CallError::SendWhileDisconnected { pending }) => self.report_undelivered(pending),
            Err(e) => warn!("send_text failed: {}", e),
        }
        message
    }

    /// Каналы привязаны к одному собеседнику; чужие закрываем
    async fn rebind_links(&mut self, remote_id: &str) {
        if self.links.scope().is_some_and(|scope| scope != remote_id) {
            let dropped = self.links.close_all().await;
            if dropped > 0 {
                self.report_undelivered(dropped);
            }
        }
        self.links.bind(remote_id);
    }

    /// ========== MEDIA ==========

    fn acquire_media(&self, attempt: AttemptId) {
        if let Some(stream) = self.media.current() {
            let _ = self.internal_tx.send(Internal::Acquired {
                attempt,
                result: Ok(stream),
            });
            return;
        }
        let request = self.media.request();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = tx.send(Internal::Acquired { attempt, result });
        });
    }

    fn bind_media_session(&mut self, session: Box<dyn MediaSession>) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let attempt = call.attempt;
        call.forwarder = session.take_events().map(|mut events| {
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send(Internal::Media { attempt, event }).is_err() {
                        break;
                    }
                }
            })
        });
        call.media_session = Some(session);
    }

    async fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::Identity(Ok(id)) => {
                self.session.local_id = id;
                self.emitter.emit_ready(&self.session.local_id);
                self.publish();
            }
            Internal::Identity(Err(e)) => {
                error!("Identity unavailable, restart required: {}", e);
                self.emitter.emit_error(e);
            }
            Internal::Acquired { attempt, result } => self.on_acquired(attempt, result).await,
            Internal::Media { attempt, event } => self.on_media_event(attempt, event).await,
        }
    }

    async fn on_acquired(
        &mut self,
        attempt: AttemptId,
        result: Result<Arc<dyn MediaStream>, MediaError>,
    ) {
        let direction = self
            .call
            .as_ref()
            .filter(|call| call.attempt == attempt)
            .map(|call| call.direction);

        let Some(direction) = direction else {
            // попытка уже завершена: поток не должен утечь
            if let Ok(stream) = result {
                let held = self.media.current().is_some_and(|h| h.id() == stream.id());
                if !held {
                    info!("Releasing media acquired for ended attempt {}", attempt);
                    stop_tracks(&stream);
                }
            }
            return;
        };

        match result {
            Err(e) => {
                warn!("Media acquisition failed: {}", e);
                self.fail(e.into()).await;
            }
            Ok(stream) => {
                let stream = self.media.hold(stream);
                self.emitter.emit_local_stream(Some(stream.id()));
                match direction {
                    Direction::Outbound => self.dial(stream).await,
                    Direction::Inbound => self.answer(stream).await,
                }
            }
        }
    }

    /// Исходящий звонок: медиасессия, затем data-link без ожидания медиа
    async fn dial(&mut self, stream: Arc<dyn MediaStream>) {
        let Some(remote) = self.call.as_ref().map(|call| call.remote_id.clone()) else {
            return;
        };

        match self.transport.call(&remote, stream) {
            Ok(session) => self.bind_media_session(session),
            Err(e) => {
                warn!("Dialing {} failed: {}", remote, e);
                return self.fail(e.into()).await;
            }
        }

        self.ensure_link(&remote);
    }

    /// Входящий звонок: отвечаем и, если канала ещё нет, открываем его сами
    async fn answer(&mut self, stream: Arc<dyn MediaStream>) {
        let Some(call) = self.call.as_ref() else {
            return;
        };
        let remote = call.remote_id.clone();
        let answered = match call.media_session.as_ref() {
            Some(offer) => offer.answer(stream).await,
            None => Err(TransportError::Failure(format!("no offer from {remote}"))),
        };

        if let Err(e) = answered {
            warn!("Failed to answer {}: {}", remote, e);
            return self.fail(e.into()).await;
        }

        self.session.begin(&remote, CallStatus::Connected);
        self.publish();
        info!("Answered call from {}", remote);

        self.ensure_link(&remote);
    }

    fn ensure_link(&mut self, remote: &str) {
        if self.links.has_link_for(remote) {
            debug!("Data link to {} already present", remote);
            return;
        }
        if let Err(e) = self.links.connect(remote) {
            warn!("Data link to {} not established: {}", remote, e);
        }
    }

    async fn on_media_event(&mut self, attempt: AttemptId, event: MediaEvent) {
        let Some(call) = self.call.as_mut().filter(|call| call.attempt == attempt) else {
            debug!("Stale media event for attempt {} ignored", attempt);
            return;
        };

        match event {
            MediaEvent::Stream(remote) => {
                if call.remote_stream.as_ref() == Some(&remote) {
                    return;
                }
                call.remote_stream = Some(remote.clone());
                let peer = call.remote_id.clone();
                self.emitter.emit_remote_stream(Some(remote));

                if self.session.status == CallStatus::Connecting {
                    self.session.begin(&peer, CallStatus::Connected);
                    self.publish();
                    info!("Connected with {}", peer);
                }
            }
            MediaEvent::Closed => {
                info!("Media session with {} closed", call.remote_id);
                self.teardown().await;
            }
            MediaEvent::Error(e) => {
                warn!("Media session with {} failed: {}", call.remote_id, e);
                self.fail(CallError::Transport(e)).await;
            }
        }
    }

    /// ========== TRANSPORT ==========

    async fn on_transport_event(&mut self, event: TransportEvent) {
        debug!("Transport event: {:?}", event);
        match event {
            TransportEvent::IncomingCall(offer) => self.on_incoming_call(offer).await,
            TransportEvent::IncomingLink(link) => self.on_incoming_link(link).await,
            TransportEvent::Error(TransportError::PeerUnavailable(peer)) => {
                // повторные отчёты после сброса звонка (медиа и data-link) не показываем
                let Some(call) = self.call.as_ref() else {
                    debug!("PeerUnavailable({:?}) without an active call ignored", peer);
                    return;
                };
                let peer = if peer.is_empty() {
                    call.remote_id.clone()
                } else {
                    peer
                };
                let dialing =
                    self.session.status == CallStatus::Connecting && peer == call.remote_id;
                self.emitter.emit_error(CallError::PeerUnavailable(peer));
                if dialing {
                    self.teardown().await;
                }
            }
            TransportEvent::Error(TransportError::Failure(msg)) => {
                error!("Transport failure: {}", msg);
                self.fail(CallError::Transport(msg)).await;
            }
        }
    }

    async fn on_incoming_call(&mut self, offer: Box<dyn MediaSession>) {
        let peer = offer.peer().to_string();
        if self.call.is_some() || peer.is_empty() {
            info!("Rejecting incoming call from {:?} - busy", peer);
            offer.close().await;
            return;
        }

        self.rebind_links(&peer).await;
        let attempt = self.next_attempt();
        self.call = Some(ActiveCall::new(attempt, &peer, Direction::Inbound));
        self.bind_media_session(offer);
        info!("Incoming call from {} (attempt {})", peer, attempt);

        self.acquire_media(attempt);
    }

    async fn on_incoming_link(&mut self, link: Arc<dyn DataLink>) {
        let peer = link.peer().to_string();
        match self.call.as_ref() {
            Some(call) if call.remote_id != peer => {
                info!("Data link from {} does not belong to the active call", peer);
                link.close().await;
                return;
            }
            Some(_) => {}
            // без звонка канал ждёт входящий вызов от того же собеседника
            None => self.rebind_links(&peer).await,
        }
        self.links.accept(link).await;
    }

    async fn on_link_event(&mut self, id: LinkId, event: LinkEvent) {
        match self.links.on_event(id, event).await {
            Some(LinkNotice::Chat(text)) => {
                self.append(Message::new(Sender::Peer, text));
            }
            Some(LinkNotice::Undelivered { pending }) => self.report_undelivered(pending),
            Some(LinkNotice::Opened { peer, flushed }) => {
                debug!("Chat with {} ready ({} flushed)", peer, flushed)
            }
            Some(LinkNotice::Closed { canonical }) => {
                debug!("Data link closed (canonical={})", canonical)
            }
            None => {}
        }
    }

    /// ========== TEARDOWN ==========

    async fn fail(&mut self, err: CallError) {
        self.emitter.emit_error(err);
        self.teardown().await;
    }

    /// Безусловный и идемпотентный сброс звонка; лента сообщений остаётся
    async fn teardown(&mut self) {
        let mut ended = false;
        let mut remote_id = self.session.remote_id.clone();

        if let Some(call) = self.call.take() {
            ended = true;
            remote_id = call.remote_id;
            if let Some(forwarder) = call.forwarder {
                forwarder.abort();
            }
            if let Some(session) = call.media_session {
                session.close().await;
            }
            if call.remote_stream.is_some() {
                self.emitter.emit_remote_stream(None);
            }
        }

        let dropped = self.links.close_all().await;

        if self.media.release() {
            ended = true;
            self.emitter.emit_local_stream(None);
        }

        if self.session.reset() {
            ended = true;
        }
        self.publish();

        if dropped > 0 {
            self.report_undelivered(dropped);
        }
        if ended {
            info!("Call with {:?} torn down", remote_id);
            self.emitter.emit_ended(&remote_id);
        }
    }
}
