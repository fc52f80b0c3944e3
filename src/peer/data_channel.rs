use crate::error::{CallError, TransportError};
use crate::peer::types::{LinkId, WirePayload};
use crate::transport::{DataLink, LinkEvent, Rendezvous};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::data_channel::{
    data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState,
    RTCDataChannel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOrigin {
    Outbound,
    Inbound,
}

/// Что менеджер каналов сообщает владельцу сессии
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    Opened { peer: String, flushed: usize },
    Chat(String),
    Closed { canonical: bool },
    Undelivered { pending: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
    Reconnecting,
}

struct LinkEntry {
    link: Arc<dyn DataLink>,
    origin: LinkOrigin,
    forwarder: Option<JoinHandle<()>>,
}

/// Data-link'и одного собеседника. Каноническим становится первый открывшийся,
/// остальные закрываются
pub struct DataChannelManager {
    transport: Arc<dyn Rendezvous>,
    sink: mpsc::UnboundedSender<(LinkId, LinkEvent)>,
    scope: Option<String>,
    links: BTreeMap<LinkId, LinkEntry>,
    canonical: Option<LinkId>,
    outbox: VecDeque<Bytes>,
    // текущая очередь уже использовала свою единственную попытку переподключения
    redialed: bool,
    next_id: LinkId,
}

impl DataChannelManager {
    pub fn new(
        transport: Arc<dyn Rendezvous>,
        sink: mpsc::UnboundedSender<(LinkId, LinkEvent)>,
    ) -> Self {
        Self {
            transport,
            sink,
            scope: None,
            links: BTreeMap::new(),
            canonical: None,
            outbox: VecDeque::new(),
            redialed: false,
            next_id: 1,
        }
    }

    /// Собеседник, к которому привязаны каналы
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Привязка к собеседнику до появления каналов
    pub fn bind(&mut self, remote_id: &str) {
        if self.scope.is_none() {
            self.scope = Some(remote_id.to_string());
        }
    }

    pub fn has_link_for(&self, peer: &str) -> bool {
        self.scope() == Some(peer) && !self.links.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.canonical_link().is_some_and(|link| link.is_open())
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn canonical_origin(&self) -> Option<LinkOrigin> {
        self.canonical
            .and_then(|id| self.links.get(&id))
            .map(|entry| entry.origin)
    }

    fn canonical_link(&self) -> Option<Arc<dyn DataLink>> {
        self.canonical
            .and_then(|id| self.links.get(&id))
            .map(|entry| entry.link.clone())
    }

    /// Исходящий канал; открывается асинхронно
    pub fn connect(&mut self, remote_id: &str) -> Result<LinkId, CallError> {
        debug_assert!(self.scope.as_deref().map_or(true, |s| s == remote_id));
        let link = self.transport.connect(remote_id)?;
        self.scope = Some(remote_id.to_string());
        info!("Outbound data link to {} requested", remote_id);
        Ok(self.register(link, LinkOrigin::Outbound))
    }

    /// Входящий канал: чужой собеседник или дубликат открытого канала закрываются
    pub async fn accept(&mut self, link: Arc<dyn DataLink>) -> Option<LinkId> {
        if let Some(scope) = &self.scope {
            if scope != link.peer() {
                warn!(
                    "Rejecting data link from {} while bound to {}",
                    link.peer(),
                    scope
                );
                link.close().await;
                return None;
            }
        }

        if self.is_open() {
            info!("Duplicate data link from {} - keeping the open one", link.peer());
            link.close().await;
            return None;
        }

        self.scope = Some(link.peer().to_string());
        info!("Inbound data link from {} accepted", link.peer());
        Some(self.register(link, LinkOrigin::Inbound))
    }

    fn register(&mut self, link: Arc<dyn DataLink>, origin: LinkOrigin) -> LinkId {
        let id = self.next_id;
        self.next_id += 1;

        // канал мог открыться до привязки: событие Open ставим первым
        if link.is_open() {
            let _ = self.sink.send((id, LinkEvent::Open));
        }

        let forwarder = link.take_events().map(|mut events| {
            let sink = self.sink.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if sink.send((id, event)).is_err() {
                        break;
                    }
                }
            })
        });

        self.links.insert(
            id,
            LinkEntry {
                link,
                origin,
                forwarder,
            },
        );
        id
    }

    async fn drop_link(&mut self, id: LinkId) {
        if let Some(entry) = self.links.remove(&id) {
            if let Some(forwarder) = entry.forwarder {
                forwarder.abort();
            }
            entry.link.close().await;
        }
        if self.canonical == Some(id) {
            self.canonical = None;
        }
    }

    pub async fn on_event(&mut self, id: LinkId, event: LinkEvent) -> Option<LinkNotice> {
        let peer = match self.links.get(&id) {
            Some(entry) => entry.link.peer().to_string(),
            None => {
                debug!("Event for released data link {} ignored", id);
                return None;
            }
        };

        match event {
            LinkEvent::Open => match self.canonical {
                Some(current) if current == id => None,
                Some(_) => {
                    info!("Data link {} to {} opened late - closing duplicate", id, peer);
                    self.drop_link(id).await;
                    None
                }
                None => {
                    self.canonical = Some(id);
                    let others: Vec<LinkId> =
                        self.links.keys().copied().filter(|other| *other != id).collect();
                    for other in others {
                        debug!("Closing competing data link {}", other);
                        self.drop_link(other).await;
                    }
                    let flushed = self.flush().await;
                    info!("Data link to {} open, flushed {} queued message(s)", peer, flushed);
                    Some(LinkNotice::Opened { peer, flushed })
                }
            },

            LinkEvent::Data(data) => match WirePayload::decode(&data) {
                Some(WirePayload::Chat { text }) => Some(LinkNotice::Chat(text)),
                None => {
                    debug!("Ignoring unrecognized payload ({} bytes)", data.len());
                    None
                }
            },

            LinkEvent::Closed | LinkEvent::Error(_) => {
                if let LinkEvent::Error(e) = &event {
                    warn!("Data link {} to {} failed: {}", id, peer, e);
                } else {
                    info!("Data link {} to {} closed", id, peer);
                }
                let canonical = self.canonical == Some(id);
                self.drop_link(id).await;

                if self.links.is_empty() && !self.outbox.is_empty() {
                    if let Some(remote) = self.scope.clone().filter(|_| !self.redialed) {
                        self.redialed = true;
                        info!(
                            "Last data link to {} lost with {} queued - re-establishing",
                            remote,
                            self.outbox.len()
                        );
                        match self.connect(&remote) {
                            Ok(_) => return Some(LinkNotice::Closed { canonical }),
                            Err(e) => warn!("Re-establishing data link failed: {}", e),
                        }
                    }
                    return Some(LinkNotice::Undelivered {
                        pending: self.drain_outbox(),
                    });
                }
                Some(LinkNotice::Closed { canonical })
            }
        }
    }

    async fn flush(&mut self) -> usize {
        let Some(link) = self.canonical_link() else {
            return 0;
        };
        let mut sent = 0;
        while let Some(data) = self.outbox.pop_front() {
            if let Err(e) = link.send(data.clone()).await {
                warn!("Flush interrupted: {}", e);
                self.outbox.push_front(data);
                break;
            }
            sent += 1;
        }
        if self.outbox.is_empty() {
            self.redialed = false;
        }
        sent
    }

    fn drain_outbox(&mut self) -> usize {
        let pending = self.outbox.len();
        self.outbox.clear();
        self.redialed = false;
        pending
    }

    /// Отправка с очередью: если канала нет, поднимаем его один раз заново
    pub async fn send(&mut self, payload: &WirePayload) -> Result<SendOutcome, CallError> {
        let data = payload.encode();

        // открытый канал: сообщение встаёт за очередью, порядок сохраняется
        if self.is_open() {
            self.outbox.push_back(data);
            self.flush().await;
            if self.outbox.is_empty() {
                return Ok(SendOutcome::Sent);
            }
            warn!("Send failed, {} message(s) queued", self.outbox.len());
            return Ok(SendOutcome::Queued);
        }

        let Some(remote) = self.scope.clone() else {
            debug!("No peer to deliver to");
            return Err(CallError::SendWhileDisconnected {
                pending: self.outbox.len() + 1,
            });
        };

        self.outbox.push_back(data);
        if !self.links.is_empty() {
            return Ok(SendOutcome::Queued);
        }

        info!("No data link to {} - re-establishing", remote);
        self.redialed = true;
        match self.connect(&remote) {
            Ok(_) => Ok(SendOutcome::Reconnecting),
            Err(e) => {
                warn!("Re-establishing data link failed: {}", e);
                Err(CallError::SendWhileDisconnected {
                    pending: self.drain_outbox(),
                })
            }
        }
    }

    /// Закрывает всё; возвращает число выброшенных из очереди сообщений
    pub async fn close_all(&mut self) -> usize {
        let ids: Vec<LinkId> = self.links.keys().copied().collect();
        for id in ids {
            self.drop_link(id).await;
        }
        self.canonical = None;
        self.scope = None;
        let dropped = self.drain_outbox();
        dropped
    }
}

/// ========== WebRTC ==========

/// DataLink поверх `RTCDataChannel`
pub struct RtcDataLink {
    peer: String,
    dc: Arc<RTCDataChannel>,
    events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
}

impl RtcDataLink {
    pub fn new(peer: impl Into<String>, dc: Arc<RTCDataChannel>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        attach_dc(&dc, tx);
        Arc::new(Self {
            peer: peer.into(),
            dc,
            events: Mutex::new(Some(rx)),
        })
    }

    pub fn label(&self) -> &str {
        self.dc.label()
    }
}

/// общий обработчик data-channel: колбэки превращаются в поток событий
fn attach_dc(dc: &Arc<RTCDataChannel>, tx: mpsc::UnboundedSender<LinkEvent>) {
    debug!("attach_dc called for channel '{}'", dc.label());

    dc.on_open(Box::new({
        let tx = tx.clone();
        move || {
            let _ = tx.send(LinkEvent::Open);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let tx = tx.clone();
        move |msg: DataChannelMessage| {
            let _ = tx.send(LinkEvent::Data(msg.data));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let tx = tx.clone();
        move || {
            let _ = tx.send(LinkEvent::Closed);
            Box::pin(async {})
        }
    }));

    dc.on_error(Box::new(move |err: webrtc::Error| {
        let _ = tx.send(LinkEvent::Error(err.to_string()));
        Box::pin(async {})
    }));
}

#[async_trait]
impl DataLink for RtcDataLink {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events.lock().ok().and_then(|mut events| events.take())
    }

    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.dc.send(&data).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            warn!("Failed to close data channel: {}", e);
        }
    }
}
