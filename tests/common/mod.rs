#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use peercall_lib::config::{CallConfig, MediaConstraints};
use peercall_lib::media::{MediaDevices, MediaStream, MediaTrack, TrackKind};
use peercall_lib::transport::{
    DataLink, LinkEvent, MediaEvent, MediaSession, Rendezvous, RemoteStream, TransportEvent,
};
use peercall_lib::{CallEvent, CallHandle, CallStatus, MediaError, Session, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{sleep, timeout};

pub const WAIT: Duration = Duration::from_secs(2);

/// ========== MEDIA ==========

pub struct FakeTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stops: Arc<AtomicUsize>,
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.clone()
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub requests: AtomicUsize,
    /// число остановленных дорожек (каждый поток - две дорожки)
    pub stops: Arc<AtomicUsize>,
    pub failure: Mutex<Option<MediaError>>,
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDevices {
    pub fn deny(&self, err: MediaError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Запросы повиснут до `notify_one`
    pub fn hold_requests(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn released_streams(&self) -> usize {
        self.stops.load(Ordering::SeqCst) / 2
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(
        &self,
        _constraints: MediaConstraints,
    ) -> Result<Arc<dyn MediaStream>, MediaError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        let tracks = [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .map(|kind| {
                Arc::new(FakeTrack {
                    kind,
                    enabled: AtomicBool::new(true),
                    stops: self.stops.clone(),
                }) as Arc<dyn MediaTrack>
            })
            .collect();
        Ok(Arc::new(FakeStream {
            id: format!("local-{n}"),
            tracks,
        }))
    }
}

/// ========== MEDIA SESSION ==========

/// Управление медиасессией со стороны теста
pub struct MediaControl {
    pub peer: String,
    tx: mpsc::UnboundedSender<MediaEvent>,
    pub answered: AtomicUsize,
    pub closed: AtomicBool,
}

impl MediaControl {
    pub fn stream(&self, id: &str) {
        let _ = self.tx.send(MediaEvent::Stream(RemoteStream { id: id.into() }));
    }
    pub fn remote_close(&self) {
        let _ = self.tx.send(MediaEvent::Closed);
    }
    pub fn fail(&self, msg: &str) {
        let _ = self.tx.send(MediaEvent::Error(msg.into()));
    }
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    pub fn answers(&self) -> usize {
        self.answered.load(Ordering::SeqCst)
    }
}

pub struct FakeMediaSession {
    control: Arc<MediaControl>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<MediaEvent>>>,
}

pub fn media_session(peer: &str) -> (FakeMediaSession, Arc<MediaControl>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let control = Arc::new(MediaControl {
        peer: peer.into(),
        tx,
        answered: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
    });
    (
        FakeMediaSession {
            control: control.clone(),
            rx: Mutex::new(Some(rx)),
        },
        control,
    )
}

#[async_trait]
impl MediaSession for FakeMediaSession {
    fn peer(&self) -> &str {
        &self.control.peer
    }
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MediaEvent>> {
        self.rx.lock().unwrap().take()
    }
    async fn answer(&self, _stream: Arc<dyn MediaStream>) -> Result<(), TransportError> {
        self.control.answered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn close(&self) {
        self.control.closed.store(true, Ordering::SeqCst);
    }
}

/// ========== DATA LINK ==========

pub struct FakeLink {
    peer: String,
    open: AtomicBool,
    closed: AtomicBool,
    tx: mpsc::UnboundedSender<LinkEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    sent: Mutex<Vec<Bytes>>,
    failing_sends: AtomicUsize,
}

impl FakeLink {
    pub fn new(peer: &str) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            peer: peer.into(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx,
            rx: Mutex::new(Some(rx)),
            sent: Mutex::new(Vec::new()),
            failing_sends: AtomicUsize::new(0),
        })
    }

    pub fn open_now(&self) {
        self.open.store(true, Ordering::SeqCst);
        let _ = self.tx.send(LinkEvent::Open);
    }

    pub fn deliver(&self, raw: &str) {
        let _ = self.tx.send(LinkEvent::Data(Bytes::from(raw.to_string())));
    }

    pub fn remote_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.tx.send(LinkEvent::Closed);
    }

    pub fn fail(&self, msg: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.tx.send(LinkEvent::Error(msg.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Следующие `n` отправок вернут ошибку, канал при этом остаётся открытым
    pub fn fail_next_sends(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Тексты отправленных чат-сообщений
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|data| {
                let value: serde_json::Value = serde_json::from_slice(data).unwrap();
                assert_eq!(value["type"], "chat");
                value["text"].as_str().unwrap().to_string()
            })
            .collect()
    }
}

#[async_trait]
impl DataLink for FakeLink {
    fn peer(&self) -> &str {
        &self.peer
    }
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.rx.lock().unwrap().take()
    }
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Failure("link is not open".into()));
        }
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Failure("send buffer full".into()));
        }
        self.sent.lock().unwrap().push(data);
        Ok(())
    }
    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// ========== TRANSPORT ==========

pub struct FakeTransport {
    id: Result<String, TransportError>,
    pub opens: AtomicUsize,
    pub calls: Mutex<Vec<Arc<MediaControl>>>,
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub refuse_links: AtomicBool,
}

impl FakeTransport {
    pub fn new(id: Result<String, TransportError>) -> Self {
        Self {
            id,
            opens: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            refuse_links: AtomicBool::new(false),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call(&self, n: usize) -> Arc<MediaControl> {
        self.calls.lock().unwrap()[n].clone()
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn link(&self, n: usize) -> Arc<FakeLink> {
        self.links.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Rendezvous for FakeTransport {
    async fn open(&self) -> Result<String, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.id.clone()
    }

    fn call(
        &self,
        remote_id: &str,
        _stream: Arc<dyn MediaStream>,
    ) -> Result<Box<dyn MediaSession>, TransportError> {
        let (session, control) = media_session(remote_id);
        self.calls.lock().unwrap().push(control);
        Ok(Box::new(session))
    }

    fn connect(&self, remote_id: &str) -> Result<Arc<dyn DataLink>, TransportError> {
        if self.refuse_links.load(Ordering::SeqCst) {
            return Err(TransportError::PeerUnavailable(remote_id.into()));
        }
        let link = FakeLink::new(remote_id);
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

/// ========== HARNESS ==========

pub struct Endpoint {
    pub handle: CallHandle,
    pub transport: Arc<FakeTransport>,
    pub devices: Arc<FakeDevices>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl Endpoint {
    pub fn spawn(id: Result<String, TransportError>) -> Self {
        let transport = Arc::new(FakeTransport::new(id));
        let devices = Arc::new(FakeDevices::default());
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let handle = peercall_lib::spawn(
            CallConfig::default(),
            transport.clone(),
            devices.clone(),
            inbound_rx,
        );
        let events = handle.subscribe();
        Self {
            handle,
            transport,
            devices,
            inbound,
            events,
        }
    }

    /// Узел с назначенным идентификатором
    pub async fn ready(id: &str) -> Self {
        let endpoint = Self::spawn(Ok(id.to_string()));
        endpoint.wait_session(|s| s.local_id == id).await;
        endpoint
    }

    pub async fn wait_session(&self, pred: impl Fn(&Session) -> bool) -> Session {
        let mut rx = self.handle.watch_session();
        let session = timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("session loop stopped");
        session.clone()
    }

    pub async fn wait_status(&self, status: CallStatus) -> Session {
        self.wait_session(|s| s.status == status).await
    }

    pub fn incoming_call(&self, peer: &str) -> Arc<MediaControl> {
        let (session, control) = media_session(peer);
        self.inbound
            .send(TransportEvent::IncomingCall(Box::new(session)))
            .unwrap();
        control
    }

    pub fn incoming_link(&self, peer: &str) -> Arc<FakeLink> {
        let link = FakeLink::new(peer);
        self.inbound
            .send(TransportEvent::IncomingLink(link.clone()))
            .unwrap();
        link
    }

    pub fn transport_error(&self, err: TransportError) {
        self.inbound.send(TransportEvent::Error(err)).unwrap();
    }

    /// Исходящий звонок, дошедший до транспорта
    pub async fn dial(&self, target: &str) -> Arc<MediaControl> {
        let before = self.transport.call_count();
        self.handle.start_call(target).await.unwrap();
        let transport = self.transport.clone();
        until(move || transport.call_count() > before).await;
        self.transport.call(self.transport.call_count() - 1)
    }

    /// Следующее событие, подходящее под фильтр
    pub async fn next_event<T>(&mut self, mut pick: impl FnMut(CallEvent) -> Option<T>) -> T {
        timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) => {
                        if let Some(found) = pick(event) {
                            return found;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

/// Ждёт выполнения условия, опрашивая его
pub async fn until(cond: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Даёт циклу сессии разобрать накопившиеся события
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}
