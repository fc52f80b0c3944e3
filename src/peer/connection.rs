use crate::config::CallConfig;
use crate::error::TransportError;
use crate::logger::dump_selected_pair;
use crate::media::{MediaStream, TrackKind};
use crate::peer::data_channel::RtcDataLink;
use crate::peer::types::ServerConfig;
use crate::transport::{MediaEvent, MediaSession, RemoteStream, TransportEvent};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    data_channel::{data_channel_init::RTCDataChannelInit, RTCDataChannel},
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
};

/// Период ожидания перед тем, как считать звонок оборванным
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Создает конфигурацию для peer connection
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Новый peer connection с дефолтными кодеками и интерсепторами
pub async fn new_peer_connection(
    config: &CallConfig,
) -> Result<Arc<RTCPeerConnection>, TransportError> {
    new_peer_connection_with(config, SettingEngine::default()).await
}

/// То же, но с явными настройками ICE (например, loopback-кандидаты)
pub async fn new_peer_connection_with(
    config: &CallConfig,
    settings: SettingEngine,
) -> Result<Arc<RTCPeerConnection>, TransportError> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .with_setting_engine(settings)
        .build();

    let pc = api
        .new_peer_connection(rtc_config(&config.ice_servers))
        .await?;

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    Ok(Arc::new(pc))
}

/// Исходящий упорядоченный data-channel к собеседнику
pub async fn open_rtc_link(
    pc: &Arc<RTCPeerConnection>,
    peer: &str,
    label: &str,
) -> Result<Arc<RtcDataLink>, TransportError> {
    let init = RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
    };
    let dc = pc.create_data_channel(label, Some(init)).await?;
    Ok(RtcDataLink::new(peer, dc))
}

/// Каналы, открытые удалённой стороной, уходят в транспортные события
pub fn route_inbound_links(
    pc: &Arc<RTCPeerConnection>,
    peer: &str,
    sink: mpsc::UnboundedSender<TransportEvent>,
) {
    let peer = peer.to_string();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        info!("Remote opened data channel '{}'", dc.label());
        let link = RtcDataLink::new(peer.clone(), dc);
        let _ = sink.send(TransportEvent::IncomingLink(link));
        Box::pin(async {})
    }));
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

/// Дорожки локального потока в peer connection; сэмплы в них пишет платформа
pub async fn attach_local_tracks(
    pc: &Arc<RTCPeerConnection>,
    stream: &Arc<dyn MediaStream>,
) -> Result<Vec<Arc<TrackLocalStaticSample>>, TransportError> {
    let mut attached = Vec::new();
    for track in stream.tracks() {
        let kind = track.kind();
        let name = match kind {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(kind),
            format!("{}-{}", stream.id(), name),
            stream.id().to_string(),
        ));
        pc.add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        debug!("Local {} track of {} attached", name, stream.id());
        attached.push(local);
    }
    Ok(attached)
}

/// Применяет локальное описание и ждёт сбора кандидатов (без trickle)
async fn apply_local(
    pc: &RTCPeerConnection,
    desc: RTCSessionDescription,
) -> Result<RTCSessionDescription, TransportError> {
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(desc).await?;
    let _ = gathered.recv().await;
    pc.local_description()
        .await
        .ok_or_else(|| TransportError::Failure("local description missing".into()))
}

/// MediaSession поверх `RTCPeerConnection`. Обмен SDP ведёт rendezvous-транспорт
pub struct RtcMediaSession {
    peer: String,
    pc: Arc<RTCPeerConnection>,
    events: Mutex<Option<mpsc::UnboundedReceiver<MediaEvent>>>,
    local: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl RtcMediaSession {
    pub fn new(peer: impl Into<String>, pc: Arc<RTCPeerConnection>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        watch_peer(&pc, tx);
        Self {
            peer: peer.into(),
            pc,
            events: Mutex::new(Some(rx)),
            local: Mutex::new(Vec::new()),
        }
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Локальные дорожки, привязанные offer/answer
    pub fn local_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.local.lock().map(|l| l.clone()).unwrap_or_default()
    }

    async fn attach(&self, stream: &Arc<dyn MediaStream>) -> Result<(), TransportError> {
        if !self.local_tracks().is_empty() {
            return Ok(());
        }
        let tracks = attach_local_tracks(&self.pc, stream).await?;
        if let Ok(mut local) = self.local.lock() {
            local.extend(tracks);
        }
        Ok(())
    }

    /// Исходящая сторона: дорожки потока и offer с собранными кандидатами
    pub async fn offer(
        &self,
        stream: Arc<dyn MediaStream>,
    ) -> Result<RTCSessionDescription, TransportError> {
        self.attach(&stream).await?;
        let offer = self.pc.create_offer(None).await?;
        let offer = apply_local(&self.pc, offer).await?;
        info!("Offer for {} ready", self.peer);
        Ok(offer)
    }

    /// Offer или answer собеседника
    pub async fn apply_remote(&self, desc: RTCSessionDescription) -> Result<(), TransportError> {
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    pub async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.pc.local_description().await
    }

    /// Data-channel чата с меткой из конфигурации; создавать до `offer`
    pub async fn open_link(&self, config: &CallConfig) -> Result<Arc<RtcDataLink>, TransportError> {
        open_rtc_link(&self.pc, &self.peer, &config.channel_label).await
    }

    pub fn route_links(&self, sink: mpsc::UnboundedSender<TransportEvent>) {
        route_inbound_links(&self.pc, &self.peer, sink);
    }
}

/// Сопоставление состояний peer connection событиям медиасессии.
/// Disconnected/Failed дают `GRACE_PERIOD` на восстановление
fn watch_peer(pc: &Arc<RTCPeerConnection>, tx: mpsc::UnboundedSender<MediaEvent>) {
    pc.on_track(Box::new({
        let tx = tx.clone();
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            debug!("Remote track {} arrived", track.id());
            let _ = tx.send(MediaEvent::Stream(RemoteStream {
                id: track.stream_id(),
            }));
            Box::pin(async {})
        }
    }));

    // Weak: обработчик хранится внутри самого pc
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    let grace: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        let tx = tx.clone();
        let weak = weak.clone();
        let grace = grace.clone();

        Box::pin(async move {
            match st {
                RTCPeerConnectionState::Connected => {
                    if let Some(handle) = grace.lock().ok().and_then(|mut g| g.take()) {
                        info!("Connection recovered - aborting pending disconnect");
                        handle.abort();
                    }
                }

                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    let Ok(mut pending) = grace.lock() else {
                        return;
                    };
                    if pending.is_some() {
                        debug!("Disconnect task already pending, ignoring");
                        return;
                    }
                    *pending = Some(tokio::spawn(async move {
                        if let Some(pc) = weak.upgrade() {
                            dump_selected_pair(&pc, "BEFORE-FAIL").await;
                        }
                        sleep(GRACE_PERIOD).await;
                        let recovered = weak
                            .upgrade()
                            .is_some_and(|pc| pc.connection_state() == RTCPeerConnectionState::Connected);
                        if !recovered {
                            let _ = tx.send(MediaEvent::Error(format!(
                                "peer connection {:?} for {}s",
                                st,
                                GRACE_PERIOD.as_secs()
                            )));
                        }
                    }));
                }

                RTCPeerConnectionState::Closed => {
                    if let Some(handle) = grace.lock().ok().and_then(|mut g| g.take()) {
                        handle.abort();
                    }
                    let _ = tx.send(MediaEvent::Closed);
                }

                _ => {}
            }
        })
    }));
}

#[async_trait]
impl MediaSession for RtcMediaSession {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MediaEvent>> {
        self.events.lock().ok().and_then(|mut events| events.take())
    }

    /// Дорожки потока встают в трансиверы из offer, затем применяется answer
    async fn answer(&self, stream: Arc<dyn MediaStream>) -> Result<(), TransportError> {
        if self.pc.remote_description().await.is_none() {
            return Err(TransportError::Failure(format!(
                "no offer from {} to answer",
                self.peer
            )));
        }
        self.attach(&stream).await?;
        let answer = self.pc.create_answer(None).await?;
        apply_local(&self.pc, answer).await?;
        info!("Answered {} with local stream {}", self.peer, stream.id());
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}
