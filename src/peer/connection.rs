//! `MediaTransport` backed by the `webrtc` crate.

use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::peer::ice::PendingCandidates;
use crate::peer::media::CapturedTrack;
use crate::peer::media::ReceivedTrack;
use crate::peer::transport::{MediaTransport, PeerLink};
use crate::peer::types::{
    IceCandidate, LinkState, MediaConstraints, MediaStream, PeerEvent, RtcSettings,
    SessionDescription, TrackKind,
};
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Transport over webrtc-rs peer connections.
///
/// Capture is represented by sample tracks; `devices` says which kinds of
/// capture device this host has.
pub struct WebRtcTransport {
    devices: MediaConstraints,
}

impl WebRtcTransport {
    pub fn new() -> Self {
        Self {
            devices: MediaConstraints::default(),
        }
    }

    pub fn with_devices(devices: MediaConstraints) -> Self {
        Self { devices }
    }
}

impl Default for WebRtcTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        if !constraints.video && !constraints.audio {
            return Err(Error::MediaAccess("no media kind requested".into()));
        }
        if constraints.video && !self.devices.video {
            return Err(Error::MediaAccess("no camera available".into()));
        }
        if constraints.audio && !self.devices.audio {
            return Err(Error::MediaAccess("no microphone available".into()));
        }

        let stream_id = format!("local-{}", random_id(4));
        let mut stream = MediaStream::new(stream_id.clone());

        if constraints.video {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            ));
            stream.add_track(Arc::new(CapturedTrack::new(TrackKind::Video, track)));
        }

        if constraints.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            ));
            stream.add_track(Arc::new(CapturedTrack::new(TrackKind::Audio, track)));
        }

        info!(
            "Local media acquired: stream={} tracks={}",
            stream.id(),
            stream.tracks().len()
        );
        Ok(stream)
    }

    async fn create_peer(&self, settings: &RtcSettings) -> Result<Arc<dyn PeerLink>> {
        let peer = WebRtcPeer::new(settings).await?;
        Ok(Arc::new(peer))
    }
}

/// Builds the webrtc-rs configuration from transport settings
fn rtc_config(settings: &RtcSettings) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: settings
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
            })
            .collect(),
        ice_candidate_pool_size: settings.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

// Both types share the {"type", "sdp"} JSON shape
fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    Ok(serde_json::from_value(serde_json::to_value(desc)?)?)
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription> {
    Ok(serde_json::from_value(serde_json::to_value(desc)?)?)
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    pending: Mutex<PendingCandidates>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl WebRtcPeer {
    pub async fn new(settings: &RtcSettings) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(settings)).await?);
        let (tx, rx) = mpsc::unbounded_channel();

        let candidate_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        dump_candidate("LOCAL", &candidate);
                        let _ = candidate_tx.send(PeerEvent::LocalCandidate(candidate));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                },
                None => {
                    debug!("ICE candidate gathering completed (null candidate received)");
                    let _ = candidate_tx.send(PeerEvent::GatheringComplete);
                }
            }
            Box::pin(async {})
        }));

        let track_tx = tx.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let received = ReceivedTrack::new(track);
                info!("Remote track arrived: {:?}", received);
                let _ = track_tx.send(PeerEvent::RemoteTrack(Arc::new(received)));
                Box::pin(async {})
            },
        ));

        let state_tx = tx;
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {:?}", st);
            let _ = state_tx.send(PeerEvent::StateChanged(link_state(st)));
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            pending: Mutex::new(PendingCandidates::default()),
            events: std::sync::Mutex::new(Some(rx)),
        })
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn add_stream(&self, stream: &MediaStream) -> Result<()> {
        for track in stream.tracks() {
            let captured = track
                .as_any()
                .downcast_ref::<CapturedTrack>()
                .ok_or_else(|| {
                    Error::Transport(format!(
                        "track {} was not captured by this transport",
                        track.id()
                    ))
                })?;

            let sender = self
                .pc
                .add_track(captured.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // RTCP has to be read for interceptors to run; ends when the link closes
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        // Held across the update so no candidate is queued after the flush
        let mut pending = self.pending.lock().await;
        self.pc.set_remote_description(to_rtc(desc)?).await?;

        for candidate in pending.drain() {
            debug!("Applying pending candidate: {}", candidate.candidate);
            if let Err(e) = self.apply_candidate(candidate).await {
                warn!("Failed to apply pending candidate: {}", e);
            }
        }
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if self.pc.remote_description().await.is_none() {
            pending.push(candidate);
            return Ok(());
        }
        drop(pending);
        self.apply_candidate(candidate).await
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events.lock().ok()?.take()
    }

    async fn close(&self) -> Result<()> {
        self.pending.lock().await.clear();
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn description_conversion_keeps_type_and_sdp() {
        let desc = SessionDescription::answer("v=0\r\n");
        let rtc = to_rtc(desc.clone()).unwrap();
        assert_eq!(rtc.sdp, "v=0\r\n");
        assert_eq!(from_rtc(&rtc).unwrap(), desc);
    }

    #[test]
    fn config_carries_pool_size_and_servers() {
        let settings = AppConfig::default().rtc_settings();
        let config = rtc_config(&settings);
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[tokio::test]
    async fn missing_device_is_media_access_error() {
        let transport = WebRtcTransport::with_devices(MediaConstraints {
            video: false,
            audio: true,
        });
        let err = transport
            .acquire_local_media(MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MediaAccess(_)));

        let stream = transport
            .acquire_local_media(MediaConstraints {
                video: false,
                audio: true,
            })
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks()[0].kind(), TrackKind::Audio);
    }

    #[tokio::test]
    async fn offer_answer_between_two_links() {
        let transport = WebRtcTransport::new();
        let settings = RtcSettings {
            ice_servers: Vec::new(),
            ice_candidate_pool_size: 0,
        };

        let caller = transport.create_peer(&settings).await.unwrap();
        let callee = transport.create_peer(&settings).await.unwrap();
        let media = transport
            .acquire_local_media(MediaConstraints::default())
            .await
            .unwrap();
        caller.add_stream(&media).await.unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer.kind, crate::peer::types::SdpKind::Offer);
        caller.set_local_description(offer.clone()).await.unwrap();

        // queued until the offer is applied
        callee
            .add_ice_candidate(IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 127.0.0.1 50000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            })
            .await
            .unwrap();
        assert!(!callee.has_remote_description().await);

        callee.set_remote_description(offer).await.unwrap();
        assert!(callee.has_remote_description().await);

        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer.kind, crate::peer::types::SdpKind::Answer);

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }
}
