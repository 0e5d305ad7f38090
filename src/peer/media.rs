//! Track types backing `MediaTrack` for the webrtc adapter.

use crate::peer::types::{MediaTrack, TrackKind};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Locally captured track, written to with samples by the capture source
pub struct CapturedTrack {
    id: String,
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    live: AtomicBool,
}

impl CapturedTrack {
    pub fn new(kind: TrackKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: track.id().to_string(),
            kind,
            track,
            live: AtomicBool::new(true),
        }
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }
}

impl fmt::Debug for CapturedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("live", &self.is_live())
            .finish()
    }
}

impl MediaTrack for CapturedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Track delivered by the remote peer
pub struct ReceivedTrack {
    id: String,
    kind: TrackKind,
    remote: Arc<TrackRemote>,
    live: AtomicBool,
}

impl ReceivedTrack {
    pub fn new(remote: Arc<TrackRemote>) -> Self {
        let kind = match remote.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        Self {
            id: remote.id(),
            kind,
            remote,
            live: AtomicBool::new(true),
        }
    }

}

impl fmt::Debug for ReceivedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ssrc", &self.remote.ssrc())
            .field("live", &self.is_live())
            .finish()
    }
}

impl MediaTrack for ReceivedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
