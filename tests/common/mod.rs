#![allow(dead_code)]

use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use webcall_lib::error::{Error, Result};
use webcall_lib::peer::{
    IceCandidate, LinkState, MediaConstraints, MediaStream, MediaTrack, MediaTransport, PeerEvent,
    PeerLink, RtcSettings, SdpKind, SessionDescription, TrackKind,
};
use webcall_lib::signaling::{
    CandidateChange, CandidateSide, MemoryStore, Precondition, SessionId, SessionPatch,
    SessionRecord, SignalingStore, Watch,
};
use webcall_lib::AppConfig;

pub fn config() -> AppConfig {
    AppConfig::default()
}

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
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

fn kind_name(kind: SdpKind) -> &'static str {
    match kind {
        SdpKind::Offer => "offer",
        SdpKind::Answer => "answer",
        SdpKind::Pranswer => "pranswer",
        SdpKind::Rollback => "rollback",
    }
}

/// Peer link that records every call made on it
pub struct FakePeer {
    name: String,
    ops: Mutex<Vec<String>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    closed: AtomicBool,
}

impl FakePeer {
    fn new(name: String) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            name,
            ops: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            closed: AtomicBool::new(false),
        }
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| *o == op).count()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    /// Remote candidates handed to the link
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject an event as if the media engine raised it
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn connect(&self) {
        self.emit(PeerEvent::StateChanged(LinkState::Connected));
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn add_stream(&self, stream: &MediaStream) -> Result<()> {
        self.record(format!("add_stream:{}", stream.tracks().len()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        Ok(SessionDescription::offer(format!("v=0 offer from {}", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        if self.remote().is_none() {
            return Err(Error::Transport("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("v=0 answer from {}", self.name)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{}", kind_name(desc.kind)));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set_remote:{}", kind_name(desc.kind)));
        *self.remote.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote().is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record("add_candidate");
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport handing out `FakePeer`s and `FakeTrack`s
#[derive(Default)]
pub struct FakeTransport {
    deny_media: bool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            deny_media: true,
            ..Self::default()
        })
    }

    pub fn peer(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer created yet")
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        if self.deny_media {
            return Err(Error::MediaAccess("permission denied".into()));
        }
        let mut stream = MediaStream::new("local");
        let mut tracks = self.tracks.lock().unwrap();
        if constraints.video {
            let track = FakeTrack::new(format!("video-{}", tracks.len()), TrackKind::Video);
            tracks.push(track.clone());
            stream.add_track(track);
        }
        if constraints.audio {
            let track = FakeTrack::new(format!("audio-{}", tracks.len()), TrackKind::Audio);
            tracks.push(track.clone());
            stream.add_track(track);
        }
        Ok(stream)
    }

    async fn create_peer(&self, _settings: &RtcSettings) -> Result<Arc<dyn PeerLink>> {
        let mut peers = self.peers.lock().unwrap();
        let peer = Arc::new(FakePeer::new(format!("peer-{}", peers.len())));
        peers.push(peer.clone());
        Ok(peer)
    }
}

/// `MemoryStore` wrapper that counts reads and can inject failures
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    gets: AtomicUsize,
    fail_appends: AtomicBool,
    answer_after_get: AtomicBool,
    fail_candidate_watch: AtomicBool,
    candidate_watch_delay_ms: AtomicU64,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_candidate_watch(&self, fail: bool) {
        self.fail_candidate_watch.store(fail, Ordering::SeqCst);
    }

    /// Hold every candidate subscription for `delay` before attaching it
    pub fn delay_candidate_watch(&self, delay: Duration) {
        self.candidate_watch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Have another party answer right after the next read
    pub fn answer_after_get(&self) {
        self.answer_after_get.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingStore for CountingStore {
    async fn create_session(&self) -> Result<SessionId> {
        self.inner.create_session().await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let record = self.inner.get_session(id).await?;
        if self.answer_after_get.swap(false, Ordering::SeqCst) {
            self.inner
                .merge_session(
                    id,
                    SessionPatch::answer(SessionDescription::answer("v=0 answer from elsewhere")),
                    Precondition::None,
                )
                .await?;
        }
        Ok(record)
    }

    async fn merge_session(
        &self,
        id: &SessionId,
        patch: SessionPatch,
        precondition: Precondition,
    ) -> Result<()> {
        self.inner.merge_session(id, patch, precondition).await
    }

    async fn append_candidate(
        &self,
        id: &SessionId,
        side: CandidateSide,
        candidate: IceCandidate,
    ) -> Result<String> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::Store("write rejected".into()));
        }
        self.inner.append_candidate(id, side, candidate).await
    }

    async fn watch_session(&self, id: &SessionId) -> Result<Watch<SessionRecord>> {
        self.inner.watch_session(id).await
    }

    async fn watch_candidates(
        &self,
        id: &SessionId,
        side: CandidateSide,
    ) -> Result<Watch<Vec<CandidateChange>>> {
        let delay = self.candidate_watch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_candidate_watch.load(Ordering::SeqCst) {
            return Err(Error::Store("listener rejected".into()));
        }
        self.inner.watch_candidates(id, side).await
    }
}

pub fn host_candidate(ip: &str, port: u16) -> IceCandidate {
    let mut cand = IceCandidate::new(format!(
        "candidate:1 1 udp 2122260223 {} {} typ host",
        ip, port
    ));
    cand.sdp_mid = Some("0".into());
    cand.sdp_mline_index = Some(0);
    cand
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Let spawned listeners drain what is already queued
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
