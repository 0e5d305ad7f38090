//! Call state machines for both sides of the signaling protocol.
//!
//! Each call owns its peer link, its local stream and every listener it
//! starts. Listener tasks hold `Arc` clones of what they need; nothing is
//! global. `end` cancels the listeners, stops the tracks and closes the link
//! before it returns.

pub mod initiator;
pub mod joiner;

pub use initiator::{Initiator, InitiatorState};
pub use joiner::{Joiner, JoinerState};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::logger::dump_candidate;
use crate::peer::ice::{analyze_candidates, CandidateFeed};
use crate::peer::transport::{MediaTransport, PeerLink};
use crate::peer::types::{LinkState, MediaStream, PeerEvent, TrackKind};
use crate::signaling::{CandidateSide, ChangeKind, SessionId, SignalingStore};
use crate::subscription::SubscriptionSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 32;

/// State enum of one side of the call
pub trait CallPhase: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const IDLE: Self;
    const MEDIA_READY: Self;
    const CONNECTED: Self;
    const ENDED: Self;

    /// States from which a working link moves the call to `CONNECTED`
    fn awaits_connection(&self) -> bool;
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    RemoteTrack { id: String, kind: TrackKind },
    /// The link dropped; it may still come back
    ConnectionProblem,
    ConnectionRecovered,
    ConnectionFailed,
}

/// State reachable from listener tasks
pub(crate) struct CallShared<S> {
    state: watch::Sender<S>,
    remote: Mutex<MediaStream>,
    events: broadcast::Sender<CallEvent>,
    closed: AtomicBool,
}

impl<S: CallPhase> CallShared<S> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_connected(&self) {
        let changed = self.state.send_if_modified(|state| {
            if state.awaits_connection() {
                *state = S::CONNECTED;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Call connected");
        }
    }

    fn emit(&self, event: CallEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

pub(crate) struct CallCore<S: CallPhase> {
    config: AppConfig,
    transport: Arc<dyn MediaTransport>,
    store: Arc<dyn SignalingStore>,
    shared: Arc<CallShared<S>>,
    link: Option<Arc<dyn PeerLink>>,
    local: Option<MediaStream>,
    session: Option<SessionId>,
    subscriptions: SubscriptionSet,
}

impl<S: CallPhase> CallCore<S> {
    pub(crate) fn new(
        config: AppConfig,
        transport: Arc<dyn MediaTransport>,
        store: Arc<dyn SignalingStore>,
    ) -> Self {
        let (state, _) = watch::channel(S::IDLE);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            transport,
            store,
            shared: Arc::new(CallShared {
                state,
                remote: Mutex::new(MediaStream::new("remote")),
                events,
                closed: AtomicBool::new(false),
            }),
            link: None,
            local: None,
            session: None,
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub(crate) fn state(&self) -> S {
        *self.shared.state.borrow()
    }

    pub(crate) fn set_state(&self, state: S) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!("Call state {:?} -> {:?}", previous, state);
        }
    }

    /// Move to `to` only if the call is still in `from`
    pub(crate) fn advance(&self, from: S, to: S) -> bool {
        self.shared.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn require(&self, op: &'static str, allowed: &[S]) -> Result<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                op,
                state: format!("{:?}", state),
            })
        }
    }

    pub(crate) fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> Arc<dyn SignalingStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<S> {
        self.shared.state.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub(crate) fn set_session(&mut self, id: SessionId) {
        self.session = Some(id);
    }

    pub(crate) fn local_stream(&self) -> Option<&MediaStream> {
        self.local.as_ref()
    }

    pub(crate) async fn remote_stream(&self) -> MediaStream {
        self.shared.remote.lock().await.clone()
    }

    pub(crate) fn link(&self) -> Result<Arc<dyn PeerLink>> {
        self.link.clone().ok_or_else(|| Error::InvalidState {
            op: "negotiate",
            state: "without a peer link".into(),
        })
    }

    /// Open capture, create the peer link and attach the local stream
    pub(crate) async fn start_media(&mut self) -> Result<()> {
        self.require("start media", &[S::IDLE, S::ENDED])?;

        self.shared.closed.store(false, Ordering::SeqCst);
        *self.shared.remote.lock().await = MediaStream::new("remote");

        let local = self
            .transport
            .acquire_local_media(self.config.media)
            .await?;

        let link = match self.transport.create_peer(&self.config.rtc_settings()).await {
            Ok(link) => link,
            Err(e) => {
                local.stop_all();
                return Err(e);
            }
        };

        if let Err(e) = link.add_stream(&local).await {
            local.stop_all();
            if let Err(close_err) = link.close().await {
                warn!("Failed to close peer link: {}", close_err);
            }
            return Err(e);
        }

        info!("Media ready: {} local tracks", local.tracks().len());
        self.local = Some(local);
        self.link = Some(link);
        self.set_state(S::MEDIA_READY);
        Ok(())
    }

    /// Publish every local candidate to `side` and route the link's other
    /// events into call state
    pub(crate) fn spawn_local_pump(&mut self, id: SessionId, side: CandidateSide) -> Result<()> {
        let link = self.link()?;
        let events = link
            .take_events()
            .ok_or_else(|| Error::Transport("peer link events already taken".into()))?;
        let store = self.store();
        let shared = Arc::clone(&self.shared);
        let relay_expected = self.config.has_relay();

        self.subscriptions.spawn(
            "local-candidates",
            pump_link_events(events, store, id, side, shared, relay_expected),
        );
        Ok(())
    }

    /// Feed each new candidate from `side` to the link, once
    pub(crate) async fn spawn_remote_candidates(
        &mut self,
        id: &SessionId,
        side: CandidateSide,
    ) -> Result<()> {
        let link = self.link()?;
        let mut changes = self.store.watch_candidates(id, side).await?;
        let shared = Arc::clone(&self.shared);

        self.subscriptions.spawn("remote-candidates", async move {
            let mut feed = CandidateFeed::new();
            while let Some(batch) = changes.recv().await {
                if shared.is_closed() {
                    break;
                }
                for change in batch {
                    if change.kind != ChangeKind::Added || !feed.admit(&change.candidate) {
                        continue;
                    }
                    dump_candidate("REMOTE", &change.candidate);
                    if let Err(e) = link.add_ice_candidate(change.candidate).await {
                        warn!("Failed to add remote candidate {}: {}", change.key, e);
                    }
                }
            }
            debug!(
                "Stopped reading {} after {} candidates",
                side.collection_name(),
                feed.applied()
            );
        });
        Ok(())
    }

    pub(crate) fn spawn_task<F>(&mut self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.subscriptions.spawn(name, task);
    }

    pub(crate) fn shared(&self) -> Arc<CallShared<S>> {
        Arc::clone(&self.shared)
    }

    /// Release everything the call holds. Safe to call at any time.
    pub(crate) async fn end(&mut self) {
        let active = self.link.is_some() || self.local.is_some() || !self.subscriptions.is_empty();
        if !active {
            debug!("end: no active call");
            return;
        }

        self.shared.closed.store(true, Ordering::SeqCst);
        self.subscriptions.cancel_all().await;

        if let Some(local) = self.local.take() {
            local.stop_all();
        }
        {
            let mut remote = self.shared.remote.lock().await;
            remote.stop_all();
            *remote = MediaStream::new("remote");
        }
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!("Failed to close peer link: {}", e);
            }
        }

        if let Some(id) = self.session.take() {
            info!("Call on session {} ended", id);
        }
        self.set_state(S::ENDED);
    }
}

async fn pump_link_events<S: CallPhase>(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    store: Arc<dyn SignalingStore>,
    id: SessionId,
    side: CandidateSide,
    shared: Arc<CallShared<S>>,
    relay_expected: bool,
) {
    let mut gathered = Vec::new();
    let mut link_down = false;

    while let Some(event) = events.recv().await {
        if shared.is_closed() {
            break;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                gathered.push(candidate.clone());
                // best effort: another candidate may still get through
                if let Err(e) = store.append_candidate(&id, side, candidate).await {
                    warn!(
                        "Failed to publish candidate to {}: {}",
                        side.collection_name(),
                        e
                    );
                }
            }
            PeerEvent::GatheringComplete => {
                info!("Gathered {} local candidates", gathered.len());
                analyze_candidates(&gathered, relay_expected);
            }
            PeerEvent::RemoteTrack(track) => {
                let event = CallEvent::RemoteTrack {
                    id: track.id().to_string(),
                    kind: track.kind(),
                };
                shared.remote.lock().await.add_track(track);
                shared.emit(event);
                shared.mark_connected();
            }
            PeerEvent::StateChanged(LinkState::Connected) => {
                if link_down {
                    link_down = false;
                    shared.emit(CallEvent::ConnectionRecovered);
                }
                shared.mark_connected();
            }
            PeerEvent::StateChanged(LinkState::Disconnected) => {
                link_down = true;
                shared.emit(CallEvent::ConnectionProblem);
            }
            PeerEvent::StateChanged(LinkState::Failed) => {
                shared.emit(CallEvent::ConnectionFailed);
            }
            PeerEvent::StateChanged(state) => {
                debug!("Peer link state: {:?}", state);
            }
        }
    }
}
