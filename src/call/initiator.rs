//! Caller side: creates the session and publishes the offer.

use super::{CallCore, CallEvent, CallPhase, CallShared};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::peer::transport::{MediaTransport, PeerLink};
use crate::peer::types::MediaStream;
use crate::signaling::{
    CandidateSide, Precondition, SessionId, SessionPatch, SessionRecord, SignalingStore, Watch,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    Idle,
    MediaReady,
    SessionCreated,
    Negotiating,
    Connected,
    Ended,
}

impl fmt::Display for InitiatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl CallPhase for InitiatorState {
    const IDLE: Self = InitiatorState::Idle;
    const MEDIA_READY: Self = InitiatorState::MediaReady;
    const CONNECTED: Self = InitiatorState::Connected;
    const ENDED: Self = InitiatorState::Ended;

    fn awaits_connection(&self) -> bool {
        matches!(self, InitiatorState::Negotiating)
    }
}

pub struct Initiator {
    core: CallCore<InitiatorState>,
}

impl Initiator {
    pub fn new(
        config: AppConfig,
        transport: Arc<dyn MediaTransport>,
        store: Arc<dyn SignalingStore>,
    ) -> Self {
        Self {
            core: CallCore::new(config, transport, store),
        }
    }

    pub fn state(&self) -> InitiatorState {
        self.core.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<InitiatorState> {
        self.core.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.core.events()
    }

    /// Identifier to share with the other party
    pub fn session_id(&self) -> Option<&SessionId> {
        self.core.session_id()
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.core.local_stream()
    }

    pub async fn remote_stream(&self) -> MediaStream {
        self.core.remote_stream().await
    }

    /// `Idle → MediaReady`
    pub async fn start_media(&mut self) -> Result<()> {
        self.core.start_media().await
    }

    /// `MediaReady → SessionCreated`: allocate the session and start
    /// publishing local candidates to it
    #[instrument(skip(self))]
    pub async fn create_session(&mut self) -> Result<SessionId> {
        self.core
            .require("create a session", &[InitiatorState::MediaReady])?;

        let id = self.core.store().create_session().await?;
        self.core.spawn_local_pump(id.clone(), CandidateSide::Offer)?;
        self.core.set_session(id.clone());
        self.core.set_state(InitiatorState::SessionCreated);

        info!("Session {} created", id);
        Ok(id)
    }

    /// `SessionCreated → Negotiating`: publish the offer, then wait for the
    /// answer and the joiner's candidates
    #[instrument(skip(self))]
    pub async fn negotiate(&mut self) -> Result<()> {
        self.core
            .require("negotiate", &[InitiatorState::SessionCreated])?;
        let id = self
            .core
            .session_id()
            .cloned()
            .ok_or_else(|| Error::InvalidState {
                op: "negotiate",
                state: "without a session".into(),
            })?;
        let link = self.core.link()?;
        let store = self.core.store();

        let offer = link.create_offer().await?;
        link.set_local_description(offer.clone()).await?;
        store
            .merge_session(&id, SessionPatch::offer(offer), Precondition::None)
            .await?;
        info!("Offer published on session {}", id);

        // the link may come up while the listeners below are still attaching
        self.core.set_state(InitiatorState::Negotiating);

        if let Err(e) = self.listen(&id, link).await {
            warn!("Listening on session {} failed: {}", id, e);
            self.core.end().await;
            return Err(e);
        }
        Ok(())
    }

    async fn listen(&mut self, id: &SessionId, link: Arc<dyn PeerLink>) -> Result<()> {
        let answers = self.core.store().watch_session(id).await?;
        let shared = self.core.shared();
        self.core
            .spawn_task("answer", apply_first_answer(answers, link, id.clone(), shared));

        self.core
            .spawn_remote_candidates(id, CandidateSide::Answer)
            .await
    }

    /// Create the session and publish the offer in one step
    pub async fn start_call(&mut self) -> Result<SessionId> {
        let id = self.create_session().await?;
        self.negotiate().await?;
        Ok(id)
    }

    /// `* → Ended`. Does nothing when no call is active.
    pub async fn end(&mut self) {
        self.core.end().await;
    }
}

/// Applies the answer the first time it shows up on the session document
async fn apply_first_answer(
    mut watch: Watch<SessionRecord>,
    link: Arc<dyn PeerLink>,
    id: SessionId,
    shared: Arc<CallShared<InitiatorState>>,
) {
    let mut applied = false;

    while let Some(record) = watch.recv().await {
        if shared.is_closed() {
            break;
        }
        let Some(answer) = record.answer else {
            continue;
        };
        if applied {
            debug!("Session {} updated after the answer was applied, ignoring", id);
            continue;
        }
        if link.has_remote_description().await {
            applied = true;
            continue;
        }

        match link.set_remote_description(answer).await {
            Ok(()) => {
                applied = true;
                info!("Answer applied for session {}", id);
            }
            Err(e) => warn!("Failed to apply answer for session {}: {}", id, e),
        }
    }
}
