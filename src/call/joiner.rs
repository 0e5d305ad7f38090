//! Callee side: answers an existing session.

use super::{CallCore, CallEvent, CallPhase};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::peer::transport::MediaTransport;
use crate::peer::types::{MediaStream, SessionDescription};
use crate::signaling::{
    CandidateSide, Precondition, SessionField, SessionId, SessionPatch, SignalingStore,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerState {
    Idle,
    MediaReady,
    AwaitingSessionId,
    Joining,
    Negotiating,
    Connected,
    Ended,
}

impl fmt::Display for JoinerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl CallPhase for JoinerState {
    const IDLE: Self = JoinerState::Idle;
    const MEDIA_READY: Self = JoinerState::MediaReady;
    const CONNECTED: Self = JoinerState::Connected;
    const ENDED: Self = JoinerState::Ended;

    // the link can come up while the answer write is still in flight
    fn awaits_connection(&self) -> bool {
        matches!(self, JoinerState::Joining | JoinerState::Negotiating)
    }
}

pub struct Joiner {
    core: CallCore<JoinerState>,
}

impl Joiner {
    pub fn new(
        config: AppConfig,
        transport: Arc<dyn MediaTransport>,
        store: Arc<dyn SignalingStore>,
    ) -> Self {
        Self {
            core: CallCore::new(config, transport, store),
        }
    }

    pub fn state(&self) -> JoinerState {
        self.core.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<JoinerState> {
        self.core.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.core.events()
    }

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

    /// Join the session named by `input` (as typed or pasted by the user).
    ///
    /// Validation and lookup failures leave the joiner in
    /// `AwaitingSessionId` so a corrected id can be tried. Losing the answer
    /// race after the offer was applied ends the call.
    #[instrument(skip(self))]
    pub async fn join(&mut self, input: &str) -> Result<()> {
        self.core.require(
            "join",
            &[JoinerState::MediaReady, JoinerState::AwaitingSessionId],
        )?;
        self.core.set_state(JoinerState::AwaitingSessionId);

        let id = SessionId::parse_manual(input, self.core.config().min_call_id_length)?;

        self.core.set_state(JoinerState::Joining);
        let store = self.core.store();

        let offer = match store.get_session(&id).await {
            Ok(Some(record)) if record.answer.is_some() => {
                self.core.set_state(JoinerState::AwaitingSessionId);
                return Err(Error::AnswerConflict(id.to_string()));
            }
            Ok(Some(record)) => record.offer,
            Ok(None) => None,
            Err(e) => {
                self.core.set_state(JoinerState::AwaitingSessionId);
                return Err(e);
            }
        };
        let Some(offer) = offer else {
            self.core.set_state(JoinerState::AwaitingSessionId);
            return Err(Error::SessionNotFound(id.to_string()));
        };

        // the link is bound to this session from here on
        self.core.set_session(id.clone());
        if let Err(e) = self.answer(&id, offer, store.as_ref()).await {
            warn!("Joining session {} failed: {}", id, e);
            self.core.end().await;
            return Err(e);
        }

        self.core.advance(JoinerState::Joining, JoinerState::Negotiating);
        info!("Joined session {}", id);
        Ok(())
    }

    async fn answer(
        &mut self,
        id: &SessionId,
        offer: SessionDescription,
        store: &dyn SignalingStore,
    ) -> Result<()> {
        let link = self.core.link()?;
        self.core.spawn_local_pump(id.clone(), CandidateSide::Answer)?;

        link.set_remote_description(offer).await?;
        let answer = link.create_answer().await?;
        link.set_local_description(answer.clone()).await?;

        // subscribe before the answer write: a failed subscription must not leave an answer behind
        self.core
            .spawn_remote_candidates(id, CandidateSide::Offer)
            .await?;

        store
            .merge_session(
                id,
                SessionPatch::answer(answer),
                Precondition::FieldAbsent(SessionField::Answer),
            )
            .await
            .map_err(|e| match e {
                Error::PreconditionFailed(_) => Error::AnswerConflict(id.to_string()),
                other => other,
            })?;
        info!("Answer published on session {}", id);
        Ok(())
    }

    /// `* → Ended`. Does nothing when no call is active.
    pub async fn end(&mut self) {
        self.core.end().await;
    }
}
