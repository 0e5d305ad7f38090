//! In-process `SignalingStore`.
//!
//! Both parties of a call share one `MemoryStore` (clone it, it is a handle).
//! Listener semantics follow a document database: a session watch gets the
//! current document right away and a fresh snapshot after every merge; a
//! candidate watch gets the existing entries as one batch, then only entries
//! appended later.

use super::{
    CandidateChange, CandidateSide, ChangeKind, Precondition, SessionId, SessionPatch,
    SessionRecord, SignalingStore, Watch,
};
use crate::error::{Error, Result};
use crate::peer::types::IceCandidate;
use crate::utils::random_id;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Bytes of randomness in a generated session id (hex encoded, 20 chars)
const SESSION_ID_BYTES: usize = 10;

#[derive(Default)]
struct CandidateCollection {
    entries: Vec<CandidateChange>,
    watchers: Vec<mpsc::UnboundedSender<Vec<CandidateChange>>>,
}

impl CandidateCollection {
    fn notify(&mut self, batch: Vec<CandidateChange>) {
        self.watchers.retain(|tx| tx.send(batch.clone()).is_ok());
    }
}

struct Channel {
    record: SessionRecord,
    watchers: Vec<mpsc::UnboundedSender<SessionRecord>>,
    offer_candidates: CandidateCollection,
    answer_candidates: CandidateCollection,
}

impl Channel {
    fn new(id: SessionId) -> Self {
        Self {
            record: SessionRecord::new(id),
            watchers: Vec::new(),
            offer_candidates: CandidateCollection::default(),
            answer_candidates: CandidateCollection::default(),
        }
    }

    fn collection(&mut self, side: CandidateSide) -> &mut CandidateCollection {
        match side {
            CandidateSide::Offer => &mut self.offer_candidates,
            CandidateSide::Answer => &mut self.answer_candidates,
        }
    }

    fn notify(&mut self) {
        let snapshot = self.record.clone();
        self.watchers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    channels: Arc<Mutex<HashMap<SessionId, Channel>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live listeners on a session and its collections
    pub async fn listener_count(&self, id: &SessionId) -> usize {
        let mut channels = self.channels.lock().await;
        let Some(channel) = channels.get_mut(id) else {
            return 0;
        };
        channel.watchers.retain(|tx| !tx.is_closed());
        channel.offer_candidates.watchers.retain(|tx| !tx.is_closed());
        channel.answer_candidates.watchers.retain(|tx| !tx.is_closed());
        channel.watchers.len()
            + channel.offer_candidates.watchers.len()
            + channel.answer_candidates.watchers.len()
    }

    /// Stored candidates of one side, in append order
    pub async fn candidates(&self, id: &SessionId, side: CandidateSide) -> Vec<IceCandidate> {
        let mut channels = self.channels.lock().await;
        channels
            .get_mut(id)
            .map(|channel| {
                channel
                    .collection(side)
                    .entries
                    .iter()
                    .map(|change| change.candidate.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn not_found(id: &SessionId) -> Error {
    Error::SessionNotFound(id.to_string())
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(&self) -> Result<SessionId> {
        let mut channels = self.channels.lock().await;
        let id = loop {
            let id = SessionId::new(random_id(SESSION_ID_BYTES));
            if !channels.contains_key(&id) {
                break id;
            }
        };
        channels.insert(id.clone(), Channel::new(id.clone()));
        debug!("Created session document {}", id);
        Ok(id)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let channels = self.channels.lock().await;
        Ok(channels.get(id).map(|channel| channel.record.clone()))
    }

    async fn merge_session(
        &self,
        id: &SessionId,
        patch: SessionPatch,
        precondition: Precondition,
    ) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let channel = channels.get_mut(id).ok_or_else(|| not_found(id))?;
        precondition.check(&channel.record)?;
        patch.apply_to(&mut channel.record);
        channel.notify();
        Ok(())
    }

    async fn append_candidate(
        &self,
        id: &SessionId,
        side: CandidateSide,
        candidate: IceCandidate,
    ) -> Result<String> {
        let mut channels = self.channels.lock().await;
        let channel = channels.get_mut(id).ok_or_else(|| not_found(id))?;
        let change = CandidateChange {
            kind: ChangeKind::Added,
            key: random_id(SESSION_ID_BYTES),
            candidate,
        };
        let key = change.key.clone();
        let collection = channel.collection(side);
        collection.entries.push(change.clone());
        collection.notify(vec![change]);
        Ok(key)
    }

    async fn watch_session(&self, id: &SessionId) -> Result<Watch<SessionRecord>> {
        let mut channels = self.channels.lock().await;
        let channel = channels.get_mut(id).ok_or_else(|| not_found(id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(channel.record.clone()).is_ok() {
            channel.watchers.push(tx);
        }
        Ok(rx)
    }

    async fn watch_candidates(
        &self,
        id: &SessionId,
        side: CandidateSide,
    ) -> Result<Watch<Vec<CandidateChange>>> {
        let mut channels = self.channels.lock().await;
        let channel = channels.get_mut(id).ok_or_else(|| not_found(id))?;
        let collection = channel.collection(side);
        let (tx, rx) = mpsc::unbounded_channel();
        if !collection.entries.is_empty() {
            let _ = tx.send(collection.entries.clone());
        }
        collection.watchers.push(tx);
        Ok(rx)
    }
}
