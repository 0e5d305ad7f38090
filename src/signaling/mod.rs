//! Signaling records and the store they are relayed through.
//!
//! A session document holds the offer and, once joined, the answer. Two
//! append-only sub-collections hold the candidates each side discovers.

pub mod memory;

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// Store-generated call identifier
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validate an identifier typed or pasted by the user
    pub fn parse_manual(input: &str, min_len: usize) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingIdentifier);
        }
        let len = trimmed.chars().count();
        if len < min_len {
            return Err(Error::InvalidIdentifier { len, min: min_len });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared session document
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            offer: None,
            answer: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_field(&self, field: SessionField) -> bool {
        match field {
            SessionField::Offer => self.offer.is_some(),
            SessionField::Answer => self.answer.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionField {
    Offer,
    Answer,
}

/// Field merge; `None` leaves the stored field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
}

impl SessionPatch {
    pub fn offer(offer: SessionDescription) -> Self {
        Self {
            offer: Some(offer),
            answer: None,
        }
    }

    pub fn answer(answer: SessionDescription) -> Self {
        Self {
            offer: None,
            answer: Some(answer),
        }
    }

    pub fn apply_to(self, record: &mut SessionRecord) {
        if let Some(offer) = self.offer {
            record.offer = Some(offer);
        }
        if let Some(answer) = self.answer {
            record.answer = Some(answer);
        }
        record.updated_at = Utc::now();
    }
}

/// Condition checked atomically with a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    FieldAbsent(SessionField),
}

impl Precondition {
    pub fn check(&self, record: &SessionRecord) -> Result<()> {
        match self {
            Precondition::None => Ok(()),
            Precondition::FieldAbsent(field) if record.has_field(*field) => {
                Err(Error::PreconditionFailed(format!(
                    "{:?} already set on session {}",
                    field, record.id
                )))
            }
            Precondition::FieldAbsent(_) => Ok(()),
        }
    }
}

/// Which party's candidates a collection holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSide {
    /// Discovered by the initiator
    Offer,
    /// Discovered by the joiner
    Answer,
}

impl CandidateSide {
    pub fn collection_name(&self) -> &'static str {
        match self {
            CandidateSide::Offer => "offerCandidates",
            CandidateSide::Answer => "answerCandidates",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
}

/// One entry of a candidate sub-collection notification
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateChange {
    pub kind: ChangeKind,
    pub key: String,
    pub candidate: IceCandidate,
}

/// Receiving end of a store subscription; dropping it detaches the listener
pub type Watch<T> = mpsc::UnboundedReceiver<T>;

/// Document store used as the signaling relay
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Create an empty session document with a generated id
    async fn create_session(&self) -> Result<SessionId>;

    async fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>>;

    /// Merge fields into the document. Fails with `Error::PreconditionFailed`
    /// when `precondition` does not hold at write time.
    async fn merge_session(
        &self,
        id: &SessionId,
        patch: SessionPatch,
        precondition: Precondition,
    ) -> Result<()>;

    /// Append to a candidate sub-collection; returns the generated entry key
    async fn append_candidate(
        &self,
        id: &SessionId,
        side: CandidateSide,
        candidate: IceCandidate,
    ) -> Result<String>;

    /// Document snapshots: the current state first, then one per update
    async fn watch_session(&self, id: &SessionId) -> Result<Watch<SessionRecord>>;

    /// Existing entries as the first batch, then only new entries
    async fn watch_candidates(
        &self,
        id: &SessionId,
        side: CandidateSide,
    ) -> Result<Watch<Vec<CandidateChange>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_manual_validates_presence_and_length() {
        assert!(matches!(
            SessionId::parse_manual("   ", 20),
            Err(Error::MissingIdentifier)
        ));
        assert!(matches!(
            SessionId::parse_manual("abc", 20),
            Err(Error::InvalidIdentifier { len: 3, min: 20 })
        ));
        let id = SessionId::parse_manual("  0123456789abcdef0123 ", 20).unwrap();
        assert_eq!(id.as_str(), "0123456789abcdef0123");
    }

    #[test]
    fn answer_precondition() {
        let mut record = SessionRecord::new(SessionId::new("s"));
        let guard = Precondition::FieldAbsent(SessionField::Answer);
        assert!(guard.check(&record).is_ok());

        SessionPatch::answer(SessionDescription::answer("v=0")).apply_to(&mut record);
        assert!(matches!(
            guard.check(&record),
            Err(Error::PreconditionFailed(_))
        ));
        assert!(Precondition::None.check(&record).is_ok());
    }

    #[test]
    fn patch_merges_without_clearing() {
        let mut record = SessionRecord::new(SessionId::new("s"));
        SessionPatch::offer(SessionDescription::offer("o")).apply_to(&mut record);
        SessionPatch::answer(SessionDescription::answer("a")).apply_to(&mut record);
        assert_eq!(record.offer, Some(SessionDescription::offer("o")));
        assert_eq!(record.answer, Some(SessionDescription::answer("a")));
    }

    #[test]
    fn record_document_shape() {
        let mut record = SessionRecord::new(SessionId::new("abc"));
        SessionPatch::offer(SessionDescription::offer("v=0")).apply_to(&mut record);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["offer"]["type"], "offer");
        assert!(value.get("answer").is_none());
    }
}
