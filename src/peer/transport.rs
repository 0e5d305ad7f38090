//! Contracts the call state machines expect from the media engine.

use crate::error::Result;
use crate::peer::types::{
    IceCandidate, MediaConstraints, MediaStream, PeerEvent, RtcSettings, SessionDescription,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capture and peer-link factory
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Open local capture. Fails with `Error::MediaAccess` when a requested
    /// device is missing or permission is denied.
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<MediaStream>;

    async fn create_peer(&self, settings: &RtcSettings) -> Result<Arc<dyn PeerLink>>;
}

/// One peer-to-peer connection.
///
/// `add_ice_candidate` must be safe to call before a remote description is
/// set; implementations hold such candidates until one is applied.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn add_stream(&self, stream: &MediaStream) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Event feed for this link; only the first call gets it
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    async fn close(&self) -> Result<()>;
}
