pub mod connection;
pub mod ice;
pub mod media;
pub mod transport;
pub mod types;

pub use connection::{WebRtcPeer, WebRtcTransport};
pub use ice::{analyze_candidates, CandidateFeed, CandidateSummary, PendingCandidates};
pub use transport::{MediaTransport, PeerLink};
pub use types::{
    IceCandidate, IceServer, LinkState, MediaConstraints, MediaStream, MediaTrack, PeerEvent,
    RtcSettings, SdpKind, SessionDescription, TrackKind,
};
