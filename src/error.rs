//! Error types for call signaling

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up, running or ending a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera or microphone unavailable or permission denied
    #[error("Media access error: {0}")]
    MediaAccess(String),

    /// Join attempted without a call identifier
    #[error("Missing call identifier")]
    MissingIdentifier,

    /// Manually entered identifier is too short to be a real one
    #[error("Invalid call identifier: {len} characters, expected at least {min}")]
    InvalidIdentifier { len: usize, min: usize },

    /// Unknown session, or a session without an offer
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session already carries an answer
    #[error("Session already answered: {0}")]
    AnswerConflict(String),

    /// Platform share sheet failed
    #[error("Share failed: {0}")]
    ShareFailure(String),

    /// Conditional store write rejected
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Operation not allowed in the current call state
    #[error("Cannot {op} while {state}")]
    InvalidState { op: &'static str, state: String },

    /// Signaling store failure
    #[error("Signaling store error: {0}")]
    Store(String),

    /// Media transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),
}

impl Error {
    /// Errors meant to be shown to the user rather than treated as faults
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::MediaAccess(_)
                | Error::MissingIdentifier
                | Error::InvalidIdentifier { .. }
                | Error::SessionNotFound(_)
                | Error::AnswerConflict(_)
                | Error::ShareFailure(_)
        )
    }

    /// Whether the user may retry the same action with corrected input
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::MissingIdentifier
                | Error::InvalidIdentifier { .. }
                | Error::SessionNotFound(_)
                | Error::ShareFailure(_)
        )
    }

    /// Short text for a toast or inline message
    pub fn user_message(&self) -> String {
        match self {
            Error::MediaAccess(_) => {
                "Camera and microphone are required to start a call.".to_string()
            }
            Error::MissingIdentifier => "Enter a Call ID to join the call!".to_string(),
            Error::InvalidIdentifier { min, .. } => {
                format!("A Call ID has at least {min} characters.")
            }
            Error::SessionNotFound(_) => {
                "No call found for this Call ID. Check it and try again.".to_string()
            }
            Error::AnswerConflict(_) => "Someone has already joined this call.".to_string(),
            Error::ShareFailure(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
