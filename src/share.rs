//! Handing the call id to the platform share sheet.

use crate::error::{Error, Result};
use crate::signaling::SessionId;
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    /// `activity` names the target app when the platform reports one
    Shared { activity: Option<String> },
    Dismissed,
}

/// Platform share mechanism
#[async_trait]
pub trait ShareTarget: Send + Sync {
    async fn share(&self, message: &str) -> std::result::Result<ShareOutcome, String>;
}

/// Writes the invitation to the log instead of a share sheet
#[derive(Debug, Default, Clone, Copy)]
pub struct LogShare;

#[async_trait]
impl ShareTarget for LogShare {
    async fn share(&self, message: &str) -> std::result::Result<ShareOutcome, String> {
        info!("{}", message);
        Ok(ShareOutcome::Shared {
            activity: Some("log".to_string()),
        })
    }
}

pub fn invitation(id: &SessionId) -> String {
    format!("Hey, join meeting by using this Meeting ID: {}", id)
}

/// Share the call id. Failures are reported as `Error::ShareFailure` and
/// never touch call state.
pub async fn share_call_id(target: &dyn ShareTarget, id: Option<&SessionId>) -> Result<ShareOutcome> {
    let id = id.ok_or(Error::MissingIdentifier)?;
    target
        .share(&invitation(id))
        .await
        .map_err(Error::ShareFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl ShareTarget for Broken {
        async fn share(&self, _message: &str) -> std::result::Result<ShareOutcome, String> {
            Err("share sheet unavailable".into())
        }
    }

    struct Dismissing;

    #[async_trait]
    impl ShareTarget for Dismissing {
        async fn share(&self, _message: &str) -> std::result::Result<ShareOutcome, String> {
            Ok(ShareOutcome::Dismissed)
        }
    }

    #[test]
    fn invitation_text() {
        let id = SessionId::new("abc123");
        assert_eq!(
            invitation(&id),
            "Hey, join meeting by using this Meeting ID: abc123"
        );
    }

    #[tokio::test]
    async fn missing_id_is_rejected() {
        let err = share_call_id(&LogShare, None).await.unwrap_err();
        assert!(matches!(err, Error::MissingIdentifier));
    }

    #[tokio::test]
    async fn platform_failure_becomes_share_failure() {
        let id = SessionId::new("abc123");
        let err = share_call_id(&Broken, Some(&id)).await.unwrap_err();
        assert!(matches!(err, Error::ShareFailure(ref msg) if msg == "share sheet unavailable"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn outcomes_pass_through() {
        let id = SessionId::new("abc123");
        assert_eq!(
            share_call_id(&Dismissing, Some(&id)).await.unwrap(),
            ShareOutcome::Dismissed
        );
        assert!(matches!(
            share_call_id(&LogShare, Some(&id)).await.unwrap(),
            ShareOutcome::Shared { .. }
        ));
    }
}
