pub mod call;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod share;
pub mod signaling;
pub mod subscription;
pub mod utils;

pub use call::{CallEvent, Initiator, InitiatorState, Joiner, JoinerState};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use peer::WebRtcTransport;
pub use signaling::{MemoryStore, SessionId, SignalingStore};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const DEMO_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Runs both sides of a call in one process over an in-memory store.
pub async fn run(config: AppConfig) -> Result<()> {
    config.validate()?;
    let store: Arc<dyn SignalingStore> = Arc::new(MemoryStore::new());

    let mut caller = Initiator::new(
        config.clone(),
        Arc::new(WebRtcTransport::new()),
        Arc::clone(&store),
    );
    let mut callee = Joiner::new(config, Arc::new(WebRtcTransport::new()), store);

    caller.start_media().await?;
    let id = caller.start_call().await?;
    share::share_call_id(&share::LogShare, Some(&id)).await?;

    callee.start_media().await?;
    if let Err(e) = callee.join(id.as_str()).await {
        caller.end().await;
        return Err(e);
    }

    let connected = tokio::time::timeout(DEMO_CONNECT_TIMEOUT, async {
        tokio::join!(
            wait_for(caller.watch_state(), InitiatorState::Connected),
            wait_for(callee.watch_state(), JoinerState::Connected),
        )
    })
    .await;

    match connected {
        Ok(_) => info!("Both sides connected on session {}", id),
        Err(_) => warn!("Call on session {} did not connect in time", id),
    }

    callee.end().await;
    caller.end().await;
    Ok(())
}

async fn wait_for<S: PartialEq>(mut rx: watch::Receiver<S>, target: S) {
    // a closed channel means the call is gone
    let _ = rx.wait_for(|state| *state == target).await;
}
