//! Cancellation handles for listener tasks, released together when a call ends.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::debug;

/// One running listener
pub struct Subscription {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: tokio::spawn(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Abort the task and wait until its future has been dropped
    pub async fn cancel(self) {
        self.handle.abort();
        let _ = self.handle.await;
        debug!("Subscription '{}' cancelled", self.name);
    }
}

/// Listeners owned by one call
#[derive(Default)]
pub struct SubscriptionSet {
    subs: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.subs.push(Subscription::spawn(name, task));
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Cancel everything; returns once no listener can run anymore
    pub async fn cancel_all(&mut self) {
        for sub in self.subs.drain(..) {
            sub.cancel().await;
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        for sub in &self.subs {
            sub.handle.abort();
        }
    }
}
