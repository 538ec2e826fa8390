//! Public façade: accepts calls from any thread before the pipeline is
//! ready, replays them in order once it is, then forwards directly.
//!
//! Semantics
//! - Unbound, inbound calls land in a bounded FIFO of capacity 20;
//!   overflow drops the oldest recorded call.
//! - `bind` flips to bound and replays the buffer in order while holding
//!   the proxy lock, so no call that happens-after a completed bind can be
//!   interleaved before a buffered one.
//! - Forwarded calls observe the same happens-before order as their
//!   dispatch; the lock assigns the total order.

use crate::client::{Client, Collaborators};
use crate::config::{ConfigError, InitOptions};
use crate::dispatcher::DebugInfo;
use crate::event::{JsonMap, RawCall};
use crate::lifecycle::{LifecycleController, LifecycleState};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Calls recordable before the pipeline is ready.
#[derive(Debug, Clone, PartialEq)]
enum ProxyCall {
    Call(RawCall),
    Flush,
}

const REPLAY_BUFFER_CAPACITY: usize = 20;

enum ProxyState {
    Unbound { buffer: VecDeque<ProxyCall> },
    Bound { client: Arc<Client> },
}

/// The public entry point. Cheap to share behind an `Arc`; all methods take
/// `&self` and may be called from any thread.
pub struct Analytics {
    lifecycle: Arc<LifecycleController>,
    state: Mutex<ProxyState>,
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}

impl Analytics {
    pub fn new() -> Self {
        Self {
            lifecycle: Arc::new(LifecycleController::new()),
            state: Mutex::new(ProxyState::Unbound { buffer: VecDeque::new() }),
        }
    }

    /// Initialise with the production collaborators (reqwest transport,
    /// in-memory key-value store, static context) and bind, replaying any
    /// buffered calls. Fails fast only on invalid options.
    pub async fn initialize(&self, options: InitOptions) -> Result<(), ConfigError> {
        self.initialize_with(options, Collaborators::default()).await
    }

    /// Initialise with host-provided platform seams.
    pub async fn initialize_with(
        &self,
        options: InitOptions,
        collaborators: Collaborators,
    ) -> Result<(), ConfigError> {
        let client = self.lifecycle.initialize(options, collaborators).await?;
        self.bind(client);
        Ok(())
    }

    pub fn track(&self, event: impl Into<String>, properties: Option<JsonMap>) {
        self.submit(ProxyCall::Call(RawCall::Track { event: event.into(), properties }));
    }

    pub fn identify(&self, user_id: impl Into<String>, traits: Option<JsonMap>) {
        self.submit(ProxyCall::Call(RawCall::Identify { user_id: user_id.into(), traits }));
    }

    pub fn group(&self, group_id: impl Into<String>, traits: Option<JsonMap>) {
        self.submit(ProxyCall::Call(RawCall::Group { group_id: group_id.into(), traits }));
    }

    pub fn screen(&self, name: impl Into<String>, properties: Option<JsonMap>) {
        self.submit(ProxyCall::Call(RawCall::Screen { name: name.into(), properties }));
    }

    pub fn page(&self, name: impl Into<String>, properties: Option<JsonMap>) {
        self.submit(ProxyCall::Call(RawCall::Page { name: name.into(), properties }));
    }

    pub fn alias(&self, new_user_id: impl Into<String>) {
        self.submit(ProxyCall::Call(RawCall::Alias { new_user_id: new_user_id.into() }));
    }

    pub fn flush(&self) {
        self.submit(ProxyCall::Flush);
    }

    /// Tear the pipeline down and return to the buffering state. Completes
    /// after teardown; the next `initialize` mints a fresh `anonymousId`.
    pub async fn reset(&self) {
        self.unbind();
        self.lifecycle.reset().await;
    }

    /// Platform foreground signal: resume periodic flushing, flush now.
    pub fn handle_foreground(&self) {
        if let Some(client) = self.bound_client() {
            client.handle_foreground();
        }
    }

    /// Platform background signal: final flush, stop the loop, cancel any
    /// scheduled retry.
    pub fn handle_background(&self) {
        if let Some(client) = self.bound_client() {
            client.handle_background();
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// `None` until initialised.
    pub fn debug_info(&self) -> Option<DebugInfo> {
        Some(self.bound_client()?.debug_info())
    }

    /// `None` until initialised.
    pub fn anonymous_id(&self) -> Option<String> {
        Some(self.bound_client()?.anonymous_id())
    }

    fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bound_client(&self) -> Option<Arc<Client>> {
        match &*self.lock() {
            ProxyState::Bound { client } => Some(Arc::clone(client)),
            ProxyState::Unbound { .. } => None,
        }
    }

    fn submit(&self, call: ProxyCall) {
        let mut state = self.lock();
        match &mut *state {
            ProxyState::Unbound { buffer } => {
                if buffer.len() >= REPLAY_BUFFER_CAPACITY {
                    buffer.pop_front();
                    tracing::warn!(
                        capacity = REPLAY_BUFFER_CAPACITY,
                        "replay buffer full, dropping oldest recorded call"
                    );
                }
                buffer.push_back(call);
            }
            ProxyState::Bound { client } => forward(client, call),
        }
    }

    /// Flip to bound and replay the buffer in order. Synchronous: when this
    /// returns, every buffered call has been handed to the client.
    fn bind(&self, client: Arc<Client>) {
        let mut state = self.lock();
        if let ProxyState::Unbound { buffer } = &mut *state {
            let buffered: Vec<ProxyCall> = buffer.drain(..).collect();
            if !buffered.is_empty() {
                tracing::debug!(replayed = buffered.len(), "replaying buffered calls");
            }
            for call in buffered {
                forward(&client, call);
            }
        }
        *state = ProxyState::Bound { client };
    }

    /// Flip back to buffering. Synchronous; the fresh buffer starts empty.
    fn unbind(&self) {
        *self.lock() = ProxyState::Unbound { buffer: VecDeque::new() };
    }
}

impl fmt::Debug for Analytics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = matches!(&*self.lock(), ProxyState::Bound { .. });
        f.debug_struct("Analytics")
            .field("bound", &bound)
            .field("lifecycle", &self.lifecycle.state())
            .finish()
    }
}

fn forward(client: &Client, call: ProxyCall) {
    match call {
        ProxyCall::Call(raw) => client.dispatch(raw),
        ProxyCall::Flush => client.flush(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_calls_are_buffered_with_drop_oldest_overflow() {
        let analytics = Analytics::new();
        for i in 0..25 {
            analytics.track(format!("event-{i}"), None);
        }
        let guard = analytics.lock();
        match &*guard {
            ProxyState::Unbound { buffer } => {
                assert_eq!(buffer.len(), REPLAY_BUFFER_CAPACITY);
                let first = buffer.front().expect("non-empty buffer");
                assert_eq!(
                    *first,
                    ProxyCall::Call(RawCall::Track {
                        event: "event-5".to_string(),
                        properties: None
                    })
                );
            }
            ProxyState::Bound { .. } => panic!("proxy should be unbound"),
        }
    }

    #[test]
    fn debug_info_is_none_until_bound() {
        let analytics = Analytics::new();
        assert!(analytics.debug_info().is_none());
        assert!(analytics.anonymous_id().is_none());
        assert_eq!(analytics.state(), LifecycleState::Idle);
    }
}
