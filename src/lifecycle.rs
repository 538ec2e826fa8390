//! Pipeline lifecycle: initialisation, fatal-config disable, and reset.
//!
//! ```text
//! Idle ──initialize()──▶ Initializing ──identity loaded──▶ Ready
//! Ready ──fatal config (401/403/404)──▶ Disabled
//! Ready ──reset()──▶ Resetting ──teardown complete──▶ Idle
//! Disabled ──reset()──▶ Resetting ──teardown complete──▶ Idle
//! ```
//!
//! Transitions are serialised by a single async lock; `Disabled` is terminal
//! until a reset returns the controller to `Idle`.

use crate::client::{Client, Collaborators};
use crate::config::{ConfigError, InitOptions};
use crate::BreakerConfig;
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Initializing,
    Ready,
    Resetting,
    Disabled,
}

#[derive(Debug, Default)]
pub struct LifecycleController {
    state: Mutex<LifecycleState>,
    client: Mutex<Option<Arc<Client>>>,
    /// Serialises initialize/reset; never held across dispatch.
    transition: tokio::sync::Mutex<()>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Validate options, construct the pipeline, and bring it to `Ready`.
    ///
    /// Repeated calls while already initialised are no-ops that return the
    /// existing client, so they observe the same `anonymousId`. `Disabled`
    /// stays disabled until a reset.
    pub async fn initialize(
        self: &Arc<Self>,
        options: InitOptions,
        collaborators: Collaborators,
    ) -> Result<Arc<Client>, ConfigError> {
        options.validate()?;
        let _guard = self.transition.lock().await;

        match self.state() {
            LifecycleState::Idle => {}
            state => {
                tracing::warn!(?state, "initialize called out of Idle, keeping existing pipeline");
                if let Some(existing) = self.client() {
                    return Ok(existing);
                }
                // A controller stuck without a client (should not happen)
                // falls through and initialises.
            }
        }

        self.set_state(LifecycleState::Initializing);
        let client =
            Arc::new(Client::new(&options, &collaborators, BreakerConfig::default()).await);

        let controller: Weak<LifecycleController> = Arc::downgrade(self);
        client.dispatcher().set_fatal_config_handler(move |status| {
            if let Some(controller) = controller.upgrade() {
                controller.on_fatal_config(status);
            }
        });

        *self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(Arc::clone(&client));
        self.set_state(LifecycleState::Ready);
        client.start();
        tracing::debug!("pipeline ready");
        Ok(client)
    }

    /// Fatal collector response: stop delivery for good until a reset.
    fn on_fatal_config(&self, status: u16) {
        if let Some(client) = self.client() {
            client.disable();
        }
        self.set_state(LifecycleState::Disabled);
        tracing::error!(status, "pipeline disabled by fatal configuration response");
    }

    /// Tear the pipeline down and return to `Idle`. Completes only after
    /// teardown is done; repeated resets are no-ops.
    pub async fn reset(&self) {
        let _guard = self.transition.lock().await;
        let client = self.client.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if client.is_none() && self.state() == LifecycleState::Idle {
            return;
        }
        self.set_state(LifecycleState::Resetting);
        if let Some(client) = client {
            client.teardown();
        }
        self.set_state(LifecycleState::Idle);
        tracing::debug!("pipeline reset to idle");
    }
}
