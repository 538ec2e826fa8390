//! The bound client: identity side-effects, enrichment, and dispatch wiring
//! behind the façade.

use crate::config::InitOptions;
use crate::context::{Context, ContextProvider, StaticContextProvider};
use crate::dispatcher::{DebugInfo, Dispatcher, DispatcherConfig};
use crate::enrich::Enricher;
use crate::event::RawCall;
use crate::identity::{IdentityStore, KeyValueStore, MemoryKeyValueStore};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::BreakerConfig;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The injectable platform seams. Defaults are the in-process
/// implementations; hosts replace only what their platform provides.
pub struct Collaborators {
    pub transport: Arc<dyn HttpTransport>,
    pub key_value_store: Arc<dyn KeyValueStore>,
    pub context_provider: Arc<dyn ContextProvider>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
            key_value_store: Arc::new(MemoryKeyValueStore::new()),
            context_provider: Arc::new(StaticContextProvider::default()),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Enrichment plus delivery for one initialised pipeline instance.
pub struct Client {
    enricher: Enricher,
    dispatcher: Dispatcher,
    identity: IdentityStore,
    context_provider: Arc<dyn ContextProvider>,
    context: ArcSwap<Context>,
    flush_interval_seconds: u64,
    disabled: AtomicBool,
}

impl Client {
    /// Construct and materialise identity and context. Must run inside a
    /// Tokio runtime; options are assumed validated.
    pub(crate) async fn new(
        options: &InitOptions,
        collaborators: &Collaborators,
        breaker_config: BreakerConfig,
    ) -> Self {
        let identity = IdentityStore::new(Arc::clone(&collaborators.key_value_store));
        if let Some(advertising_id) = &options.advertising_id {
            identity.set_advertising_id(Some(advertising_id.as_str()));
        }

        let context =
            materialize_context(collaborators.context_provider.as_ref(), &identity).await;

        let dispatcher = Dispatcher::new(
            &options.ingestion_host,
            DispatcherConfig { debug: options.debug, ..DispatcherConfig::default() },
            breaker_config,
            options.max_queue_events.max(1),
            Arc::clone(&collaborators.transport),
        );

        Self {
            enricher: Enricher::new(options.write_key.clone()),
            dispatcher,
            identity,
            context_provider: Arc::clone(&collaborators.context_provider),
            context: ArcSwap::from_pointee(context),
            flush_interval_seconds: options.flush_interval_seconds.max(1),
            disabled: AtomicBool::new(false),
        }
    }

    /// Enrich and enqueue a semantic call. Dropped silently once disabled.
    pub fn dispatch(&self, call: RawCall) {
        self.dispatch_at(call, None);
    }

    /// Like [`Client::dispatch`], with a caller-provided ISO-8601 timestamp
    /// used verbatim.
    pub fn dispatch_at(&self, call: RawCall, timestamp: Option<String>) {
        if self.disabled.load(Ordering::Acquire) {
            return;
        }
        match &call {
            RawCall::Identify { user_id, .. } => self.identity.set_user_id(user_id),
            RawCall::Group { group_id, .. } => self.identity.set_group_id(group_id),
            // alias reads the prior user id from the snapshot below
            _ => {}
        }
        let snapshot = self.identity.snapshot();
        let context = self.context.load_full();
        let event = self.enricher.enrich(call, &snapshot, &context, timestamp);
        self.dispatcher.offer(event);
    }

    pub fn flush(&self) {
        self.dispatcher.flush();
    }

    /// Persist a new advertising id (or clear it), then rebuild the cached
    /// context so subsequent events carry it.
    pub async fn set_advertising_id(&self, advertising_id: Option<&str>) {
        self.identity.set_advertising_id(advertising_id);
        self.context_provider.clear_cache();
        let context = materialize_context(self.context_provider.as_ref(), &self.identity).await;
        self.context.store(Arc::new(context));
    }

    pub fn anonymous_id(&self) -> String {
        self.identity.anonymous_id()
    }

    pub fn debug_info(&self) -> DebugInfo {
        self.dispatcher.debug_info()
    }

    /// Start the periodic flush loop at the configured cadence.
    pub(crate) fn start(&self) {
        self.dispatcher.start_flush_loop(self.flush_interval_seconds);
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Fatal-config teardown: stop delivery, drop every subsequent call.
    pub(crate) fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
        self.dispatcher.stop_flush_loop();
        self.dispatcher.cancel_scheduled_retry();
    }

    /// Reset teardown: forfeit in-flight work, clear the queue, wipe
    /// persisted identity so the next initialisation starts fresh.
    pub(crate) fn teardown(&self) {
        self.disabled.store(true, Ordering::Release);
        self.dispatcher.reset();
        self.identity.reset();
        self.context_provider.clear_cache();
    }

    /// Foreground signal: resume the flush loop and flush immediately.
    pub fn handle_foreground(&self) {
        if self.disabled.load(Ordering::Acquire) {
            return;
        }
        self.start();
        self.dispatcher.flush();
    }

    /// Background signal: final flush, then stop the loop and cancel any
    /// scheduled retry.
    pub fn handle_background(&self) {
        self.dispatcher.flush();
        self.dispatcher.stop_flush_loop();
        self.dispatcher.cancel_scheduled_retry();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("disabled", &self.disabled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

async fn materialize_context(provider: &dyn ContextProvider, identity: &IdentityStore) -> Context {
    let mut context = provider.get_context().await;
    context.device.advertising_id = identity.snapshot().advertising_id;
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitOptions;

    fn options() -> InitOptions {
        InitOptions::new("wk", "https://h")
    }

    #[tokio::test]
    async fn advertising_id_from_options_lands_in_the_context() {
        let collaborators = Collaborators::default();
        let client = Client::new(
            &options().advertising_id("ad-1"),
            &collaborators,
            BreakerConfig::default(),
        )
        .await;
        assert_eq!(client.context.load().device.advertising_id.as_deref(), Some("ad-1"));
    }

    #[tokio::test]
    async fn changing_the_advertising_id_swaps_the_cached_context() {
        let collaborators = Collaborators::default();
        let client = Client::new(&options(), &collaborators, BreakerConfig::default()).await;
        assert_eq!(client.context.load().device.advertising_id, None);

        client.set_advertising_id(Some("ad-2")).await;
        assert_eq!(client.context.load().device.advertising_id.as_deref(), Some("ad-2"));

        client.set_advertising_id(None).await;
        assert_eq!(client.context.load().device.advertising_id, None);
    }

    #[tokio::test]
    async fn disabled_client_drops_calls_silently() {
        let collaborators = Collaborators::default();
        let client = Client::new(&options(), &collaborators, BreakerConfig::default()).await;
        client.disable();
        client.dispatch(RawCall::Track { event: "E".to_string(), properties: None });
        assert_eq!(client.debug_info().queue_length, 0);
    }

    #[tokio::test]
    async fn identify_and_group_write_through_to_identity() {
        let collaborators = Collaborators::default();
        let client = Client::new(&options(), &collaborators, BreakerConfig::default()).await;
        client.dispatch(RawCall::Identify { user_id: "u-1".to_string(), traits: None });
        client.dispatch(RawCall::Group { group_id: "g-1".to_string(), traits: None });
        let snapshot = client.identity.snapshot();
        assert_eq!(snapshot.user_id.as_deref(), Some("u-1"));
        assert_eq!(snapshot.group_id.as_deref(), Some("g-1"));
        assert_eq!(client.debug_info().queue_length, 2);
    }
}
