#![forbid(unsafe_code)]

//! # metarouter
//!
//! Client-side analytics delivery pipeline for async Rust: semantic events
//! (`track`, `identify`, `group`, `screen`, `page`, `alias`) are enriched
//! with identity and context, buffered in a bounded FIFO, batched, and
//! delivered over HTTP with ordering, backoff, and a circuit breaker.
//!
//! ## Features
//!
//! - **Pre-ready buffering**: calls made before initialisation are recorded
//!   and replayed in order once the pipeline is up
//! - **Bounded memory**: a drop-oldest FIFO caps queued events
//! - **Status-driven retry**: every HTTP status class gets its own policy
//!   (requeue + backoff, throttle floors, batch shrinking on 413, fatal
//!   disable on 401/403/404)
//! - **Circuit breaker** with exponential jittered cooldown and half-open
//!   probing
//! - **Injectable platform seams** for transport, persistence, and context
//!
//! ## Quick Start
//!
//! ```no_run
//! use metarouter::{Analytics, InitOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), metarouter::ConfigError> {
//!     let analytics = Analytics::new();
//!
//!     // Calls made before initialisation are buffered and replayed.
//!     analytics.track("app_opened", None);
//!
//!     analytics
//!         .initialize(InitOptions::new("wk-123", "https://ingest.example.com"))
//!         .await?;
//!
//!     let mut properties = metarouter::JsonMap::new();
//!     properties.insert("plan".to_string(), json!("pro"));
//!     analytics.track("signup_completed", Some(properties));
//!     analytics.identify("user-42", None);
//!     analytics.flush();
//!     Ok(())
//! }
//! ```

mod breaker;
mod client;
mod config;
mod context;
mod dispatcher;
mod enrich;
mod event;
mod identity;
mod lifecycle;
mod proxy;
mod queue;
mod transport;

// Re-exports
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, Clock, MonotonicClock};
pub use client::{Client, Collaborators};
pub use config::{ConfigError, InitOptions};
pub use context::{
    AppInfo, Context, ContextProvider, DeviceInfo, LibraryInfo, NetworkInfo, OsInfo, ScreenInfo,
    StaticContextProvider,
};
pub use dispatcher::{DebugInfo, Dispatcher, DispatcherConfig, DEFAULT_ENDPOINT_PATH};
pub use enrich::Enricher;
pub use event::{
    is_valid_message_id, new_message_id, now_iso8601, EnrichedEvent, EventKind, JsonMap, RawCall,
};
pub use identity::{
    Identity, IdentityStore, KeyValueStore, MemoryKeyValueStore, ADVERTISING_ID_KEY,
    ANONYMOUS_ID_KEY, GROUP_ID_KEY, USER_ID_KEY,
};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use proxy::Analytics;
pub use queue::{EventQueue, OverflowPolicy};
pub use transport::{parse_retry_after, HttpTransport, ReqwestTransport, Response, TransportError};

pub mod prelude;
