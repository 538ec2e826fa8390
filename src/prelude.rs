//! Convenient re-exports for the common surface.
pub use crate::{
    Analytics, BreakerConfig, BreakerState, ConfigError, Context, ContextProvider, DebugInfo,
    HttpTransport, InitOptions, JsonMap, KeyValueStore, LifecycleState, RawCall, Response,
    TransportError,
};
