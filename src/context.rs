//! Per-event context: immutable metadata about the app, device, and host.
//!
//! The pipeline consumes [`ContextProvider`] and treats the returned record
//! as opaque beyond its structure. Device/OS/screen/locale/network probing
//! belongs to platform implementations; [`StaticContextProvider`] serves
//! hosts (and tests) that have nothing to probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub build: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "advertisingId", skip_serializing_if = "Option::is_none", default)]
    pub advertising_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub density: f64,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub wifi: bool,
}

/// The context record stamped onto every enriched event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub app: AppInfo,
    pub device: DeviceInfo,
    pub library: LibraryInfo,
    pub os: OsInfo,
    pub screen: ScreenInfo,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network: Option<NetworkInfo>,
    pub locale: String,
    pub timezone: String,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            app: AppInfo {
                name: "unknown".to_string(),
                version: "0.0.0".to_string(),
                build: "0".to_string(),
                namespace: "unknown".to_string(),
            },
            device: DeviceInfo {
                manufacturer: "unknown".to_string(),
                model: "unknown".to_string(),
                name: "unknown".to_string(),
                kind: "unknown".to_string(),
                advertising_id: None,
            },
            library: LibraryInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            os: OsInfo { name: std::env::consts::OS.to_string(), version: String::new() },
            screen: ScreenInfo { density: 1.0, width: 0, height: 0 },
            network: None,
            locale: "en-US".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Supplies the context record and owns whatever cache sits behind it.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn get_context(&self) -> Context;
    fn clear_cache(&self);
}

/// Provider returning a fixed record. `clear_cache` restores the template,
/// discarding any mutation a host applied through [`StaticContextProvider::set_context`].
#[derive(Debug)]
pub struct StaticContextProvider {
    template: Context,
    current: Mutex<Context>,
}

impl StaticContextProvider {
    pub fn new(context: Context) -> Self {
        Self { template: context.clone(), current: Mutex::new(context) }
    }

    /// Replace the record handed out until the next `clear_cache`.
    pub fn set_context(&self, context: Context) {
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = context;
    }
}

impl Default for StaticContextProvider {
    fn default() -> Self {
        Self::new(Context::default())
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn get_context(&self) -> Context {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn clear_cache(&self) {
        *self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            self.template.clone();
    }
}
