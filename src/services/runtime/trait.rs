use crate::error::Result;
use crate::events::{AppIdentity, ApplicationInfo, RunningApplication, RuntimeEvent, WindowIdentity};
use serde_json::Value;
use tokio::sync::broadcast;

/// Narrow capability interface over the host desktop runtime.
///
/// The loader never talks to the runtime through anything else. Close events
/// are only delivered for handles that have a listener registered through
/// [`DesktopRuntime::add_application_listener`] or
/// [`DesktopRuntime::once_window_closed`]; creation events are delivered for
/// every application.
#[async_trait::async_trait]
pub trait DesktopRuntime: Send + Sync {
    /// Identity of the application hosting the service
    fn me(&self) -> AppIdentity;

    /// Subscribe to runtime events. Events sent before subscribing are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent>;

    async fn version(&self) -> Result<String>;

    async fn all_applications(&self) -> Result<Vec<RunningApplication>>;

    async fn application_info(&self, app: &AppIdentity) -> Result<ApplicationInfo>;

    /// Service configuration from the desktop owner settings, if any
    async fn service_configuration(&self, service_name: &str) -> Result<Option<Value>>;

    /// Manifest of the hosting application
    async fn own_manifest(&self) -> Result<Option<Value>>;

    async fn fetch_manifest(&self, url: &str) -> Result<Value>;

    fn add_application_listener(&self, app: &AppIdentity);

    fn remove_application_listener(&self, app: &AppIdentity);

    /// One-shot: the listener is dropped after the first close event
    fn once_window_closed(&self, window: &WindowIdentity);
}
