//! Loader service: binds the application/window lifecycle to the config store.
//!
//! This module and its submodules are responsible ONLY for deciding which
//! configuration each application contributes and for keeping the store in
//! sync with the running population. Merging fragments and evaluating rules is
//! the store's business; enumerating applications and delivering events is the
//! runtime's.
//!
//! All tracker mutation happens under one lock that is never held across an
//! `.await`, so handlers interleave only at runtime calls.

mod lifecycle;
mod overrides;
mod resolution;
mod startup;
mod tracker;

pub use self::overrides::ParentOverrides;
pub use self::tracker::{ApplicationNode, HierarchyTracker, LinkOutcome, NodeOrigin, Observation};

use crate::config::ServiceConfig;
use crate::events::WindowIdentity;
use crate::services::runtime::DesktopRuntime;
use crate::services::store::ConfigStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Состояние загрузчика, защищённое одной блокировкой
#[derive(Debug, Default)]
pub(crate) struct LoaderState {
    pub(crate) tracker: HierarchyTracker,
    /// Окна, чью стороннюю конфигурацию нужно убрать при закрытии
    pub(crate) windows_with_config: HashSet<WindowIdentity>,
}

pub(crate) struct LoaderCore {
    service_name: String,
    default_config: Option<Value>,
    service_config_timeout: Duration,
    runtime: Arc<dyn DesktopRuntime>,
    store: Arc<dyn ConfigStore>,
    state: Mutex<LoaderState>,
    overrides: ParentOverrides,
}

impl LoaderCore {
    pub(crate) fn new(
        service: &ServiceConfig,
        runtime: Arc<dyn DesktopRuntime>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            service_name: service.name.clone(),
            default_config: service.default_config.clone(),
            service_config_timeout: service.service_config_timeout(),
            runtime,
            store,
            state: Mutex::new(LoaderState::default()),
            overrides: ParentOverrides::new(),
        }
    }

    pub(crate) fn app_parent(&self, app_uuid: &str) -> Option<String> {
        self.state.lock().tracker.parent_of(app_uuid).map(str::to_string)
    }
}

/// Configuration loader.
///
/// Listens for application lifecycle events and loads/unloads
/// application-defined config to/from the store. Construction returns at once;
/// the initial reconciliation runs in the background and
/// [`Loader::initialized`] resolves when it is done.
pub struct Loader {
    core: Arc<LoaderCore>,
    ready: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Loader {
    /// Must be called from within a tokio runtime.
    pub fn start(
        service: &ServiceConfig,
        runtime: Arc<dyn DesktopRuntime>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        info!("Запуск загрузчика конфигурации для сервиса '{}'", service.name);

        let core = Arc::new(LoaderCore::new(service, runtime, store));
        let (ready_tx, ready_rx) = watch::channel(false);

        // Наблюдение за источниками начинается сразу, до загрузки конфигурации рабочего стола
        let additions = core.store.subscribe();
        let watch_task = tokio::spawn(lifecycle::watch_sources(Arc::clone(&core), additions));
        let startup_task = tokio::spawn(startup::run(Arc::clone(&core), ready_tx));

        Self {
            core,
            ready: ready_rx,
            tasks: Mutex::new(vec![watch_task, startup_task]),
        }
    }

    /// Resolves once the startup reconciliation pass has completed and returns
    /// `true`. Returns `false` if the loader was shut down before that.
    pub async fn initialized(&self) -> bool {
        let mut ready = self.ready.clone();
        let ok = ready.wait_for(|ready| *ready).await.is_ok();
        ok
    }

    pub fn is_initialized(&self) -> bool {
        *self.ready.borrow()
    }

    /// Track `app_uuid` as a child of `parent_uuid` when it next starts.
    pub fn override_app_parent(&self, app_uuid: &str, parent_uuid: &str) {
        self.core.overrides.set(app_uuid, parent_uuid);
    }

    /// Parent as currently tracked, which may differ from what the runtime reports.
    pub fn app_parent(&self, app_uuid: &str) -> Option<String> {
        self.core.app_parent(app_uuid)
    }

    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        if !tasks.is_empty() {
            info!("Остановка загрузчика конфигурации");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
