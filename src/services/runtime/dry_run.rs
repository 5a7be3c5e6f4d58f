use crate::error::Result;
use crate::loader_error;
use crate::events::{AppIdentity, ApplicationInfo, RunningApplication, RuntimeEvent, WindowIdentity};
use crate::utils::deep_merge;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::r#trait::DesktopRuntime;

const EVENT_CAPACITY: usize = 256;

/// In-process emulation of the desktop runtime.
///
/// Drives the binary in dry-run mode and serves as the runtime for every loader
/// test. Applications, windows and listeners live in memory; events go out on a
/// broadcast channel.
pub struct DryRunRuntime {
    me: AppIdentity,
    version: String,
    events: broadcast::Sender<RuntimeEvent>,
    state: Mutex<DryRunState>,
    service_configuration: Option<Value>,
    service_configuration_delay: Option<Duration>,
    own_manifest: Option<Value>,
    documents: HashMap<String, Value>,
}

#[derive(Default)]
struct DryRunState {
    // Порядок запуска сохраняется для getAllApplications
    applications: Vec<FakeApplication>,
    app_listeners: HashSet<String>,
    window_listeners: HashSet<WindowIdentity>,
}

#[derive(Debug, Clone)]
struct FakeApplication {
    uuid: String,
    manifest: Option<Value>,
    parent_uuid: Option<String>,
    is_running: bool,
    windows: Vec<String>,
}

impl DryRunState {
    fn find(&self, uuid: &str) -> Option<&FakeApplication> {
        self.applications.iter().find(|app| app.uuid == uuid)
    }

    fn find_mut(&mut self, uuid: &str) -> Option<&mut FakeApplication> {
        self.applications.iter_mut().find(|app| app.uuid == uuid)
    }
}

impl DryRunRuntime {
    pub fn new(me: impl Into<String>, version: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            me: AppIdentity::new(me),
            version: version.into(),
            events,
            state: Mutex::new(DryRunState::default()),
            service_configuration: None,
            service_configuration_delay: None,
            own_manifest: None,
            documents: HashMap::new(),
        }
    }

    pub fn with_service_configuration(mut self, config: Value) -> Self {
        self.service_configuration = Some(config);
        self
    }

    pub fn with_service_configuration_delay(mut self, delay: Duration) -> Self {
        self.service_configuration_delay = Some(delay);
        self
    }

    pub fn with_own_manifest(mut self, manifest: Value) -> Self {
        self.own_manifest = Some(manifest);
        self
    }

    pub fn with_document(mut self, url: impl Into<String>, document: Value) -> Self {
        self.documents.insert(url.into(), document);
        self
    }

    /// Запуск приложения из манифеста; `startup_app.uuid` дополняется, как это делает рантайм
    pub fn create_application(&self, uuid: &str, manifest: Value) -> AppIdentity {
        let mut manifest = manifest;
        let has_startup_uuid = manifest
            .pointer("/startup_app/uuid")
            .map(Value::is_string)
            .unwrap_or(false);
        if !has_startup_uuid {
            deep_merge(&mut manifest, &json!({"startup_app": {"uuid": uuid, "name": uuid}}));
        }

        self.launch(uuid, Some(manifest), None)
    }

    /// Программный запуск: дочернее приложение получает манифест родителя
    pub fn create_child_application(&self, uuid: &str, parent_uuid: &str) -> Result<AppIdentity> {
        let manifest = self
            .state
            .lock()
            .find(parent_uuid)
            .map(|parent| parent.manifest.clone())
            .ok_or_else(|| loader_error!(not_found, "приложение '{}'", parent_uuid))?;

        Ok(self.launch(uuid, manifest, Some(parent_uuid.to_string())))
    }

    /// Запуск без манифеста, например сервисом от имени другого приложения
    pub fn create_programmatic_application(&self, uuid: &str, parent_uuid: Option<&str>) -> AppIdentity {
        self.launch(uuid, None, parent_uuid.map(str::to_string))
    }

    fn launch(&self, uuid: &str, manifest: Option<Value>, parent_uuid: Option<String>) -> AppIdentity {
        {
            let mut state = self.state.lock();
            let app = FakeApplication {
                uuid: uuid.to_string(),
                manifest,
                parent_uuid,
                is_running: true,
                windows: vec![uuid.to_string()],
            };

            match state.find_mut(uuid) {
                Some(existing) if existing.is_running => {
                    warn!("Dry-run: приложение '{}' уже запущено", uuid);
                }
                Some(existing) => *existing = app,
                None => state.applications.push(app),
            }
        }

        info!("Dry-run: запущено приложение '{}'", uuid);
        let identity = AppIdentity::new(uuid);
        self.emit(RuntimeEvent::ApplicationCreated(identity.clone()));
        identity
    }

    pub fn create_window(&self, uuid: &str, name: &str) -> Result<WindowIdentity> {
        let mut state = self.state.lock();
        let app = state
            .find_mut(uuid)
            .ok_or_else(|| loader_error!(not_found, "приложение '{}'", uuid))?;

        if !app.windows.iter().any(|window| window == name) {
            app.windows.push(name.to_string());
        }

        Ok(WindowIdentity::new(uuid, name))
    }

    /// Закрывает окна приложения, затем само приложение
    pub fn close_application(&self, uuid: &str) -> Result<()> {
        let (windows, notify_app) = {
            let mut state = self.state.lock();
            let app = state
                .find_mut(uuid)
                .ok_or_else(|| loader_error!(not_found, "приложение '{}'", uuid))?;
            app.is_running = false;
            let windows: Vec<WindowIdentity> = app
                .windows
                .drain(..)
                .map(|name| WindowIdentity::new(uuid, name))
                .collect();

            let windows: Vec<WindowIdentity> = windows
                .into_iter()
                .filter(|window| state.window_listeners.remove(window))
                .collect();
            (windows, state.app_listeners.contains(uuid))
        };

        for window in windows {
            self.emit(RuntimeEvent::WindowClosed(window));
        }

        info!("Dry-run: приложение '{}' закрыто", uuid);
        if notify_app {
            self.emit(RuntimeEvent::ApplicationClosed(AppIdentity::new(uuid)));
        }

        Ok(())
    }

    pub fn close_window(&self, window: &WindowIdentity) {
        let notify = {
            let mut state = self.state.lock();
            if let Some(app) = state.find_mut(&window.uuid) {
                app.windows.retain(|name| name != &window.name);
            }
            state.window_listeners.remove(window)
        };

        if notify {
            self.emit(RuntimeEvent::WindowClosed(window.clone()));
        }
    }

    /// Отправить произвольное событие, например повторное application-created
    pub fn emit(&self, event: RuntimeEvent) {
        debug!("Dry-run: событие {}", event);
        // Ошибка означает лишь отсутствие подписчиков
        let _ = self.events.send(event);
    }

    pub fn has_application_listener(&self, uuid: &str) -> bool {
        self.state.lock().app_listeners.contains(uuid)
    }

    pub fn has_window_listener(&self, window: &WindowIdentity) -> bool {
        self.state.lock().window_listeners.contains(window)
    }
}

#[async_trait::async_trait]
impl DesktopRuntime for DryRunRuntime {
    fn me(&self) -> AppIdentity {
        self.me.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    async fn version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn all_applications(&self) -> Result<Vec<RunningApplication>> {
        Ok(self
            .state
            .lock()
            .applications
            .iter()
            .map(|app| RunningApplication {
                uuid: app.uuid.clone(),
                is_running: app.is_running,
                parent_uuid: app.parent_uuid.clone(),
            })
            .collect())
    }

    async fn application_info(&self, app: &AppIdentity) -> Result<ApplicationInfo> {
        self.state
            .lock()
            .find(&app.uuid)
            .map(|found| ApplicationInfo {
                manifest: found.manifest.clone(),
                parent_uuid: found.parent_uuid.clone(),
            })
            .ok_or_else(|| loader_error!(not_found, "приложение {}", app))
    }

    async fn service_configuration(&self, service_name: &str) -> Result<Option<Value>> {
        if let Some(delay) = self.service_configuration_delay {
            tokio::time::sleep(delay).await;
        }

        debug!("Dry-run: запрос конфигурации сервиса '{}'", service_name);
        Ok(self.service_configuration.clone())
    }

    async fn own_manifest(&self) -> Result<Option<Value>> {
        Ok(self.own_manifest.clone())
    }

    async fn fetch_manifest(&self, url: &str) -> Result<Value> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| loader_error!(not_found, "документ '{}'", url))
    }

    fn add_application_listener(&self, app: &AppIdentity) {
        self.state.lock().app_listeners.insert(app.uuid.clone());
    }

    fn remove_application_listener(&self, app: &AppIdentity) {
        self.state.lock().app_listeners.remove(&app.uuid);
    }

    fn once_window_closed(&self, window: &WindowIdentity) {
        self.state.lock().window_listeners.insert(window.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_application_fills_startup_uuid() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let app = runtime.create_application("app-1", json!({"services": []}));

        let info = runtime.application_info(&app).await.unwrap();
        let manifest = info.manifest.unwrap();
        assert_eq!(manifest.pointer("/startup_app/uuid"), Some(&json!("app-1")));
        assert_eq!(info.parent_uuid, None);
    }

    #[tokio::test]
    async fn test_child_inherits_parent_manifest() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        runtime.create_application("parent", json!({}));
        let child = runtime.create_child_application("child", "parent").unwrap();

        let info = runtime.application_info(&child).await.unwrap();
        assert_eq!(info.parent_uuid.as_deref(), Some("parent"));
        assert_eq!(
            info.manifest.unwrap().pointer("/startup_app/uuid"),
            Some(&json!("parent"))
        );

        assert!(runtime.create_child_application("orphan", "missing").is_err());
    }

    #[tokio::test]
    async fn test_close_events_only_for_listened_handles() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let mut events = runtime.subscribe();

        let app = runtime.create_application("app-1", json!({}));
        assert_eq!(events.recv().await.unwrap(), RuntimeEvent::ApplicationCreated(app.clone()));

        let window = runtime.create_window("app-1", "popup").unwrap();
        runtime.once_window_closed(&window);
        runtime.close_window(&window);
        assert_eq!(events.recv().await.unwrap(), RuntimeEvent::WindowClosed(window.clone()));
        assert!(!runtime.has_window_listener(&window));

        // Слушатель приложения не зарегистрирован: событие закрытия не приходит
        runtime.close_application("app-1").unwrap();
        assert!(events.try_recv().is_err());

        let apps = runtime.all_applications().await.unwrap();
        assert_eq!(apps.len(), 1);
        assert!(!apps[0].is_running);
    }

    #[tokio::test]
    async fn test_close_application_notifies_listener() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let app = runtime.create_application("app-1", json!({}));
        let mut events = runtime.subscribe();

        runtime.add_application_listener(&app);
        runtime.close_application("app-1").unwrap();

        assert_eq!(events.recv().await.unwrap(), RuntimeEvent::ApplicationClosed(app));
    }
}
