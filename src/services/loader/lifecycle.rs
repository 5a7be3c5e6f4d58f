use crate::events::{AppIdentity, RuntimeEvent, WindowIdentity};
use crate::scope::Scope;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::tracker::{ApplicationNode, HierarchyTracker};
use super::LoaderCore;

impl LoaderCore {
    pub(crate) async fn handle_event(&self, event: RuntimeEvent) {
        crate::debug_if_enabled!("Обработка события рантайма: {}", event);

        match event {
            RuntimeEvent::ApplicationCreated(app) => self.on_application_created(&app).await,
            RuntimeEvent::ApplicationClosed(app) => self.on_application_closed(&app),
            RuntimeEvent::WindowClosed(window) => self.on_window_closed(&window),
        }
    }

    pub(crate) fn on_application_closed(&self, app: &AppIdentity) {
        self.runtime.remove_application_listener(app);

        let removed = {
            let mut state = self.state.lock();
            if !state.tracker.mark_closed(&app.uuid) {
                debug!("Закрыто неотслеживаемое приложение {}", app);
                return;
            }
            collapse(&mut state.tracker, &app.uuid)
        };

        for node in removed {
            // Конфигурация больше никому не нужна
            info!("Конфигурация приложения '{}' выгружена", node.uuid);
            self.store.remove_from_source(&node.scope());
        }
    }

    pub(crate) fn on_window_closed(&self, window: &WindowIdentity) {
        info!("Выгрузка конфигурации окна {}", window);
        self.store.remove_from_source(&window.scope());
        self.state.lock().windows_with_config.remove(window);
    }

    /// Source-watch hook: a fragment was added to the store from `source`.
    pub(crate) fn on_config_added(&self, source: &Scope) {
        let Some(window) = WindowIdentity::from_scope(source) else {
            return;
        };

        let inserted = self.state.lock().windows_with_config.insert(window.clone());
        if inserted {
            debug!("Окно {} добавило конфигурацию, ожидаем его закрытия", window);
            self.runtime.once_window_closed(&window);
        }
    }
}

/// Cleans up from `uuid`, then keeps cleaning upward for as long as each
/// ancestor has itself exited.
fn collapse(tracker: &mut HierarchyTracker, uuid: &str) -> Vec<ApplicationNode> {
    let mut next = tracker.parent_of(uuid).map(str::to_string);
    let mut removed = tracker.cleanup(uuid);

    while let Some(ancestor) = next {
        match tracker.get(&ancestor) {
            Some(node) if !node.is_running => {
                debug!("Проверка родителя '{}'", ancestor);
                next = node.parent.clone();
                removed.extend(tracker.cleanup(&ancestor));
            }
            _ => break,
        }
    }

    removed
}

/// Runtime event loop. Handles one event at a time until the channel closes.
pub(super) async fn listen(core: Arc<LoaderCore>, mut events: broadcast::Receiver<RuntimeEvent>) {
    info!("Загрузчик слушает события приложений");

    loop {
        match events.recv().await {
            Ok(event) => core.handle_event(event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Пропущено {} событий рантайма", missed);
            }
            Err(RecvError::Closed) => {
                info!("Канал событий рантайма закрыт");
                break;
            }
        }
    }
}

pub(super) async fn watch_sources(core: Arc<LoaderCore>, mut additions: broadcast::Receiver<Scope>) {
    loop {
        match additions.recv().await {
            Ok(source) => core.on_config_added(&source),
            Err(RecvError::Lagged(missed)) => {
                warn!("Пропущено {} уведомлений стора", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::events::WindowIdentity;
    use crate::scope::Scope;
    use crate::services::store::ConfigStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_config_unloaded_when_application_exits() {
        let fixture = Fixture::new(None);
        let app = fixture.runtime.create_application("x", declared(json!({"enabled": false})));
        fixture.core.on_application_created(&app).await;
        assert_eq!(fixture.window_config("x", "x")["enabled"], json!(false));

        fixture.core.on_application_closed(&app);

        assert_eq!(fixture.window_config("x", "x")["enabled"], json!(true));
        assert!(!fixture.is_tracked("x"));
        assert!(!fixture.runtime.has_application_listener("x"));
    }

    #[tokio::test]
    async fn test_child_extends_parent_config_lifetime() {
        let fixture = Fixture::new(None);
        let app = fixture.runtime.create_application("app", declared(json!({"enabled": false})));
        fixture.core.on_application_created(&app).await;
        let child = fixture.runtime.create_child_application("child", "app").unwrap();
        fixture.core.on_application_created(&child).await;

        assert_eq!(fixture.window_config("app", "app")["enabled"], json!(false));
        assert_eq!(fixture.window_config("child", "child")["enabled"], json!(true));

        fixture.core.on_application_closed(&app);
        assert_eq!(fixture.window_config("app", "app")["enabled"], json!(false));
        assert!(!fixture.node("app").unwrap().is_running);

        fixture.core.on_application_closed(&child);
        assert_eq!(fixture.window_config("app", "app")["enabled"], json!(true));
        assert!(!fixture.is_tracked("app"));
        assert!(!fixture.is_tracked("child"));
    }

    #[tokio::test]
    async fn test_parent_rules_outlive_parent() {
        let fixture = Fixture::new(None);
        let parent = fixture.runtime.create_application(
            "p",
            declared(json!({
                "enabled": false,
                "rules": [{"scope": {"level": "application", "uuid": "c"}, "config": {"features": {"featureOne": false}}}]
            })),
        );
        fixture.core.on_application_created(&parent).await;
        let child = fixture.runtime.create_child_application("c", "p").unwrap();
        fixture.runtime.create_window("c", "child-window-1").unwrap();
        fixture.core.on_application_created(&child).await;

        assert_eq!(fixture.window_config("c", "c")["features"]["featureOne"], json!(false));

        fixture.core.on_application_closed(&parent);
        assert_eq!(fixture.window_config("c", "c")["features"]["featureOne"], json!(false));
        assert_eq!(
            fixture.window_config("c", "child-window-1")["features"]["featureOne"],
            json!(false)
        );

        fixture.core.on_application_closed(&child);
        assert!(!fixture.is_tracked("p"));
        assert_eq!(fixture.window_config("c", "c")["features"]["featureOne"], json!(true));
    }

    #[tokio::test]
    async fn test_relaunched_retained_parent_is_cleaned_up_on_next_close() {
        let fixture = Fixture::new(None);
        let parent = fixture.runtime.create_application("p", declared(json!({"enabled": false})));
        fixture.core.on_application_created(&parent).await;
        let child = fixture.runtime.create_child_application("c", "p").unwrap();
        fixture.core.on_application_created(&child).await;

        fixture.core.on_application_closed(&parent);
        assert!(!fixture.runtime.has_application_listener("p"));

        // Родитель снова запущен, пока его узел удерживается потомком
        let parent = fixture.runtime.create_application("p", declared(json!({"enabled": false})));
        fixture.core.on_application_created(&parent).await;
        assert!(fixture.node("p").unwrap().is_running);
        assert!(fixture.runtime.has_application_listener("p"));

        fixture.core.on_application_closed(&child);
        assert!(fixture.is_tracked("p"));
        assert_eq!(fixture.window_config("p", "p")["enabled"], json!(false));

        fixture.core.on_application_closed(&parent);
        assert!(!fixture.is_tracked("p"));
        assert!(!fixture.store.contains_source(&Scope::application("p")));
        assert_eq!(fixture.window_config("p", "p")["enabled"], json!(true));
    }

    #[tokio::test]
    async fn test_independent_applications_do_not_share_lifecycle() {
        let fixture = Fixture::new(None);
        let first = fixture.runtime.create_application("one", declared(json!({"enabled": false})));
        let second = fixture
            .runtime
            .create_application("two", injected("two", json!({"enabled": false})));
        fixture.core.on_application_created(&first).await;
        fixture.core.on_application_created(&second).await;

        fixture.core.on_application_closed(&first);
        assert_eq!(fixture.window_config("one", "one")["enabled"], json!(true));
        assert_eq!(fixture.window_config("two", "two")["enabled"], json!(false));

        fixture.core.on_application_closed(&second);
        assert_eq!(fixture.window_config("two", "two")["enabled"], json!(true));
    }

    #[tokio::test]
    async fn test_closed_ancestor_chain_collapses_in_one_pass() {
        let fixture = Fixture::new(None);
        let root = fixture.runtime.create_application("root", declared(json!({"enabled": false})));
        fixture.core.on_application_created(&root).await;
        let middle = fixture.runtime.create_child_application("middle", "root").unwrap();
        fixture.core.on_application_created(&middle).await;
        let leaf = fixture.runtime.create_child_application("leaf", "middle").unwrap();
        fixture.core.on_application_created(&leaf).await;

        fixture.core.on_application_closed(&root);
        fixture.core.on_application_closed(&middle);
        assert!(fixture.is_tracked("root"));
        assert!(fixture.is_tracked("middle"));

        fixture.core.on_application_closed(&leaf);
        assert!(!fixture.is_tracked("leaf"));
        assert!(!fixture.is_tracked("middle"));
        assert!(!fixture.is_tracked("root"));
        assert!(fixture.store.is_empty());
    }

    #[tokio::test]
    async fn test_close_of_untracked_application_is_ignored() {
        let fixture = Fixture::new(None);
        let app = fixture.runtime.create_application("plain", json!({}));
        fixture.core.on_application_created(&app).await;

        fixture.core.on_application_closed(&app);
        assert!(fixture.store.is_empty());
    }

    #[tokio::test]
    async fn test_window_registry_and_close() {
        let fixture = Fixture::new(None);
        let window = WindowIdentity::new("host", "popup");

        fixture.store.add(&window.scope(), json!({"theme": {"border": 1}}));
        fixture.core.on_config_added(&window.scope());
        fixture.core.on_config_added(&window.scope());
        assert!(fixture.runtime.has_window_listener(&window));
        assert_eq!(fixture.core.state.lock().windows_with_config.len(), 1);

        // Фрагменты уровня приложения не отслеживаются
        fixture.core.on_config_added(&Scope::application("host"));
        assert_eq!(fixture.core.state.lock().windows_with_config.len(), 1);

        fixture.core.on_window_closed(&window);
        assert!(!fixture.store.contains_source(&window.scope()));
        assert!(fixture.core.state.lock().windows_with_config.is_empty());

        // Повторное закрытие безопасно
        fixture.core.on_window_closed(&window);
    }
}
