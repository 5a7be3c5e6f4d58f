use crate::events::{AppIdentity, ApplicationInfo};
use crate::manifest::{self, AppManifest};
use crate::scope::Scope;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::tracker::{LinkOutcome, NodeOrigin, Observation};
use super::LoaderCore;

impl LoaderCore {
    /// Resolution for one application-created event (also used for every
    /// application found running at startup).
    pub(crate) async fn on_application_created(&self, app: &AppIdentity) {
        if app.uuid == self.runtime.me().uuid {
            // Манифест самого сервиса не разбираем
            debug!("Пропускаем собственное приложение сервиса {}", app);
            return;
        }

        let info = match self.runtime.application_info(app).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Не удалось получить информацию о приложении {}: {}", app, e);
                ApplicationInfo::default()
            }
        };

        if let Some(config) = self.resolve(app, &info) {
            self.store.add(&Scope::application(app.uuid.clone()), config);
        }
    }

    /// Synchronous part of the resolution. Returns the fragment to register
    /// under the application's scope, if any.
    fn resolve(&self, app: &AppIdentity, info: &ApplicationInfo) -> Option<Value> {
        let uuid = app.uuid.as_str();

        let manifest = info.manifest.as_ref().and_then(|raw| match AppManifest::parse(raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Манифест приложения {} не разобран: {}", app, e);
                None
            }
        });
        let is_manifest = manifest
            .as_ref()
            .map(|manifest| manifest.is_startup_app(uuid))
            .unwrap_or(false);

        let mut parent_uuid = info.parent_uuid.clone().filter(|parent| !parent.is_empty());
        if let Some(override_uuid) = self.overrides.take(uuid) {
            info!(
                "Приложение {} отслеживается как дочернее для '{}' вместо {:?}",
                app, override_uuid, parent_uuid
            );
            parent_uuid = Some(override_uuid);
        }

        let mut state = self.state.lock();
        let tracker = &mut state.tracker;
        let runtime = self.runtime.as_ref();

        match tracker.observe_creation(uuid) {
            Observation::Duplicate => {
                warn!("Повторное событие создания для уже запущенного приложения {}", app)
            }
            Observation::Relaunched => {
                // Слушатель закрытия был снят при предыдущем закрытии
                info!("Приложение {} запущено повторно", app);
                runtime.add_application_listener(app);
            }
            Observation::WasLateRegistered | Observation::New => {}
        }

        let mut is_service_aware = false;
        let mut app_config: Option<Value> = None;

        match (&manifest, parent_uuid.as_deref()) {
            (Some(manifest), _) if is_manifest => {
                let declaration = manifest::declaration(manifest, &self.service_name);
                if declaration.is_aware {
                    // Приложение явно использует сервис: конфигурация по умолчанию не нужна
                    is_service_aware = true;
                    match declaration.config {
                        Some(config) => {
                            info!(
                                "Используется конфигурация {}/{} ({:?})",
                                uuid, self.service_name, declaration.source
                            );
                            app_config = Some(config);
                        }
                        None => info!(
                            "Приложение {}/{} объявляет сервис, но не содержит конфигурации",
                            uuid, self.service_name
                        ),
                    }
                }
            }
            (_, Some(parent)) if !is_manifest => {
                // Программный потомок наследует осведомлённость родителя
                if let Some(node) = tracker.get(parent) {
                    is_service_aware = node.is_service_aware;
                }
            }
            _ => {}
        }

        // Построение иерархии
        if let Some(parent) = parent_uuid.as_deref() {
            if parent == uuid {
                warn!("Приложение {} указано родителем самого себя, связь не создаётся", app);
            } else if tracker.contains(parent) || !is_manifest {
                if !tracker.contains(parent) {
                    // Родитель объявил сервис в манифесте, но без конфигурации, поэтому узла ещё нет
                    info!("Поздняя регистрация '{}' как приложения, знающего о сервисе", parent);
                }
                let parent_aware = tracker
                    .get_or_create(parent, true, NodeOrigin::LateRegistered, runtime)
                    .is_service_aware;

                tracker.get_or_create(uuid, is_service_aware || parent_aware, NodeOrigin::Created, runtime);

                match tracker.link(parent, uuid) {
                    LinkOutcome::Linked => info!("Приложение {} зарегистрировано как дочернее для '{}'", app, parent),
                    LinkOutcome::AlreadyLinked => debug!("Связь {} -> '{}' уже существует", app, parent),
                    LinkOutcome::ParentAlreadySet(existing) => warn!(
                        "У приложения {} уже есть родитель '{}', '{}' игнорируется",
                        app, existing, parent
                    ),
                    LinkOutcome::WouldCycle => warn!(
                        "Связь {} -> '{}' образовала бы цикл, пропускаем",
                        app, parent
                    ),
                    LinkOutcome::SelfParent | LinkOutcome::Missing => {
                        warn!("Не удалось связать {} с '{}'", app, parent)
                    }
                }
            }
        }

        // Конфигурация по умолчанию для приложений, никак не связанных с сервисом
        if !is_service_aware {
            if let Some(default_config) = &self.default_config {
                let parent_aware = parent_uuid
                    .as_deref()
                    .and_then(|parent| tracker.get(parent))
                    .map(|node| node.is_service_aware)
                    .unwrap_or(false);

                if parent_aware {
                    info!(
                        "Конфигурация по умолчанию не применяется к {}: родитель знает о сервисе",
                        app
                    );
                } else {
                    info!("Используется конфигурация по умолчанию для {}", app);
                    app_config = Some(default_config.clone());
                }
            }
        }

        if app_config.is_some() {
            tracker.get_or_create(uuid, is_service_aware, NodeOrigin::Created, runtime);
        }

        app_config
    }
}
