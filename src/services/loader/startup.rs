use crate::error::{LoaderError, Result};
use crate::loader_error;
use crate::manifest::AppManifest;
use crate::scope::Scope;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{lifecycle, LoaderCore};

/// Startup sequence: desktop configuration, then listening, then the
/// reconciliation pass. Readiness is signalled once reconciliation is done;
/// the listener keeps running for the lifetime of the task.
pub(super) async fn run(core: Arc<LoaderCore>, ready: watch::Sender<bool>) {
    core.load_desktop_configuration().await;

    // Подписка до перечисления: события во время прохода не теряются
    let events = core.runtime.subscribe();

    let reconcile = async {
        core.reconcile_running_applications().await;
        info!("Загрузчик конфигурации инициализирован");
        // Err означает, что все получатели уже отброшены
        let _ = ready.send(true);
    };

    tokio::join!(lifecycle::listen(Arc::clone(&core), events), reconcile);
}

impl LoaderCore {
    pub(crate) async fn load_desktop_configuration(&self) {
        let (service_config, manifest_config) = tokio::join!(
            self.fetch_service_configuration(),
            self.fetch_manifest_configuration()
        );

        let config = match (service_config, manifest_config) {
            (Some(_), Some(manifest_config)) => {
                warn!(
                    "Конфигурация сервиса '{}' задана и в рантайме, и в манифесте; используется манифест",
                    self.service_name
                );
                Some(manifest_config)
            }
            (service_config, manifest_config) => manifest_config.or(service_config),
        };

        match config {
            Some(config) => {
                info!("Загружена конфигурация рабочего стола для сервиса '{}'", self.service_name);
                self.store.add(&Scope::Desktop, config);
            }
            None => debug!("Конфигурация рабочего стола отсутствует"),
        }
    }

    /// Host query bounded by the configured timeout. The call runs in its own
    /// task, so on timeout it is left to finish and its result is dropped.
    async fn fetch_service_configuration(&self) -> Option<Value> {
        let runtime = Arc::clone(&self.runtime);
        let service_name = self.service_name.clone();
        let call = tokio::spawn(async move { runtime.service_configuration(&service_name).await });

        match timeout(self.service_config_timeout, call).await {
            Ok(Ok(Ok(config))) => config.filter(|config| !config.is_null()),
            Ok(Ok(Err(e))) => {
                warn!("Запрос конфигурации сервиса завершился ошибкой: {}", e);
                None
            }
            Ok(Err(e)) => {
                warn!("Задача запроса конфигурации сервиса прервана: {}", e);
                None
            }
            Err(_) => {
                let e = loader_error!(
                    timeout,
                    "конфигурация сервиса '{}' не получена за {:?}",
                    self.service_name,
                    self.service_config_timeout
                );
                warn!("{}", e);
                None
            }
        }
    }

    /// `serviceConfiguration` from the hosting application's manifest, or from
    /// the external document its service entry points to.
    async fn fetch_manifest_configuration(&self) -> Option<Value> {
        let raw = match self.runtime.own_manifest().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Манифест сервиса недоступен: {}", e);
                return None;
            }
        };

        let manifest = match AppManifest::parse(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Манифест сервиса не разобран: {}", e);
                return None;
            }
        };

        if let Some(config) = manifest.service_configuration.as_ref().filter(|config| !config.is_null()) {
            return Some(config.clone());
        }

        let url = manifest
            .service_declaration(&self.service_name)
            .and_then(|service| service.manifest_url.clone())?;

        match self.fetch_service_document(&url).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Документ '{}' отброшен: {}", url, e);
                None
            }
        }
    }

    async fn fetch_service_document(&self, url: &str) -> Result<Option<Value>> {
        let version = self.runtime.version().await?;
        let raw = self.runtime.fetch_manifest(url).await?;
        let document = AppManifest::parse(&raw)?;

        let expected = format!("{}-{}", self.runtime.me().uuid, version);
        let found = document.startup_uuid().unwrap_or_default().to_string();
        if found != expected {
            return Err(LoaderError::IdentityMismatch { expected, found });
        }

        debug!("Документ сервиса '{}' принят", url);
        Ok(document.service_configuration.filter(|config| !config.is_null()))
    }

    async fn reconcile_running_applications(&self) {
        let applications = match self.runtime.all_applications().await {
            Ok(applications) => applications,
            Err(e) => {
                warn!("Не удалось получить список приложений: {}", e);
                return;
            }
        };

        let running: Vec<_> = applications.into_iter().filter(|app| app.is_running).collect();
        info!("Сверка {} запущенных приложений", running.len());

        for app in running {
            self.on_application_created(&app.identity()).await;
        }
    }
}
