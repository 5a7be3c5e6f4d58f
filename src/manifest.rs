//! Application manifests and the ways a manifest can declare this service.
//!
//! A manifest can reference the service through several mechanisms. Each one is
//! a [`ConfigSource`]; sources are probed in [`ConfigSource::PRIORITY`] order.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Содержимое app.json; объявлены только поля, которые читает загрузчик
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    #[serde(default)]
    pub startup_app: Option<StartupApp>,
    #[serde(default)]
    pub services: Vec<ServiceDeclaration>,
    /// Недокументированное поле манифеста самого сервиса
    #[serde(default, rename = "serviceConfiguration")]
    pub service_configuration: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupApp {
    #[serde(default)]
    pub uuid: Option<String>,
    /// Остальные поля, в том числе флаги внедрённого API
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeclaration {
    pub name: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub manifest_url: Option<String>,
}

impl AppManifest {
    pub fn parse(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn startup_uuid(&self) -> Option<&str> {
        self.startup_app.as_ref().and_then(|app| app.uuid.as_deref())
    }

    /// Манифест описывает именно это приложение, а не его родителя
    pub fn is_startup_app(&self, uuid: &str) -> bool {
        self.startup_uuid() == Some(uuid)
    }

    pub fn service_declaration(&self, service_name: &str) -> Option<&ServiceDeclaration> {
        self.services.iter().find(|service| service.name == service_name)
    }
}

/// One mechanism by which a manifest can reference the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    /// `services: [{name, config}]`
    ServiceDeclaration,
    /// `startup_app: {<name>Api: true, <name>Config: {...}}`
    InjectedApi,
}

/// Сигнал одного источника: приложение знает о сервисе, конфигурация опциональна
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSignal {
    pub source: ConfigSource,
    pub config: Option<Value>,
}

impl ConfigSource {
    pub const PRIORITY: [ConfigSource; 2] = [ConfigSource::ServiceDeclaration, ConfigSource::InjectedApi];

    pub fn probe(self, manifest: &AppManifest, service_name: &str) -> Option<SourceSignal> {
        match self {
            ConfigSource::ServiceDeclaration => {
                manifest
                    .service_declaration(service_name)
                    .map(|declaration| SourceSignal {
                        source: self,
                        config: declaration.config.clone().filter(|config| !config.is_null()),
                    })
            }
            ConfigSource::InjectedApi => {
                let startup_app = manifest.startup_app.as_ref()?;
                let field = camel_case(service_name);

                let injected = startup_app
                    .fields
                    .get(&format!("{}Api", field))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                injected.then(|| SourceSignal {
                    source: self,
                    config: startup_app
                        .fields
                        .get(&format!("{}Config", field))
                        .filter(|config| !config.is_null())
                        .cloned(),
                })
            }
        }
    }
}

/// Итог опроса всех источников манифеста
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestDeclaration {
    pub is_aware: bool,
    pub config: Option<Value>,
    pub source: Option<ConfigSource>,
}

/// Awareness comes from the first source that signals; config from the first
/// source that carries a value.
pub fn declaration(manifest: &AppManifest, service_name: &str) -> ManifestDeclaration {
    let mut result = ManifestDeclaration::default();

    for source in ConfigSource::PRIORITY {
        if let Some(signal) = source.probe(manifest, service_name) {
            if !result.is_aware {
                result.is_aware = true;
                result.source = Some(signal.source);
            }
            if result.config.is_none() {
                if let Some(config) = signal.config {
                    result.config = Some(config);
                    result.source = Some(signal.source);
                }
            }
        }
    }

    result
}

/// Имя сервиса в lowerCamelCase: `test-service` и `test_service` дают `testService`
pub fn camel_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len());

    for (index, segment) in name
        .split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .filter(|segment| !segment.is_empty())
        .enumerate()
    {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            if index == 0 && result.is_empty() {
                result.extend(first.to_lowercase());
            } else {
                result.extend(first.to_uppercase());
            }
            result.push_str(chars.as_str());
        }
    }

    result
}
