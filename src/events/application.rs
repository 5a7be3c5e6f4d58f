use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Идентичность приложения в рантайме
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppIdentity {
    pub uuid: String,
}

impl AppIdentity {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.uuid)
    }
}

/// Result of `getInfo` for a single application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    /// Сырой манифест; разбирается лениво, ошибки разбора не фатальны
    #[serde(default)]
    pub manifest: Option<Value>,
    #[serde(default)]
    pub parent_uuid: Option<String>,
}

/// Элемент списка `getAllApplications`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningApplication {
    pub uuid: String,
    pub is_running: bool,
    #[serde(default)]
    pub parent_uuid: Option<String>,
}

impl RunningApplication {
    pub fn identity(&self) -> AppIdentity {
        AppIdentity::new(self.uuid.clone())
    }
}
