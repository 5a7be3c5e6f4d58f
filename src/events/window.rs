use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Идентичность окна: UUID приложения-владельца и имя окна
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowIdentity {
    pub uuid: String,
    pub name: String,
}

impl WindowIdentity {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    /// Главное окно приложения носит имя самого приложения
    pub fn main_window(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            name: uuid.clone(),
            uuid,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::window(self.uuid.clone(), self.name.clone())
    }

    pub fn from_scope(scope: &Scope) -> Option<Self> {
        match scope {
            Scope::Window { uuid, name } => Some(Self::new(uuid.clone(), name.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for WindowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}/{}'", self.uuid, self.name)
    }
}
