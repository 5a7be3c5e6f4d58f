use dashmap::DashMap;
use tracing::{info, warn};

/// One-shot parent overrides for applications that are about to start.
///
/// Used when a programmatically relaunched application must be tracked as the
/// child of a logical parent rather than of whichever process launched it.
#[derive(Debug, Default)]
pub struct ParentOverrides {
    pending: DashMap<String, String>,
}

impl ParentOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Последняя запись побеждает; повторная запись до потребления даёт предупреждение
    pub fn set(&self, app_uuid: &str, parent_uuid: &str) {
        if let Some(previous) = self.pending.insert(app_uuid.to_string(), parent_uuid.to_string()) {
            warn!(
                "Переопределение родителя для '{}' уже существовало ('{}'), заменяем на '{}'",
                app_uuid, previous, parent_uuid
            );
        } else {
            info!("Ожидаем запуск '{}' с родителем '{}'", app_uuid, parent_uuid);
        }
    }

    /// Извлечь переопределение; повторный вызов вернёт None
    pub fn take(&self, app_uuid: &str) -> Option<String> {
        self.pending.remove(app_uuid).map(|(_, parent)| parent)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_consumed_once() {
        let overrides = ParentOverrides::new();
        overrides.set("child", "parent");

        assert_eq!(overrides.take("child").as_deref(), Some("parent"));
        assert_eq!(overrides.take("child"), None);
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_last_override_wins() {
        let overrides = ParentOverrides::new();
        overrides.set("child", "first");
        overrides.set("child", "second");

        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides.take("child").as_deref(), Some("second"));
    }
}
