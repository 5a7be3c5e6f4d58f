use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Имя сервиса, под которым его объявляют манифесты приложений
    pub name: String,
    /// UUID самого сервиса; его конфигурация никогда не разбирается
    pub uuid: String,
    /// Конфигурация для приложений, которые ничего не знают о сервисе
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<Value>,
    pub service_config_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub defaults: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DryRunConfig {
    pub interval_ms: u64,
    pub runtime_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
                filter: "desktop_config_loader=info".to_string(),
            },
            service: ServiceConfig {
                name: "config-service".to_string(),
                uuid: "config-service".to_string(),
                default_config: None,
                service_config_timeout_ms: 5000,
            },
            store: StoreConfig {
                defaults: Value::Object(Default::default()),
            },
            dry_run: DryRunConfig {
                interval_ms: 5000,
                runtime_version: "0.0.0".to_string(),
            },
        }
    }
}

impl ServiceConfig {
    pub fn service_config_timeout(&self) -> Duration {
        Duration::from_millis(self.service_config_timeout_ms)
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("LOADER_").split("__"));

        let settings: Settings = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        if self.service.name.trim().is_empty() {
            anyhow::bail!("service.name не может быть пустым");
        }

        if self.service.service_config_timeout_ms == 0 {
            anyhow::bail!("service_config_timeout_ms должно быть больше 0");
        }

        if let Some(default_config) = &self.service.default_config {
            if !default_config.is_object() {
                anyhow::bail!("service.default_config должен быть таблицей");
            }
        }

        if !self.store.defaults.is_object() {
            anyhow::bail!("store.defaults должен быть таблицей");
        }

        if self.dry_run.interval_ms < 100 {
            anyhow::bail!("dry_run.interval_ms должно быть минимум 100");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_settings_validation() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.service.service_config_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.logging.level = "verbose".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.service.name = "  ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.service.service_config_timeout_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.service.default_config = Some(json!([1, 2]));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_merges_toml_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "loader.toml",
                r#"
                [service]
                name = "testService"
                uuid = "test-service"
                service_config_timeout_ms = 250

                [service.default_config]
                enabled = false

                [store.defaults]
                enabled = true
                "#,
            )?;

            let settings = Settings::load("loader.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.service.name, "testService");
            assert_eq!(settings.service.service_config_timeout_ms, 250);
            assert_eq!(settings.service.default_config, Some(json!({"enabled": false})));
            assert_eq!(settings.store.defaults, json!({"enabled": true}));
            assert_eq!(settings.logging.level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LOADER_SERVICE__NAME", "fromEnv");
            let settings = Settings::load("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.service.name, "fromEnv");
            Ok(())
        });
    }
}
