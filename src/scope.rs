//! Configuration scopes and rule patterns.
//!
//! A [`Scope`] names exactly one configuration target. A [`Rule`] selects a set
//! of targets and is only used by stores that evaluate rule fragments.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ключ, под которым фрагмент конфигурации хранится в сторе
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum Scope {
    Desktop,
    Service,
    Application { uuid: String },
    Window { uuid: String, name: String },
}

impl Scope {
    pub fn application(uuid: impl Into<String>) -> Self {
        Scope::Application { uuid: uuid.into() }
    }

    pub fn window(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Scope::Window {
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    /// Стабильный строковый идентификатор источника
    pub fn id(&self) -> String {
        match self {
            Scope::Desktop => "desktop".to_string(),
            Scope::Service => "service".to_string(),
            Scope::Application { uuid } => format!("application/{}", uuid),
            Scope::Window { uuid, name } => format!("window/{}/{}", uuid, name),
        }
    }

    /// Specificity rank: desktop < service < application < window.
    pub fn rank(&self) -> u8 {
        match self {
            Scope::Desktop => 0,
            Scope::Service => 1,
            Scope::Application { .. } => 2,
            Scope::Window { .. } => 3,
        }
    }

    /// Проверить, распространяется ли конфигурация этого источника на `target`
    pub fn covers(&self, target: &Scope) -> bool {
        match (self, target) {
            (Scope::Desktop, _) | (Scope::Service, _) => true,
            (Scope::Application { uuid }, Scope::Application { uuid: other })
            | (Scope::Application { uuid }, Scope::Window { uuid: other, .. }) => uuid == other,
            (Scope::Window { .. }, Scope::Window { .. }) => self == target,
            _ => false,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// JSON form of a regular expression inside a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegEx {
    pub expression: String,
    #[serde(default)]
    pub flags: Option<String>,
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pattern {
    Exact(String),
    Expression(RegEx),
}

impl Pattern {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == value,
            Pattern::Expression(regex) => {
                let case_insensitive = regex
                    .flags
                    .as_deref()
                    .map(|flags| flags.contains('i'))
                    .unwrap_or(false);
                let source = if case_insensitive {
                    format!("(?i)^(?:{})$", regex.expression)
                } else {
                    format!("^(?:{})$", regex.expression)
                };

                match Regex::new(&source) {
                    Ok(compiled) => compiled.is_match(value) != regex.invert,
                    Err(e) => {
                        tracing::warn!("Некорректное выражение '{}' в правиле: {}", regex.expression, e);
                        false
                    }
                }
            }
        }
    }
}

/// Селектор набора областей внутри фрагмента с правилами
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum Rule {
    Desktop,
    Service,
    Application { uuid: Pattern },
    Window { uuid: Pattern, name: Pattern },
}

impl Rule {
    pub fn rank(&self) -> u8 {
        match self {
            Rule::Desktop => 0,
            Rule::Service => 1,
            Rule::Application { .. } => 2,
            Rule::Window { .. } => 3,
        }
    }

    /// Rule targeting an application applies to that application's windows too.
    pub fn matches(&self, target: &Scope) -> bool {
        match (self, target) {
            (Rule::Desktop, _) | (Rule::Service, _) => true,
            (Rule::Application { uuid }, Scope::Application { uuid: other })
            | (Rule::Application { uuid }, Scope::Window { uuid: other, .. }) => uuid.matches(other),
            (Rule::Window { uuid, name }, Scope::Window { uuid: u, name: n }) => {
                uuid.matches(u) && name.matches(n)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_serde_shape() {
        let scope: Scope = serde_json::from_value(json!({"level": "window", "uuid": "a", "name": "b"})).unwrap();
        assert_eq!(scope, Scope::window("a", "b"));
        assert_eq!(serde_json::to_value(Scope::Desktop).unwrap(), json!({"level": "desktop"}));
        assert_eq!(scope.id(), "window/a/b");
    }

    #[test]
    fn test_application_scope_covers_its_windows() {
        let app = Scope::application("app-1");
        assert!(app.covers(&Scope::window("app-1", "main")));
        assert!(app.covers(&Scope::application("app-1")));
        assert!(!app.covers(&Scope::window("app-2", "main")));
        assert!(!Scope::window("app-1", "main").covers(&app));
        assert!(Scope::Desktop.covers(&app));
    }

    #[test]
    fn test_rule_patterns() {
        let rule: Rule = serde_json::from_value(json!({
            "level": "window",
            "uuid": {"expression": "app-.*"},
            "name": "main"
        }))
        .unwrap();

        assert!(rule.matches(&Scope::window("app-7", "main")));
        assert!(!rule.matches(&Scope::window("app-7", "popup")));
        assert!(!rule.matches(&Scope::window("other", "main")));

        let inverted = Pattern::Expression(RegEx {
            expression: "APP".to_string(),
            flags: Some("i".to_string()),
            invert: true,
        });
        assert!(!inverted.matches("app"));
        assert!(inverted.matches("other"));
    }
}
