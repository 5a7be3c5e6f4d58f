use crate::scope::{Rule, Scope};
use crate::utils::merge::{deep_merge, without_key};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::r#trait::ConfigStore;

const WATCH_CAPACITY: usize = 256;
const RULES_KEY: &str = "rules";

/// Правило внутри фрагмента: конфигурация для набора областей
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedConfig {
    pub scope: Rule,
    pub config: Value,
}

#[derive(Debug, Clone)]
struct Fragment {
    source: Scope,
    config: Value,
    rules: Vec<ScopedConfig>,
}

/// In-memory configuration store.
///
/// A query starts from the defaults and layers, in ascending specificity
/// (desktop, service, application, window), the config of every fragment whose
/// source covers the queried scope plus every rule that matches it. Layers of
/// equal specificity apply in insertion order.
pub struct MemoryStore {
    defaults: Value,
    fragments: RwLock<Vec<Fragment>>,
    additions: broadcast::Sender<Scope>,
}

impl MemoryStore {
    pub fn new(defaults: Value) -> Self {
        let (additions, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            defaults,
            fragments: RwLock::new(Vec::new()),
            additions,
        }
    }

    pub fn contains_source(&self, scope: &Scope) -> bool {
        self.fragments.read().iter().any(|fragment| &fragment.source == scope)
    }

    pub fn len(&self) -> usize {
        self.fragments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.read().is_empty()
    }

    fn parse_rules(source: &Scope, fragment: &Value) -> Vec<ScopedConfig> {
        match fragment.get(RULES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(rules) => serde_json::from_value(rules.clone()).unwrap_or_else(|e| {
                warn!("Правила из {} отброшены: {}", source, e);
                Vec::new()
            }),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn add(&self, scope: &Scope, fragment: Value) {
        let entry = Fragment {
            source: scope.clone(),
            rules: Self::parse_rules(scope, &fragment),
            config: without_key(&fragment, RULES_KEY),
        };

        {
            let mut fragments = self.fragments.write();
            match fragments.iter_mut().find(|existing| &existing.source == scope) {
                Some(existing) => *existing = entry,
                None => fragments.push(entry),
            }
        }

        debug!("Фрагмент конфигурации добавлен из {}", scope);
        // Ошибка означает лишь отсутствие подписчиков
        let _ = self.additions.send(scope.clone());
    }

    fn remove_from_source(&self, scope: &Scope) {
        let mut fragments = self.fragments.write();
        let before = fragments.len();
        fragments.retain(|fragment| &fragment.source != scope);

        if fragments.len() != before {
            debug!("Фрагмент конфигурации из {} удалён", scope);
        }
    }

    fn query(&self, scope: &Scope) -> Value {
        let fragments = self.fragments.read();
        let mut layers: Vec<(u8, &Value)> = Vec::new();

        for fragment in fragments.iter() {
            if fragment.source.covers(scope) {
                layers.push((fragment.source.rank(), &fragment.config));
            }
            for rule in &fragment.rules {
                if rule.scope.matches(scope) {
                    layers.push((rule.scope.rank(), &rule.config));
                }
            }
        }

        // Стабильная сортировка сохраняет порядок вставки внутри уровня
        layers.sort_by_key(|(rank, _)| *rank);
        crate::trace_if_enabled!("Запрос {}: {} слоёв конфигурации", scope, layers.len());

        let mut result = self.defaults.clone();
        for (_, layer) in layers {
            deep_merge(&mut result, layer);
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<Scope> {
        self.additions.subscribe()
    }
}
