use crate::scope::Scope;
use serde_json::Value;
use tokio::sync::broadcast;

/// Contract of the scoped configuration store.
///
/// Every call is independently idempotent: `add` upserts the fragment for its
/// source scope and `remove_from_source` on an unknown scope is a no-op.
pub trait ConfigStore: Send + Sync {
    fn add(&self, scope: &Scope, fragment: Value);

    fn remove_from_source(&self, scope: &Scope);

    /// Defaults merged with every fragment and rule applicable to `scope`
    fn query(&self, scope: &Scope) -> Value;

    /// Source watch: the source scope of every added fragment
    fn subscribe(&self) -> broadcast::Receiver<Scope>;
}
