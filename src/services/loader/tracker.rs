//! Hierarchy tracker: the forest of per-application state.
//!
//! Nodes live in a flat table keyed by UUID. `parent` is a non-owning UUID
//! reference into that table; `children` is the ordered list of child UUIDs.

use crate::events::AppIdentity;
use crate::scope::Scope;
use crate::services::runtime::DesktopRuntime;
use smallvec::SmallVec;
use std::collections::HashMap;

/// How a node entered the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Создан по событию application-created
    Created,
    /// Создан заранее, потому что понадобился дочернему приложению как родитель
    LateRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationNode {
    pub uuid: String,
    pub is_running: bool,
    pub parent: Option<String>,
    pub children: SmallVec<[String; 4]>,
    pub is_service_aware: bool,
    pub origin: NodeOrigin,
}

impl ApplicationNode {
    fn new(uuid: &str, is_service_aware: bool, origin: NodeOrigin) -> Self {
        Self {
            uuid: uuid.to_string(),
            is_running: true,
            parent: None,
            children: SmallVec::new(),
            is_service_aware,
            origin,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::application(self.uuid.clone())
    }

    /// Узел можно удалить: приложение закрыто и потомков не осталось
    pub fn is_collectable(&self) -> bool {
        !self.is_running && self.children.is_empty()
    }
}

/// Итог попытки связать родителя и потомка
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
    SelfParent,
    WouldCycle,
    /// Родитель назначается один раз; содержит уже назначенного родителя
    ParentAlreadySet(String),
    Missing,
}

/// What the tracker knew about a UUID when its creation event arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    /// Узел был зарегистрирован заранее как родитель
    WasLateRegistered,
    /// Узел остался после закрытия из-за потомков и снова запущен
    Relaunched,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct HierarchyTracker {
    nodes: HashMap<String, ApplicationNode>,
}

impl HierarchyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &str) -> Option<&ApplicationNode> {
        self.nodes.get(uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.nodes.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_of(&self, uuid: &str) -> Option<&str> {
        self.nodes.get(uuid).and_then(|node| node.parent.as_deref())
    }

    /// Returns the existing node untouched, or creates a running node with the
    /// given awareness and registers a close listener for it.
    pub fn get_or_create(
        &mut self,
        uuid: &str,
        is_service_aware: bool,
        origin: NodeOrigin,
        runtime: &dyn DesktopRuntime,
    ) -> &mut ApplicationNode {
        self.nodes.entry(uuid.to_string()).or_insert_with(|| {
            runtime.add_application_listener(&AppIdentity::new(uuid));
            ApplicationNode::new(uuid, is_service_aware, origin)
        })
    }

    /// Учитывает событие создания для уже известного узла
    pub fn observe_creation(&mut self, uuid: &str) -> Observation {
        match self.nodes.get_mut(uuid) {
            None => Observation::New,
            Some(node) if node.origin == NodeOrigin::LateRegistered => {
                node.origin = NodeOrigin::Created;
                node.is_running = true;
                Observation::WasLateRegistered
            }
            Some(node) if !node.is_running => {
                node.is_running = true;
                Observation::Relaunched
            }
            Some(_) => Observation::Duplicate,
        }
    }

    pub fn mark_closed(&mut self, uuid: &str) -> bool {
        match self.nodes.get_mut(uuid) {
            Some(node) => {
                node.is_running = false;
                true
            }
            None => false,
        }
    }

    /// Проверить, является ли `ancestor` предком `uuid` (или им самим)
    pub fn is_ancestor(&self, ancestor: &str, uuid: &str) -> bool {
        let mut current = Some(uuid);
        let mut steps = 0;

        while let Some(uuid) = current {
            if uuid == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                break;
            }
            current = self.parent_of(uuid);
        }

        false
    }

    /// Links `child` under `parent` in both directions. A child link is never
    /// duplicated and a parent, once set, is never reassigned.
    pub fn link(&mut self, parent: &str, child: &str) -> LinkOutcome {
        if parent == child {
            return LinkOutcome::SelfParent;
        }
        if !self.contains(parent) || !self.contains(child) {
            return LinkOutcome::Missing;
        }

        let current_parent = self.parent_of(child).map(str::to_string);
        match current_parent {
            Some(existing) if existing == parent => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    if !node.children.iter().any(|c| c == child) {
                        node.children.push(child.to_string());
                    }
                }
                return LinkOutcome::AlreadyLinked;
            }
            Some(existing) => return LinkOutcome::ParentAlreadySet(existing),
            None => {}
        }

        if self.is_ancestor(child, parent) {
            return LinkOutcome::WouldCycle;
        }

        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent.to_string());
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            if !node.children.iter().any(|c| c == child) {
                node.children.push(child.to_string());
            }
        }

        LinkOutcome::Linked
    }

    /// Unlinks the node from its parent's children and drops it from the table.
    pub fn remove(&mut self, uuid: &str) -> Option<ApplicationNode> {
        let node = self.nodes.remove(uuid)?;

        if let Some(parent) = node.parent.as_deref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|child| child.as_str() != uuid);
        }

        Some(node)
    }

    /// Cascading cleanup rooted at `uuid`: children first, then the node itself
    /// if it is closed and childless. Returns removed nodes in removal order.
    pub fn cleanup(&mut self, uuid: &str) -> Vec<ApplicationNode> {
        let mut removed = Vec::new();
        self.cleanup_into(uuid, &mut removed);
        removed
    }

    fn cleanup_into(&mut self, uuid: &str, removed: &mut Vec<ApplicationNode>) {
        let children = match self.nodes.get(uuid) {
            Some(node) => node.children.clone(),
            None => return,
        };

        for child in &children {
            self.cleanup_into(child, removed);
        }

        let collectable = self
            .nodes
            .get(uuid)
            .map(ApplicationNode::is_collectable)
            .unwrap_or(false);

        if collectable {
            if let Some(node) = self.remove(uuid) {
                removed.push(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runtime::DryRunRuntime;

    fn tracker_with(runtime: &DryRunRuntime, uuids: &[&str]) -> HierarchyTracker {
        let mut tracker = HierarchyTracker::new();
        for uuid in uuids {
            tracker.get_or_create(uuid, false, NodeOrigin::Created, runtime);
        }
        tracker
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let mut tracker = HierarchyTracker::new();

        let node = tracker.get_or_create("a", true, NodeOrigin::Created, &runtime);
        assert!(node.is_running);
        assert!(node.is_service_aware);
        assert!(runtime.has_application_listener("a"));

        // Повторный вызов не меняет признак осведомлённости
        let node = tracker.get_or_create("a", false, NodeOrigin::Created, &runtime);
        assert!(node.is_service_aware);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_link_rules() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let mut tracker = tracker_with(&runtime, &["p", "c", "other"]);

        assert_eq!(tracker.link("p", "c"), LinkOutcome::Linked);
        assert_eq!(tracker.link("p", "c"), LinkOutcome::AlreadyLinked);
        assert_eq!(tracker.get("p").unwrap().children.len(), 1);
        assert_eq!(tracker.link("other", "c"), LinkOutcome::ParentAlreadySet("p".to_string()));
        assert_eq!(tracker.link("c", "c"), LinkOutcome::SelfParent);
        assert_eq!(tracker.link("c", "p"), LinkOutcome::WouldCycle);
        assert_eq!(tracker.link("p", "missing"), LinkOutcome::Missing);
        assert_eq!(tracker.parent_of("c"), Some("p"));
    }

    #[test]
    fn test_cleanup_keeps_closed_parent_with_children() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let mut tracker = tracker_with(&runtime, &["p", "c"]);
        tracker.link("p", "c");

        tracker.mark_closed("p");
        assert!(tracker.cleanup("p").is_empty());
        assert!(tracker.contains("p"));

        tracker.mark_closed("c");
        let removed: Vec<String> = tracker.cleanup("p").into_iter().map(|n| n.uuid).collect();
        assert_eq!(removed, vec!["c".to_string(), "p".to_string()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cleanup_leaves_running_nodes() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let mut tracker = tracker_with(&runtime, &["root", "a", "b"]);
        tracker.link("root", "a");
        tracker.link("root", "b");

        tracker.mark_closed("a");
        let removed = tracker.cleanup("root");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].uuid, "a");
        assert_eq!(tracker.get("root").unwrap().children.as_slice(), &["b".to_string()]);
    }

    #[test]
    fn test_observe_creation() {
        let runtime = DryRunRuntime::new("service", "1.0.0");
        let mut tracker = HierarchyTracker::new();

        assert_eq!(tracker.observe_creation("a"), Observation::New);
        tracker.get_or_create("a", true, NodeOrigin::LateRegistered, &runtime);
        assert_eq!(tracker.observe_creation("a"), Observation::WasLateRegistered);
        assert_eq!(tracker.observe_creation("a"), Observation::Duplicate);

        tracker.mark_closed("a");
        assert_eq!(tracker.observe_creation("a"), Observation::Relaunched);
        assert!(tracker.get("a").unwrap().is_running);
    }
}
