//! In-process provider over a tree of plain nodes.
//!
//! Backs the client on platforms without UI Automation and in tests. Nodes
//! can be changed after elements have been fetched, which makes the
//! difference between cached and live reads observable.

use super::{NativeProvider, RawNode, RawResponse};
use crate::cache_request::CacheSnapshot;
use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::types::{
    properties, AutomationElementMode, AutomationPattern, AutomationProperty, NavigateDirection,
    NodeRef, PatternHandle, PropertyValue, RuntimeId, TreeScope,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, warn};

/// Serializable description of one node and its subtree.
///
/// Properties and patterns are keyed by programmatic name, e.g. `"Name"` or
/// `"Invoke"`. Runtime ids must be unique within a tree; a missing one is
/// generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MemoryNode>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime_id(mut self, runtime_id: impl Into<Vec<i32>>) -> Self {
        self.runtime_id = Some(runtime_id.into());
        self
    }

    pub fn with_property(
        mut self,
        property: AutomationProperty,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties
            .insert(property.name.to_string(), value.into());
        self
    }

    pub fn with_pattern(mut self, pattern: AutomationPattern) -> Self {
        self.patterns.push(pattern.name.to_string());
        self
    }

    pub fn with_child(mut self, child: MemoryNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

struct NodeData {
    runtime_id: RuntimeId,
    parent: Option<usize>,
    children: Vec<usize>,
    properties: HashMap<i32, PropertyValue>,
    patterns: HashSet<i32>,
    alive: bool,
}

#[derive(Default)]
struct Tree {
    nodes: Vec<NodeData>,
    node_handles: HashMap<u64, usize>,
    pattern_handles: HashMap<u64, (usize, i32)>,
    next_handle: u64,
}

impl Tree {
    fn insert(&mut self, node: &MemoryNode, parent: Option<usize>) -> Result<usize, AutomationError> {
        let index = self.nodes.len();
        // Left empty here and assigned once every explicit id is known.
        let runtime_id = match &node.runtime_id {
            Some(id) if id.is_empty() => {
                return Err(AutomationError::InvalidArgument(
                    "runtime id must not be empty".to_string(),
                ))
            }
            Some(id) => RuntimeId::new(id.clone()),
            None => RuntimeId::default(),
        };
        let mut props = HashMap::new();
        for (name, value) in &node.properties {
            let property = AutomationProperty::lookup_name(name).ok_or_else(|| {
                AutomationError::InvalidArgument(format!("unknown property '{name}'"))
            })?;
            if !property.kind.accepts(value) {
                return Err(AutomationError::ArgumentTypeMismatch(format!(
                    "{} expects a {:?} value, got {}",
                    property.name,
                    property.kind,
                    value.type_name()
                )));
            }
            props.insert(property.id, value.clone());
        }
        let mut pats = HashSet::new();
        for name in &node.patterns {
            let pattern = AutomationPattern::lookup_name(name).ok_or_else(|| {
                AutomationError::InvalidArgument(format!("unknown pattern '{name}'"))
            })?;
            pats.insert(pattern.id);
        }
        self.nodes.push(NodeData {
            runtime_id,
            parent,
            children: Vec::new(),
            properties: props,
            patterns: pats,
            alive: true,
        });
        for child in &node.children {
            let child_index = self.insert(child, Some(index))?;
            self.nodes[index].children.push(child_index);
        }
        Ok(index)
    }

    /// Reject duplicate explicit runtime ids, then give every node without
    /// one a generated id that no other node uses.
    fn assign_runtime_ids(&mut self) -> Result<(), AutomationError> {
        let mut taken = HashSet::new();
        for node in self.nodes.iter().filter(|n| !n.runtime_id.is_empty()) {
            if !taken.insert(node.runtime_id.clone()) {
                return Err(AutomationError::InvalidArgument(format!(
                    "duplicate runtime id {}",
                    node.runtime_id
                )));
            }
        }
        let mut next = 0;
        for node in self.nodes.iter_mut().filter(|n| n.runtime_id.is_empty()) {
            let id = loop {
                let candidate = RuntimeId::new(vec![42, next]);
                next += 1;
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            taken.insert(id.clone());
            node.runtime_id = id;
        }
        Ok(())
    }

    fn property(&self, index: usize, property: AutomationProperty) -> PropertyValue {
        let node = &self.nodes[index];
        if property == properties::RUNTIME_ID {
            return PropertyValue::IntArray(node.runtime_id.0.clone());
        }
        match node.properties.get(&property.id) {
            Some(value) => value.clone(),
            // Providers report these as true unless they say otherwise.
            None if property == properties::IS_CONTROL_ELEMENT
                || property == properties::IS_CONTENT_ELEMENT =>
            {
                PropertyValue::Bool(true)
            }
            None => PropertyValue::NotSupported,
        }
    }

    fn matches(&self, index: usize, condition: &Condition) -> bool {
        condition.evaluate(&|p| self.property(index, p))
    }

    fn resolve(&self, node: NodeRef) -> Result<usize, AutomationError> {
        let index = *self.node_handles.get(&node.0).ok_or_else(|| {
            AutomationError::ElementNotAvailable(format!("unknown node handle {}", node.0))
        })?;
        if !self.nodes[index].alive {
            return Err(AutomationError::ElementNotAvailable(format!(
                "node {} no longer exists",
                self.nodes[index].runtime_id
            )));
        }
        Ok(index)
    }

    fn new_node_handle(&mut self, index: usize) -> NodeRef {
        self.next_handle += 1;
        self.node_handles.insert(self.next_handle, index);
        NodeRef(self.next_handle)
    }

    fn new_pattern_handle(&mut self, index: usize, pattern: i32) -> PatternHandle {
        self.next_handle += 1;
        self.pattern_handles
            .insert(self.next_handle, (index, pattern));
        PatternHandle(self.next_handle)
    }

    /// Children as seen through `condition`: failing nodes are skipped and
    /// their matching descendants take their place.
    fn view_children(&self, index: usize, condition: &Condition) -> Vec<usize> {
        let mut out = Vec::new();
        for &child in &self.nodes[index].children {
            if !self.nodes[child].alive {
                continue;
            }
            if self.matches(child, condition) {
                out.push(child);
            } else {
                out.extend(self.view_children(child, condition));
            }
        }
        out
    }

    /// Nearest ancestor that passes `condition`; the root always does.
    fn view_parent(&self, index: usize, condition: &Condition) -> Option<usize> {
        let mut current = self.nodes[index].parent;
        while let Some(candidate) = current {
            if self.nodes[candidate].parent.is_none() || self.matches(candidate, condition) {
                return Some(candidate);
            }
            current = self.nodes[candidate].parent;
        }
        None
    }

    fn view_descendants(&self, index: usize, condition: &Condition, out: &mut Vec<usize>) {
        for child in self.view_children(index, condition) {
            out.push(child);
            self.view_descendants(child, condition, out);
        }
    }

    /// Build the response node for `index`. `with_element` controls whether
    /// the node's own values are included; `depth_scope` whether children
    /// and descendants are.
    fn build(
        &mut self,
        index: usize,
        request: &CacheSnapshot,
        with_element: bool,
        depth_scope: TreeScope,
    ) -> RawNode {
        let node = match request.automation_element_mode() {
            AutomationElementMode::Full => Some(self.new_node_handle(index)),
            AutomationElementMode::None => None,
        };
        let (props, pats) = if with_element {
            let props = request
                .properties()
                .iter()
                .map(|p| self.property(index, *p))
                .collect();
            let pats = request
                .patterns()
                .iter()
                .map(|p| {
                    if self.nodes[index].patterns.contains(&p.id) {
                        Some(self.new_pattern_handle(index, p.id))
                    } else {
                        None
                    }
                })
                .collect();
            (Some(props), Some(pats))
        } else {
            (None, None)
        };
        let children = if depth_scope.intersects(TreeScope::CHILDREN | TreeScope::DESCENDANTS) {
            let nested = if depth_scope.contains(TreeScope::DESCENDANTS) {
                TreeScope::DESCENDANTS
            } else {
                TreeScope::NONE
            };
            let view = self.view_children(index, request.tree_filter());
            Some(
                view.into_iter()
                    .map(|child| self.build(child, request, true, nested))
                    .collect(),
            )
        } else {
            None
        };
        RawNode {
            node,
            properties: props,
            patterns: pats,
            children,
        }
    }

    fn fetch(&mut self, index: usize, request: &CacheSnapshot) -> RawResponse {
        let scope = request.tree_scope();
        let root = self.build(index, request, scope.contains(TreeScope::ELEMENT), scope);
        RawResponse::found(root)
    }
}

/// Provider backed by an in-memory tree.
pub struct InMemoryProvider {
    tree: Mutex<Tree>,
}

impl InMemoryProvider {
    pub fn new(root: &MemoryNode) -> Result<Self, AutomationError> {
        let mut tree = Tree::default();
        tree.insert(root, None)?;
        tree.assign_runtime_ids()?;
        debug!(nodes = tree.nodes.len(), "built in-memory UI tree");
        Ok(Self {
            tree: Mutex::new(tree),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, AutomationError> {
        let root = MemoryNode::from_json(json)
            .map_err(|e| AutomationError::InvalidArgument(format!("invalid tree JSON: {e}")))?;
        Self::new(&root)
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_of(tree: &Tree, runtime_id: &RuntimeId) -> Result<usize, AutomationError> {
        tree.nodes
            .iter()
            .position(|n| n.alive && &n.runtime_id == runtime_id)
            .ok_or_else(|| {
                AutomationError::ElementNotAvailable(format!("no node with runtime id {runtime_id}"))
            })
    }

    /// Change a property of a live node.
    pub fn set_property(
        &self,
        runtime_id: &RuntimeId,
        property: AutomationProperty,
        value: impl Into<PropertyValue>,
    ) -> Result<(), AutomationError> {
        let value = value.into();
        if property == properties::RUNTIME_ID || !property.kind.accepts(&value) {
            return Err(AutomationError::ArgumentTypeMismatch(format!(
                "cannot set {} to a {} value",
                property.name,
                value.type_name()
            )));
        }
        let mut tree = self.tree();
        let index = Self::index_of(&tree, runtime_id)?;
        tree.nodes[index].properties.insert(property.id, value);
        Ok(())
    }

    /// Destroy a node and its subtree. Outstanding handles become unavailable.
    pub fn remove_node(&self, runtime_id: &RuntimeId) -> Result<(), AutomationError> {
        let mut tree = self.tree();
        let index = Self::index_of(&tree, runtime_id)?;
        if tree.nodes[index].parent.is_none() {
            return Err(AutomationError::InvalidArgument(
                "the root node cannot be removed".to_string(),
            ));
        }
        let mut pending = vec![index];
        while let Some(i) = pending.pop() {
            tree.nodes[i].alive = false;
            pending.extend(tree.nodes[i].children.iter().copied());
        }
        Ok(())
    }

    /// Node and pattern handles that have been handed out and not released.
    pub fn outstanding_handles(&self) -> usize {
        let tree = self.tree();
        tree.node_handles.len() + tree.pattern_handles.len()
    }
}

impl NativeProvider for InMemoryProvider {
    fn root_node(&self) -> Result<NodeRef, AutomationError> {
        Ok(self.tree().new_node_handle(0))
    }

    fn focused_node(&self) -> Result<NodeRef, AutomationError> {
        let mut tree = self.tree();
        let focused = (0..tree.nodes.len())
            .find(|&i| {
                tree.nodes[i].alive
                    && tree.property(i, properties::HAS_KEYBOARD_FOCUS) == PropertyValue::Bool(true)
            })
            .unwrap_or(0);
        Ok(tree.new_node_handle(focused))
    }

    #[instrument(level = "debug", skip(self, request))]
    fn fetch_updated_snapshot(
        &self,
        node: NodeRef,
        request: &CacheSnapshot,
    ) -> Result<RawResponse, AutomationError> {
        let mut tree = self.tree();
        let index = tree.resolve(node)?;
        Ok(tree.fetch(index, request))
    }

    #[instrument(level = "debug", skip(self, condition, request))]
    fn navigate(
        &self,
        node: NodeRef,
        direction: NavigateDirection,
        condition: &Condition,
        request: &CacheSnapshot,
    ) -> Result<RawResponse, AutomationError> {
        let mut tree = self.tree();
        let index = tree.resolve(node)?;
        let target = match direction {
            NavigateDirection::Parent => tree.view_parent(index, condition),
            NavigateDirection::FirstChild => tree.view_children(index, condition).first().copied(),
            NavigateDirection::LastChild => tree.view_children(index, condition).last().copied(),
            NavigateDirection::NextSibling | NavigateDirection::PreviousSibling => {
                match tree.view_parent(index, condition) {
                    Some(parent) => {
                        let siblings = tree.view_children(parent, condition);
                        siblings.iter().position(|&s| s == index).and_then(|pos| {
                            if direction == NavigateDirection::NextSibling {
                                siblings.get(pos + 1).copied()
                            } else {
                                pos.checked_sub(1).map(|p| siblings[p])
                            }
                        })
                    }
                    None => None,
                }
            }
        };
        Ok(match target {
            Some(target) => tree.fetch(target, request),
            None => RawResponse::empty(),
        })
    }

    #[instrument(level = "debug", skip(self, condition, request))]
    fn find(
        &self,
        node: NodeRef,
        scope: TreeScope,
        condition: &Condition,
        request: &CacheSnapshot,
        first_only: bool,
    ) -> Result<Vec<RawResponse>, AutomationError> {
        let mut tree = self.tree();
        let index = tree.resolve(node)?;
        let filter = request.tree_filter();

        let mut candidates = Vec::new();
        if scope.contains(TreeScope::ELEMENT) {
            candidates.push(index);
        }
        if scope.contains(TreeScope::DESCENDANTS) {
            tree.view_descendants(index, filter, &mut candidates);
        } else if scope.contains(TreeScope::CHILDREN) {
            candidates.extend(tree.view_children(index, filter));
        }

        let mut results = Vec::new();
        for candidate in candidates {
            if tree.matches(candidate, condition) {
                results.push(tree.fetch(candidate, request));
                if first_only {
                    break;
                }
            }
        }
        Ok(results)
    }

    fn get_runtime_id(&self, node: NodeRef) -> Result<RuntimeId, AutomationError> {
        let tree = self.tree();
        let index = tree.resolve(node)?;
        Ok(tree.nodes[index].runtime_id.clone())
    }

    fn get_property_value(
        &self,
        node: NodeRef,
        property: AutomationProperty,
    ) -> Result<PropertyValue, AutomationError> {
        let tree = self.tree();
        let index = tree.resolve(node)?;
        Ok(tree.property(index, property))
    }

    fn get_pattern(
        &self,
        node: NodeRef,
        pattern: AutomationPattern,
    ) -> Result<Option<PatternHandle>, AutomationError> {
        let mut tree = self.tree();
        let index = tree.resolve(node)?;
        if tree.nodes[index].patterns.contains(&pattern.id) {
            Ok(Some(tree.new_pattern_handle(index, pattern.id)))
        } else {
            Ok(None)
        }
    }

    fn release_node(&self, node: NodeRef) {
        if self.tree().node_handles.remove(&node.0).is_none() {
            warn!("Released unknown node handle {}", node.0);
        }
    }

    fn release_pattern(&self, pattern: PatternHandle) {
        if self.tree().pattern_handles.remove(&pattern.0).is_none() {
            warn!("Released unknown pattern handle {}", pattern.0);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
