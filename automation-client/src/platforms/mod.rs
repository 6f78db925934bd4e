use crate::cache_request::CacheSnapshot;
use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::types::{
    AutomationPattern, AutomationProperty, NavigateDirection, NodeRef, PatternHandle,
    PropertyValue, RuntimeId, TreeScope,
};
use std::sync::Arc;

pub mod memory;
#[cfg(target_os = "windows")]
pub mod windows;

/// One node of a native fetch result, shaped by the snapshot it was fetched with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawNode {
    /// Live node reference; `None` when the snapshot's mode is `None`.
    pub node: Option<NodeRef>,
    /// One value per requested property, in snapshot order; `None` when the
    /// node was outside the `ELEMENT` part of the scope.
    pub properties: Option<Vec<PropertyValue>>,
    /// One slot per requested pattern, in snapshot order.
    pub patterns: Option<Vec<Option<PatternHandle>>>,
    /// Filtered children; `None` when the scope did not ask for them.
    pub children: Option<Vec<RawNode>>,
}

/// Result of a fetch or navigation. `root` is `None` when nothing was found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub root: Option<RawNode>,
}

impl RawResponse {
    pub fn empty() -> Self {
        Self { root: None }
    }

    pub fn found(root: RawNode) -> Self {
        Self { root: Some(root) }
    }
}

/// The native call surface the client is layered on.
///
/// Fetch operations must return exactly what the snapshot asks for: one
/// property value per requested property (using
/// [`PropertyValue::NotSupported`] for unsupported ones), one slot per
/// requested pattern, child lists only where the scope covers them, and node
/// references only in `Full` mode. Every `NodeRef` and `PatternHandle`
/// handed out is later returned through `release_node`/`release_pattern`.
pub trait NativeProvider: Send + Sync {
    /// The desktop root.
    fn root_node(&self) -> Result<NodeRef, AutomationError>;

    /// The node with keyboard focus.
    fn focused_node(&self) -> Result<NodeRef, AutomationError>;

    /// Fetch `node` and the part of its subtree covered by `request`.
    fn fetch_updated_snapshot(
        &self,
        node: NodeRef,
        request: &CacheSnapshot,
    ) -> Result<RawResponse, AutomationError>;

    /// Move from `node` in `direction`, skipping nodes that fail `condition`,
    /// and fetch the target with `request`.
    fn navigate(
        &self,
        node: NodeRef,
        direction: NavigateDirection,
        condition: &Condition,
        request: &CacheSnapshot,
    ) -> Result<RawResponse, AutomationError>;

    /// Search `scope` of `node` for nodes matching `condition` and fetch each
    /// with `request`. With `first_only` the search stops at the first match.
    fn find(
        &self,
        node: NodeRef,
        scope: TreeScope,
        condition: &Condition,
        request: &CacheSnapshot,
        first_only: bool,
    ) -> Result<Vec<RawResponse>, AutomationError>;

    fn get_runtime_id(&self, node: NodeRef) -> Result<RuntimeId, AutomationError>;

    /// Live property read; unsupported properties yield `NotSupported`.
    fn get_property_value(
        &self,
        node: NodeRef,
        property: AutomationProperty,
    ) -> Result<PropertyValue, AutomationError>;

    /// Live pattern lookup; `None` when the node does not support it.
    fn get_pattern(
        &self,
        node: NodeRef,
        pattern: AutomationPattern,
    ) -> Result<Option<PatternHandle>, AutomationError>;

    fn release_node(&self, node: NodeRef);

    fn release_pattern(&self, pattern: PatternHandle);

    /// Enable downcasting to concrete provider types
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Create the provider for the current platform
pub fn create_provider() -> Result<Arc<dyn NativeProvider>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsProvider::new()?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(AutomationError::UnsupportedPlatform(
            "UI Automation is only available on Windows; use InMemoryProvider elsewhere"
                .to_string(),
        ))
    }
}
