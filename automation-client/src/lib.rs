//! Client-side cache requests for UI Automation
//!
//! A [`CacheRequest`] describes which properties, patterns and structural
//! links to prefetch when elements are retrieved. Retrieval returns
//! [`AutomationElement`]s: immutable captures that answer exactly what their
//! request asked for and fail with [`AutomationError::NotInCache`] otherwise.
//!
//! ```
//! use automation_client::platforms::memory::{InMemoryProvider, MemoryNode};
//! use automation_client::{properties, Automation, CacheRequest, TreeScope};
//! use std::sync::Arc;
//!
//! let tree = MemoryNode::new()
//!     .with_property(properties::NAME, "Desktop")
//!     .with_child(MemoryNode::new().with_property(properties::NAME, "Editor"));
//! let automation = Automation::new(Arc::new(InMemoryProvider::new(&tree)?));
//!
//! let request = CacheRequest::new();
//! request.add_property(properties::NAME)?;
//! request.set_tree_scope(TreeScope::ELEMENT | TreeScope::CHILDREN)?;
//!
//! let root = automation.root_element_build_cache(&request.snapshot())?;
//! let children = root.cached_children()?;
//! assert_eq!(children[0].cached().name()?, "Editor");
//! # Ok::<(), automation_client::AutomationError>(())
//! ```

use std::sync::Arc;
use tracing::instrument;

pub mod cache_request;
pub mod condition;
pub mod element;
pub mod errors;
pub mod platforms;
mod retrieval;
#[cfg(test)]
mod tests;
pub mod tree_walker;
pub mod types;

pub use cache_request::{ActivationGuard, CacheRequest, CacheSnapshot};
pub use condition::Condition;
pub use element::{
    AutomationElement, CachedLink, CachedNode, ElementProperties, PatternObject, TreeDumpConfig,
};
pub use errors::AutomationError;
pub use platforms::NativeProvider;
pub use tree_walker::TreeWalker;
pub use types::{
    patterns, properties, AutomationElementMode, AutomationPattern, AutomationProperty,
    NavigateDirection, NodeRef, PatternHandle, PropertyKind, PropertyValue, Rect, RuntimeId,
    TreeScope,
};

/// The main entry point for retrieving elements
pub struct Automation {
    provider: Arc<dyn NativeProvider>,
}

impl Automation {
    pub fn new(provider: Arc<dyn NativeProvider>) -> Self {
        Self { provider }
    }

    /// Connect to the platform's UI Automation provider.
    #[instrument]
    pub fn new_default() -> Result<Self, AutomationError> {
        Ok(Self::new(platforms::create_provider()?))
    }

    pub fn provider(&self) -> &Arc<dyn NativeProvider> {
        &self.provider
    }

    fn fetch(
        &self,
        node: NodeRef,
        request: &Arc<CacheSnapshot>,
    ) -> Result<AutomationElement, AutomationError> {
        let response = match self.provider.fetch_updated_snapshot(node, request) {
            Ok(response) => response,
            Err(e) => {
                self.provider.release_node(node);
                return Err(e);
            }
        };
        self.provider.release_node(node);
        retrieval::element_from_response(&self.provider, request, response)?.ok_or_else(|| {
            AutomationError::ElementNotAvailable("element vanished while fetching".to_string())
        })
    }

    /// The desktop root, fetched with `request`.
    #[instrument(skip(self, request))]
    pub fn root_element_build_cache(
        &self,
        request: &Arc<CacheSnapshot>,
    ) -> Result<AutomationElement, AutomationError> {
        let node = self.provider.root_node()?;
        self.fetch(node, request)
    }

    /// The desktop root, fetched with the calling thread's current request.
    pub fn root_element(&self) -> Result<AutomationElement, AutomationError> {
        self.root_element_build_cache(&CacheRequest::current_snapshot())
    }

    #[instrument(skip(self, request))]
    pub fn focused_element_build_cache(
        &self,
        request: &Arc<CacheSnapshot>,
    ) -> Result<AutomationElement, AutomationError> {
        let node = self.provider.focused_node()?;
        self.fetch(node, request)
    }

    pub fn focused_element(&self) -> Result<AutomationElement, AutomationError> {
        self.focused_element_build_cache(&CacheRequest::current_snapshot())
    }

    /// Wrap a node reference obtained from the provider, fetching it with
    /// `request`. The reference is consumed and released.
    #[instrument(skip(self, request))]
    pub fn element_from_node(
        &self,
        node: NodeRef,
        request: &Arc<CacheSnapshot>,
    ) -> Result<AutomationElement, AutomationError> {
        self.fetch(node, request)
    }

    pub fn create_tree_walker(&self, condition: Condition) -> TreeWalker {
        TreeWalker::new(self.provider.clone(), condition)
    }

    pub fn raw_view_walker(&self) -> TreeWalker {
        self.create_tree_walker(Condition::raw_view())
    }

    pub fn control_view_walker(&self) -> TreeWalker {
        self.create_tree_walker(Condition::control_view())
    }

    pub fn content_view_walker(&self) -> TreeWalker {
        self.create_tree_walker(Condition::content_view())
    }
}

impl Clone for Automation {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
        }
    }
}
