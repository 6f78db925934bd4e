//! Navigation between elements through a filtered view of the tree

use crate::cache_request::{CacheRequest, CacheSnapshot};
use crate::condition::Condition;
use crate::element::AutomationElement;
use crate::errors::AutomationError;
use crate::platforms::NativeProvider;
use crate::retrieval;
use crate::types::NavigateDirection;
use std::sync::Arc;
use tracing::instrument;

/// Walks the tree, skipping nodes that do not satisfy its condition.
///
/// Each step fetches the target with an explicitly supplied snapshot; the
/// `*_cached_by_current` variants use the calling thread's current request.
#[derive(Clone)]
pub struct TreeWalker {
    provider: Arc<dyn NativeProvider>,
    condition: Condition,
}

impl TreeWalker {
    pub fn new(provider: Arc<dyn NativeProvider>, condition: Condition) -> Self {
        Self {
            provider,
            condition,
        }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    #[instrument(level = "debug", skip(self, element, request))]
    fn step(
        &self,
        element: &AutomationElement,
        direction: NavigateDirection,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        let node = element.node_ref().ok_or_else(|| {
            AutomationError::UnsupportedOperation(
                "cannot navigate from an element fetched in snapshot-only mode".to_string(),
            )
        })?;
        // Node references are only meaningful to the provider that issued them.
        if !Arc::ptr_eq(element.provider(), &self.provider) {
            return Err(AutomationError::InvalidArgument(
                "element was fetched through a different provider than this walker".to_string(),
            ));
        }
        let response = self
            .provider
            .navigate(node, direction, &self.condition, request)?;
        retrieval::element_from_response(&self.provider, request, response)
    }

    pub fn get_parent(
        &self,
        element: &AutomationElement,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.step(element, NavigateDirection::Parent, request)
    }

    pub fn get_first_child(
        &self,
        element: &AutomationElement,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.step(element, NavigateDirection::FirstChild, request)
    }

    pub fn get_last_child(
        &self,
        element: &AutomationElement,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.step(element, NavigateDirection::LastChild, request)
    }

    pub fn get_next_sibling(
        &self,
        element: &AutomationElement,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.step(element, NavigateDirection::NextSibling, request)
    }

    pub fn get_previous_sibling(
        &self,
        element: &AutomationElement,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.step(element, NavigateDirection::PreviousSibling, request)
    }

    pub fn get_parent_cached_by_current(
        &self,
        element: &AutomationElement,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.get_parent(element, &CacheRequest::current_snapshot())
    }

    pub fn get_first_child_cached_by_current(
        &self,
        element: &AutomationElement,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.get_first_child(element, &CacheRequest::current_snapshot())
    }

    pub fn get_last_child_cached_by_current(
        &self,
        element: &AutomationElement,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.get_last_child(element, &CacheRequest::current_snapshot())
    }

    pub fn get_next_sibling_cached_by_current(
        &self,
        element: &AutomationElement,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.get_next_sibling(element, &CacheRequest::current_snapshot())
    }

    pub fn get_previous_sibling_cached_by_current(
        &self,
        element: &AutomationElement,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        self.get_previous_sibling(element, &CacheRequest::current_snapshot())
    }
}
