//! Turns native fetch results into cached element trees

use crate::cache_request::CacheSnapshot;
use crate::element::{AutomationElement, CachedLink};
use crate::errors::AutomationError;
use crate::platforms::{NativeProvider, RawNode, RawResponse};
use crate::types::{AutomationElementMode, NodeRef, PatternHandle, PropertyValue, TreeScope};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct CachedNodeData {
    pub(crate) node: Option<NodeRef>,
    pub(crate) properties: Option<Vec<PropertyValue>>,
    pub(crate) patterns: Option<Vec<Option<PatternHandle>>>,
    pub(crate) parent: CachedLink<usize>,
    pub(crate) first_child: CachedLink<usize>,
    pub(crate) next_sibling: CachedLink<usize>,
    pub(crate) children: CachedLink<Vec<usize>>,
}

/// Every element produced by one fetch, plus the snapshot that shaped it.
///
/// Owns the native handles of its nodes and patterns and releases them when
/// the last element referring to it is dropped.
pub(crate) struct CachedTree {
    pub(crate) provider: Arc<dyn NativeProvider>,
    pub(crate) request: Arc<CacheSnapshot>,
    pub(crate) nodes: Vec<CachedNodeData>,
}

impl Drop for CachedTree {
    fn drop(&mut self) {
        for data in &self.nodes {
            if let Some(node) = data.node {
                self.provider.release_node(node);
            }
            for handle in data.patterns.iter().flatten().flatten() {
                self.provider.release_pattern(*handle);
            }
        }
    }
}

/// Where a node sits in the requested scope.
#[derive(Clone, Copy)]
struct Expectation {
    element: bool,
    children: bool,
    nested_children: bool,
}

impl Expectation {
    fn root(scope: TreeScope) -> Self {
        Self {
            element: scope.contains(TreeScope::ELEMENT),
            children: scope.intersects(TreeScope::CHILDREN | TreeScope::DESCENDANTS),
            nested_children: scope.contains(TreeScope::DESCENDANTS),
        }
    }

    fn child(self) -> Self {
        Self {
            element: true,
            children: self.nested_children,
            nested_children: self.nested_children,
        }
    }
}

fn validate(
    raw: &RawNode,
    request: &CacheSnapshot,
    expect: Expectation,
    path: &str,
) -> Result<(), AutomationError> {
    let malformed = |what: String| {
        Err(AutomationError::Internal(format!(
            "malformed native response at {path}: {what}"
        )))
    };

    match (request.automation_element_mode(), raw.node.is_some()) {
        (AutomationElementMode::Full, false) => {
            return malformed("missing node reference in full mode".to_string())
        }
        (AutomationElementMode::None, true) => {
            return malformed("node reference returned in snapshot-only mode".to_string())
        }
        _ => {}
    }

    if expect.element {
        match &raw.properties {
            Some(values) if values.len() == request.properties().len() => {}
            Some(values) => {
                return malformed(format!(
                    "{} property values for {} requested properties",
                    values.len(),
                    request.properties().len()
                ))
            }
            None => return malformed("missing property values".to_string()),
        }
        match &raw.patterns {
            Some(slots) if slots.len() == request.patterns().len() => {}
            Some(slots) => {
                return malformed(format!(
                    "{} pattern slots for {} requested patterns",
                    slots.len(),
                    request.patterns().len()
                ))
            }
            None => return malformed("missing pattern slots".to_string()),
        }
    } else if raw.properties.is_some() || raw.patterns.is_some() {
        return malformed("values returned for a node outside the element scope".to_string());
    }

    match (&raw.children, expect.children) {
        (Some(children), true) => {
            for (i, child) in children.iter().enumerate() {
                validate(child, request, expect.child(), &format!("{path}/{i}"))?;
            }
            Ok(())
        }
        (None, false) => Ok(()),
        (Some(_), false) => malformed("children returned outside the requested scope".to_string()),
        (None, true) => malformed("missing children".to_string()),
    }
}

fn release_raw(provider: &dyn NativeProvider, raw: &RawNode) {
    if let Some(node) = raw.node {
        provider.release_node(node);
    }
    for handle in raw.patterns.iter().flatten().flatten() {
        provider.release_pattern(*handle);
    }
    for child in raw.children.iter().flatten() {
        release_raw(provider, child);
    }
}

fn flatten(raw: RawNode, parent: CachedLink<usize>, nodes: &mut Vec<CachedNodeData>) -> usize {
    let index = nodes.len();
    nodes.push(CachedNodeData {
        node: raw.node,
        properties: raw.properties,
        patterns: raw.patterns,
        parent,
        first_child: CachedLink::NotRequested,
        next_sibling: CachedLink::NotRequested,
        children: CachedLink::NotRequested,
    });

    if let Some(children) = raw.children {
        let child_indices: Vec<usize> = children
            .into_iter()
            .map(|child| flatten(child, CachedLink::Present(index), nodes))
            .collect();
        for pair in child_indices.windows(2) {
            nodes[pair[0]].next_sibling = CachedLink::Present(pair[1]);
        }
        if let Some(&last) = child_indices.last() {
            nodes[last].next_sibling = CachedLink::Absent;
        }
        nodes[index].first_child = match child_indices.first() {
            Some(&first) => CachedLink::Present(first),
            None => CachedLink::Absent,
        };
        nodes[index].children = CachedLink::Present(child_indices);
    }
    index
}

/// Build the element for `response`, or `None` when nothing was found.
///
/// The response is checked against `request` first; a response that does
/// not carry exactly what was requested is rejected and its handles released.
pub(crate) fn element_from_response(
    provider: &Arc<dyn NativeProvider>,
    request: &Arc<CacheSnapshot>,
    response: RawResponse,
) -> Result<Option<AutomationElement>, AutomationError> {
    let Some(root) = response.root else {
        return Ok(None);
    };

    if let Err(e) = validate(&root, request, Expectation::root(request.tree_scope()), "root") {
        warn!("Rejecting native response: {}", e);
        release_raw(provider.as_ref(), &root);
        return Err(e);
    }

    let mut nodes = Vec::new();
    flatten(root, CachedLink::NotRequested, &mut nodes);
    debug!(
        elements = nodes.len(),
        scope = ?request.tree_scope(),
        "cached fetched elements"
    );

    let tree = Arc::new(CachedTree {
        provider: provider.clone(),
        request: request.clone(),
        nodes,
    });
    Ok(Some(AutomationElement::from_tree(tree, 0)))
}

pub(crate) fn elements_from_responses(
    provider: &Arc<dyn NativeProvider>,
    request: &Arc<CacheSnapshot>,
    responses: Vec<RawResponse>,
) -> Result<Vec<AutomationElement>, AutomationError> {
    let mut elements = Vec::with_capacity(responses.len());
    let mut responses = responses.into_iter();
    while let Some(response) = responses.next() {
        match element_from_response(provider, request, response) {
            Ok(Some(element)) => elements.push(element),
            Ok(None) => {}
            Err(e) => {
                for rest in responses {
                    if let Some(root) = rest.root {
                        release_raw(provider.as_ref(), &root);
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(elements)
}
