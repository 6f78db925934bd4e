use crate::cache_request::{CacheRequest, CacheSnapshot};
use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::platforms::NativeProvider;
use crate::retrieval::{self, CachedNodeData, CachedTree};
use crate::types::{
    properties, AutomationPattern, AutomationProperty, NodeRef, PatternHandle, PropertyValue,
    Rect, RuntimeId, TreeScope,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// State of a cached structural link.
///
/// `Absent` means the link was fetched and there is no such node;
/// `NotRequested` means the request that produced the element never asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedLink<T> {
    NotRequested,
    Absent,
    Present(T),
}

impl<T> CachedLink<T> {
    pub fn is_requested(&self) -> bool {
        !matches!(self, CachedLink::NotRequested)
    }

    pub fn as_ref(&self) -> CachedLink<&T> {
        match self {
            CachedLink::NotRequested => CachedLink::NotRequested,
            CachedLink::Absent => CachedLink::Absent,
            CachedLink::Present(value) => CachedLink::Present(value),
        }
    }
}

/// A point-in-time capture of one UI node.
///
/// Holds the values requested by the [`CacheSnapshot`] that was in effect
/// when the element was fetched; they do not follow later changes in the
/// live UI. Reading anything the snapshot did not request fails with
/// [`AutomationError::NotInCache`].
///
/// Elements compare equal when their runtime ids are equal.
#[derive(Clone)]
pub struct AutomationElement {
    tree: Arc<CachedTree>,
    index: usize,
}

impl AutomationElement {
    pub(crate) fn from_tree(tree: Arc<CachedTree>, index: usize) -> Self {
        Self { tree, index }
    }

    fn data(&self) -> &CachedNodeData {
        &self.tree.nodes[self.index]
    }

    /// The provider that produced this element and owns its node reference.
    pub(crate) fn provider(&self) -> &Arc<dyn NativeProvider> {
        &self.tree.provider
    }

    fn sibling(&self, index: usize) -> AutomationElement {
        AutomationElement {
            tree: self.tree.clone(),
            index,
        }
    }

    /// The snapshot this element was fetched with.
    pub fn cache_request(&self) -> &Arc<CacheSnapshot> {
        &self.tree.request
    }

    /// The live node reference; `None` for snapshot-only elements.
    pub fn node_ref(&self) -> Option<NodeRef> {
        self.data().node
    }

    fn live_node(&self, operation: &str) -> Result<NodeRef, AutomationError> {
        self.data().node.ok_or_else(|| {
            AutomationError::UnsupportedOperation(format!(
                "{operation} needs a live element; this one was fetched in snapshot-only mode"
            ))
        })
    }

    fn cached_runtime_id(&self) -> Option<RuntimeId> {
        let values = self.data().properties.as_ref()?;
        let slot = self.tree.request.property_index(properties::RUNTIME_ID)?;
        match &values[slot] {
            PropertyValue::IntArray(parts) => Some(RuntimeId::new(parts.clone())),
            _ => None,
        }
    }

    /// The structural identifier: cached when available, otherwise read live.
    pub fn runtime_id(&self) -> Result<RuntimeId, AutomationError> {
        if let Some(id) = self.cached_runtime_id() {
            return Ok(id);
        }
        match self.data().node {
            Some(node) => self.provider().get_runtime_id(node),
            None => Err(AutomationError::NotInCache(
                "runtime id: element values were outside the requested scope".to_string(),
            )),
        }
    }

    /// Whether two elements refer to the same UI node.
    pub fn compare(a: &AutomationElement, b: &AutomationElement) -> Result<bool, AutomationError> {
        Ok(a.runtime_id()? == b.runtime_id()?)
    }

    // ---- cached values ----

    pub fn get_cached_property_value(
        &self,
        property: AutomationProperty,
    ) -> Result<PropertyValue, AutomationError> {
        self.get_cached_property_value_ex(property, false)
    }

    /// Cached value of `property`.
    ///
    /// An unsupported property reads as the property's default value, unless
    /// `ignore_default_value` is set, in which case
    /// [`PropertyValue::NotSupported`] is returned as is.
    pub fn get_cached_property_value_ex(
        &self,
        property: AutomationProperty,
        ignore_default_value: bool,
    ) -> Result<PropertyValue, AutomationError> {
        let slot = self.tree.request.property_index(property).ok_or_else(|| {
            AutomationError::NotInCache(format!(
                "property {} was not part of the cache request",
                property.name
            ))
        })?;
        let values = self.data().properties.as_ref().ok_or_else(|| {
            AutomationError::NotInCache(format!(
                "property {}: element values were outside the requested scope",
                property.name
            ))
        })?;
        Ok(convert_not_supported(
            values[slot].clone(),
            property,
            ignore_default_value,
        ))
    }

    /// Cached pattern object; `PatternNotSupported` when the node lacks it.
    pub fn get_cached_pattern(
        &self,
        pattern: AutomationPattern,
    ) -> Result<PatternObject, AutomationError> {
        self.try_get_cached_pattern(pattern)?.ok_or_else(|| {
            AutomationError::PatternNotSupported(format!(
                "element does not support the {} pattern",
                pattern.name
            ))
        })
    }

    pub fn try_get_cached_pattern(
        &self,
        pattern: AutomationPattern,
    ) -> Result<Option<PatternObject>, AutomationError> {
        let slot = self.tree.request.pattern_index(pattern).ok_or_else(|| {
            AutomationError::NotInCache(format!(
                "pattern {} was not part of the cache request",
                pattern.name
            ))
        })?;
        let slots = self.data().patterns.as_ref().ok_or_else(|| {
            AutomationError::NotInCache(format!(
                "pattern {}: element values were outside the requested scope",
                pattern.name
            ))
        })?;
        Ok(slots[slot].map(|handle| PatternObject {
            pattern,
            handle,
            cached: true,
            owner: PatternOwner::Tree(self.tree.clone()),
        }))
    }

    fn link(
        &self,
        link: CachedLink<&usize>,
        what: &str,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        match link {
            CachedLink::NotRequested => Err(AutomationError::NotInCache(format!(
                "{what} was not part of the cache request"
            ))),
            CachedLink::Absent => Ok(None),
            CachedLink::Present(&index) => Ok(Some(self.sibling(index))),
        }
    }

    pub fn cached_parent(&self) -> Result<Option<AutomationElement>, AutomationError> {
        self.link(self.data().parent.as_ref(), "cached parent")
    }

    pub fn cached_first_child(&self) -> Result<Option<AutomationElement>, AutomationError> {
        self.link(self.data().first_child.as_ref(), "cached first child")
    }

    pub fn cached_next_sibling(&self) -> Result<Option<AutomationElement>, AutomationError> {
        self.link(self.data().next_sibling.as_ref(), "cached next sibling")
    }

    pub fn cached_children(&self) -> Result<Vec<AutomationElement>, AutomationError> {
        match &self.data().children {
            CachedLink::Present(children) => {
                Ok(children.iter().map(|&i| self.sibling(i)).collect())
            }
            CachedLink::Absent => Ok(Vec::new()),
            CachedLink::NotRequested => Err(AutomationError::NotInCache(
                "cached children were not part of the cache request".to_string(),
            )),
        }
    }

    /// Typed access to cached values.
    pub fn cached(&self) -> ElementProperties<'_> {
        ElementProperties {
            element: self,
            live: false,
        }
    }

    // ---- live queries ----

    /// Typed access to live values. Fails for snapshot-only elements.
    pub fn current(&self) -> Result<ElementProperties<'_>, AutomationError> {
        self.live_node("current")?;
        Ok(ElementProperties {
            element: self,
            live: true,
        })
    }

    pub fn get_current_property_value(
        &self,
        property: AutomationProperty,
    ) -> Result<PropertyValue, AutomationError> {
        self.get_current_property_value_ex(property, false)
    }

    pub fn get_current_property_value_ex(
        &self,
        property: AutomationProperty,
        ignore_default_value: bool,
    ) -> Result<PropertyValue, AutomationError> {
        let node = self.live_node("get_current_property_value")?;
        let value = self.provider().get_property_value(node, property)?;
        Ok(convert_not_supported(value, property, ignore_default_value))
    }

    pub fn get_current_pattern(
        &self,
        pattern: AutomationPattern,
    ) -> Result<PatternObject, AutomationError> {
        let node = self.live_node("get_current_pattern")?;
        let handle = self.provider().get_pattern(node, pattern)?.ok_or_else(|| {
            AutomationError::PatternNotSupported(format!(
                "element does not support the {} pattern",
                pattern.name
            ))
        })?;
        Ok(PatternObject {
            pattern,
            handle,
            cached: false,
            owner: PatternOwner::Provider(self.provider().clone()),
        })
    }

    /// Fetch this node again with `request`.
    #[instrument(level = "debug", skip(self, request))]
    pub fn get_updated_cache(
        &self,
        request: &Arc<CacheSnapshot>,
    ) -> Result<AutomationElement, AutomationError> {
        let node = self.live_node("get_updated_cache")?;
        let response = self.provider().fetch_updated_snapshot(node, request)?;
        retrieval::element_from_response(self.provider(), request, response)?.ok_or_else(|| {
            AutomationError::ElementNotAvailable("element no longer exists".to_string())
        })
    }

    /// Fetch this node again with the calling thread's current request.
    pub fn refresh(&self) -> Result<AutomationElement, AutomationError> {
        self.get_updated_cache(&CacheRequest::current_snapshot())
    }

    /// First node in `scope` matching `condition`, fetched with `request`.
    #[instrument(level = "debug", skip(self, condition, request))]
    pub fn find_first(
        &self,
        scope: TreeScope,
        condition: &Condition,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Option<AutomationElement>, AutomationError> {
        validate_search_scope(scope)?;
        let node = self.live_node("find_first")?;
        let responses = self
            .provider()
            .find(node, scope, condition, request, true)?;
        Ok(retrieval::elements_from_responses(self.provider(), request, responses)?
            .into_iter()
            .next())
    }

    /// Every node in `scope` matching `condition`, fetched with `request`.
    #[instrument(level = "debug", skip(self, condition, request))]
    pub fn find_all(
        &self,
        scope: TreeScope,
        condition: &Condition,
        request: &Arc<CacheSnapshot>,
    ) -> Result<Vec<AutomationElement>, AutomationError> {
        validate_search_scope(scope)?;
        let node = self.live_node("find_all")?;
        let responses = self
            .provider()
            .find(node, scope, condition, request, false)?;
        retrieval::elements_from_responses(self.provider(), request, responses)
    }

    /// Serializable form of this element and its cached subtree.
    pub fn to_node(&self, config: &TreeDumpConfig) -> CachedNode {
        self.to_node_at(config, 0)
    }

    fn to_node_at(&self, config: &TreeDumpConfig, depth: usize) -> CachedNode {
        let request = &self.tree.request;
        let mut values = BTreeMap::new();
        if let Some(cached) = &self.data().properties {
            for (property, value) in request.properties().iter().zip(cached) {
                if *property == properties::RUNTIME_ID {
                    continue;
                }
                if value.is_not_supported() && !config.include_unsupported {
                    continue;
                }
                values.insert(property.name.to_string(), value.clone());
            }
        }
        let patterns = self
            .data()
            .patterns
            .iter()
            .flat_map(|slots| request.patterns().iter().zip(slots))
            .filter(|(_, handle)| handle.is_some())
            .map(|(pattern, _)| pattern.name.to_string())
            .collect();
        let children = match self.cached_children() {
            Ok(children) if config.max_depth.map_or(true, |max| depth < max) => Some(
                children
                    .iter()
                    .map(|child| child.to_node_at(config, depth + 1))
                    .collect(),
            ),
            _ => None,
        };
        CachedNode {
            // Dumps never reach the provider.
            runtime_id: self.cached_runtime_id(),
            properties: values,
            patterns,
            children,
        }
    }
}

fn validate_search_scope(scope: TreeScope) -> Result<(), AutomationError> {
    if scope.is_empty() || scope.bits() & !TreeScope::SUBTREE.bits() != 0 {
        return Err(AutomationError::InvalidScope(format!(
            "{scope:?} is not a valid search scope"
        )));
    }
    Ok(())
}

fn convert_not_supported(
    value: PropertyValue,
    property: AutomationProperty,
    ignore_default_value: bool,
) -> PropertyValue {
    if value.is_not_supported() && !ignore_default_value {
        property.kind.default_value()
    } else {
        value
    }
}

impl PartialEq for AutomationElement {
    fn eq(&self, other: &Self) -> bool {
        AutomationElement::compare(self, other).unwrap_or(false)
    }
}

impl fmt::Debug for AutomationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("AutomationElement");
        match self.cached_runtime_id() {
            Some(id) => s.field("runtime_id", &id),
            None => s.field("runtime_id", &"<not cached>"),
        };
        if let Ok(PropertyValue::String(name)) = self.get_cached_property_value(properties::NAME) {
            s.field("name", &name);
        }
        s.field("live", &self.data().node.is_some()).finish()
    }
}

/// Typed reads of an element's values, cached or live.
pub struct ElementProperties<'a> {
    element: &'a AutomationElement,
    live: bool,
}

impl ElementProperties<'_> {
    pub fn value(&self, property: AutomationProperty) -> Result<PropertyValue, AutomationError> {
        if self.live {
            self.element.get_current_property_value(property)
        } else {
            self.element.get_cached_property_value(property)
        }
    }

    fn mismatch(property: AutomationProperty, value: &PropertyValue) -> AutomationError {
        AutomationError::ArgumentTypeMismatch(format!(
            "{} holds a {} value",
            property.name,
            value.type_name()
        ))
    }

    fn string(&self, property: AutomationProperty) -> Result<String, AutomationError> {
        match self.value(property)? {
            PropertyValue::String(s) => Ok(s),
            PropertyValue::Empty => Ok(String::new()),
            other => Err(Self::mismatch(property, &other)),
        }
    }

    fn boolean(&self, property: AutomationProperty) -> Result<bool, AutomationError> {
        match self.value(property)? {
            PropertyValue::Bool(b) => Ok(b),
            PropertyValue::Empty => Ok(false),
            other => Err(Self::mismatch(property, &other)),
        }
    }

    fn int(&self, property: AutomationProperty) -> Result<i32, AutomationError> {
        match self.value(property)? {
            PropertyValue::Int(i) => Ok(i),
            PropertyValue::Empty => Ok(0),
            other => Err(Self::mismatch(property, &other)),
        }
    }

    pub fn name(&self) -> Result<String, AutomationError> {
        self.string(properties::NAME)
    }

    pub fn automation_id(&self) -> Result<String, AutomationError> {
        self.string(properties::AUTOMATION_ID)
    }

    pub fn class_name(&self) -> Result<String, AutomationError> {
        self.string(properties::CLASS_NAME)
    }

    pub fn help_text(&self) -> Result<String, AutomationError> {
        self.string(properties::HELP_TEXT)
    }

    pub fn framework_id(&self) -> Result<String, AutomationError> {
        self.string(properties::FRAMEWORK_ID)
    }

    pub fn localized_control_type(&self) -> Result<String, AutomationError> {
        self.string(properties::LOCALIZED_CONTROL_TYPE)
    }

    pub fn control_type(&self) -> Result<i32, AutomationError> {
        self.int(properties::CONTROL_TYPE)
    }

    pub fn process_id(&self) -> Result<i32, AutomationError> {
        self.int(properties::PROCESS_ID)
    }

    pub fn native_window_handle(&self) -> Result<i32, AutomationError> {
        self.int(properties::NATIVE_WINDOW_HANDLE)
    }

    pub fn is_enabled(&self) -> Result<bool, AutomationError> {
        self.boolean(properties::IS_ENABLED)
    }

    pub fn is_offscreen(&self) -> Result<bool, AutomationError> {
        self.boolean(properties::IS_OFFSCREEN)
    }

    pub fn has_keyboard_focus(&self) -> Result<bool, AutomationError> {
        self.boolean(properties::HAS_KEYBOARD_FOCUS)
    }

    pub fn is_keyboard_focusable(&self) -> Result<bool, AutomationError> {
        self.boolean(properties::IS_KEYBOARD_FOCUSABLE)
    }

    pub fn bounding_rectangle(&self) -> Result<Rect, AutomationError> {
        match self.value(properties::BOUNDING_RECTANGLE)? {
            PropertyValue::Rect(r) => Ok(r),
            PropertyValue::Empty => Ok(Rect::default()),
            other => Err(Self::mismatch(properties::BOUNDING_RECTANGLE, &other)),
        }
    }
}

enum PatternOwner {
    /// Keeps the cached tree, which releases the handle, alive.
    Tree(#[allow(dead_code)] Arc<CachedTree>),
    /// Handle was fetched live and is released with this object.
    Provider(Arc<dyn NativeProvider>),
}

/// A control pattern exposed by an element.
///
/// Individual pattern interfaces are provided by the native layer; this
/// object carries the handle used to reach them.
pub struct PatternObject {
    pattern: AutomationPattern,
    handle: PatternHandle,
    cached: bool,
    owner: PatternOwner,
}

impl PatternObject {
    pub fn pattern(&self) -> AutomationPattern {
        self.pattern
    }

    pub fn handle(&self) -> PatternHandle {
        self.handle
    }

    /// True when taken from an element's cache rather than fetched live.
    pub fn is_cached(&self) -> bool {
        self.cached
    }
}

impl fmt::Debug for PatternObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternObject")
            .field("pattern", &self.pattern)
            .field("handle", &self.handle)
            .field("cached", &self.cached)
            .finish()
    }
}

impl Drop for PatternObject {
    fn drop(&mut self) {
        match &self.owner {
            PatternOwner::Provider(provider) => provider.release_pattern(self.handle),
            PatternOwner::Tree(_) => {}
        }
    }
}

/// Options for [`AutomationElement::to_node`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeDumpConfig {
    /// Stop descending below this depth (the element itself is depth 0).
    pub max_depth: Option<usize>,
    /// Keep properties the node reported as not supported.
    pub include_unsupported: bool,
}

/// Serializable capture of a cached element and its cached children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<RuntimeId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<CachedNode>>,
}

impl CachedNode {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
