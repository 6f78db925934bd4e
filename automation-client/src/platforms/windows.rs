//! UI Automation provider for Windows, built on the `uiautomation` crate.
//!
//! Fetches go through native cache requests built from the snapshot's
//! properties, pattern availability flags, tree filter, scope and element
//! mode. Values are read back from the native cache, not from live calls.

use super::{NativeProvider, RawNode, RawResponse};
use crate::cache_request::CacheSnapshot;
use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::types::{
    patterns, properties, AutomationElementMode, AutomationPattern, AutomationProperty,
    NavigateDirection, NodeRef, PatternHandle, PropertyKind, PropertyValue, Rect, RuntimeId,
    TreeScope,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument, warn};
use uiautomation::core::{UICacheRequest, UICondition};
use uiautomation::types::{ElementMode, TreeScope as UITreeScope, UIProperty};
use uiautomation::variants::Variant;
use uiautomation::{UIAutomation, UIElement};

/// HRESULT of an element that no longer exists.
const UIA_E_ELEMENTNOTAVAILABLE: i32 = 0x8004_0201_u32 as i32;
const E_POINTER: i32 = 0x8000_4003_u32 as i32;

/// Thread-safe wrapper for the UIAutomation COM object
struct ThreadSafeWinUIAutomation(Arc<UIAutomation>);

// Safety: UIAutomation is thread-safe after COM initialization in MTA mode
unsafe impl Send for ThreadSafeWinUIAutomation {}
unsafe impl Sync for ThreadSafeWinUIAutomation {}

/// Thread-safe wrapper for a UIElement held in the handle table
#[derive(Clone)]
struct ThreadSafeWinUIElement(Arc<UIElement>);

unsafe impl Send for ThreadSafeWinUIElement {}
unsafe impl Sync for ThreadSafeWinUIElement {}

#[derive(Default)]
struct HandleTable {
    nodes: HashMap<u64, ThreadSafeWinUIElement>,
    patterns: HashMap<u64, (ThreadSafeWinUIElement, i32)>,
    next: u64,
}

impl HandleTable {
    fn add_node(&mut self, element: ThreadSafeWinUIElement) -> NodeRef {
        self.next += 1;
        self.nodes.insert(self.next, element);
        NodeRef(self.next)
    }

    fn add_pattern(&mut self, element: ThreadSafeWinUIElement, pattern: i32) -> PatternHandle {
        self.next += 1;
        self.patterns.insert(self.next, (element, pattern));
        PatternHandle(self.next)
    }
}

impl From<uiautomation::Error> for AutomationError {
    fn from(error: uiautomation::Error) -> Self {
        if error.code() == UIA_E_ELEMENTNOTAVAILABLE {
            AutomationError::ElementNotAvailable(format!("UIAutomation error: {error}"))
        } else {
            AutomationError::PlatformError(format!("UIAutomation error: {error}"))
        }
    }
}

/// A walker or cache lookup that came back with no element.
fn is_null_result(error: &uiautomation::Error) -> bool {
    error.code() == 0 || error.code() == E_POINTER
}

/// Native scope for a client scope. Element-and-children has no native
/// equivalent; the second value asks for a separate children pass.
fn native_scope(scope: TreeScope) -> Result<(UITreeScope, bool), AutomationError> {
    let has_element = scope.contains(TreeScope::ELEMENT);
    let native = if scope.contains(TreeScope::DESCENDANTS) {
        if has_element {
            UITreeScope::Subtree
        } else {
            UITreeScope::Descendants
        }
    } else if scope.contains(TreeScope::CHILDREN) {
        if has_element {
            return Ok((UITreeScope::Element, true));
        }
        UITreeScope::Children
    } else if has_element {
        UITreeScope::Element
    } else {
        return Err(AutomationError::InvalidScope(format!(
            "{scope:?} has no native equivalent"
        )));
    };
    Ok((native, false))
}

/// A snapshot translated into native cache requests.
struct NativeRequest {
    values: UICacheRequest,
    /// Children-scoped twin of `values`, for element-and-children scopes.
    children: Option<UICacheRequest>,
}

/// A fetched subtree read back from the native cache, before any handle is
/// allocated for it.
struct Captured {
    element: UIElement,
    properties: Option<Vec<PropertyValue>>,
    patterns: Option<Vec<bool>>,
    children: Option<Vec<Captured>>,
}

pub struct WindowsProvider {
    automation: ThreadSafeWinUIAutomation,
    handles: Mutex<HandleTable>,
}

impl WindowsProvider {
    pub fn new() -> Result<Self, AutomationError> {
        // `UIAutomation::new` initializes COM for the calling thread.
        let automation = UIAutomation::new()?;
        debug!("connected to UI Automation");
        Ok(Self {
            automation: ThreadSafeWinUIAutomation(Arc::new(automation)),
            handles: Mutex::new(HandleTable::default()),
        })
    }

    fn handles(&self) -> MutexGuard<'_, HandleTable> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, node: NodeRef) -> Result<ThreadSafeWinUIElement, AutomationError> {
        self.handles().nodes.get(&node.0).cloned().ok_or_else(|| {
            AutomationError::ElementNotAvailable(format!("unknown node handle {}", node.0))
        })
    }

    fn ui_condition(&self, condition: &Condition) -> Result<UICondition, AutomationError> {
        let automation = &self.automation.0;
        Ok(match condition {
            Condition::True => automation.create_true_condition()?,
            Condition::False => automation.create_false_condition()?,
            Condition::Property { property, value } => {
                let ui_property = ui_property(*property).ok_or_else(|| {
                    AutomationError::UnsupportedOperation(format!(
                        "{} cannot be used in a native condition",
                        property.name
                    ))
                })?;
                let variant = match value {
                    PropertyValue::Bool(b) => Variant::from(*b),
                    PropertyValue::Int(i) => Variant::from(*i),
                    PropertyValue::String(s) => Variant::from(s.as_str()),
                    other => {
                        return Err(AutomationError::UnsupportedOperation(format!(
                            "{} values cannot be used in a native condition",
                            other.type_name()
                        )))
                    }
                };
                automation.create_property_condition(ui_property, variant, None)?
            }
            Condition::And(operands) => {
                let mut folded = automation.create_true_condition()?;
                for operand in operands {
                    folded = automation.create_and_condition(folded, self.ui_condition(operand)?)?;
                }
                folded
            }
            Condition::Or(operands) => {
                let mut folded = automation.create_false_condition()?;
                for operand in operands {
                    folded = automation.create_or_condition(folded, self.ui_condition(operand)?)?;
                }
                folded
            }
            Condition::Not(inner) => automation.create_not_condition(self.ui_condition(inner)?)?,
        })
    }

    fn cache_request(
        &self,
        request: &CacheSnapshot,
        scope: UITreeScope,
    ) -> Result<UICacheRequest, AutomationError> {
        let native = self.automation.0.create_cache_request()?;
        for property in request.properties() {
            if let Some(ui_property) = ui_property(*property) {
                native.add_property(ui_property)?;
            }
        }
        for pattern in request.patterns() {
            if let Some(availability) = availability_property(*pattern) {
                native.add_property(availability)?;
            }
        }
        native.set_tree_filter(self.ui_condition(request.tree_filter())?)?;
        native.set_tree_scope(scope)?;
        native.set_automation_element_mode(match request.automation_element_mode() {
            AutomationElementMode::Full => ElementMode::Full,
            AutomationElementMode::None => ElementMode::None,
        })?;
        Ok(native)
    }

    fn native_request(&self, request: &CacheSnapshot) -> Result<NativeRequest, AutomationError> {
        let (scope, separate_children) = native_scope(request.tree_scope())?;
        let children = if separate_children {
            Some(self.cache_request(request, UITreeScope::Children)?)
        } else {
            None
        };
        Ok(NativeRequest {
            values: self.cache_request(request, scope)?,
            children,
        })
    }

    /// Read one node and the scoped part of its subtree out of the native
    /// cache. Children come from `structure` when the values were cached by
    /// a separate element-only pass.
    fn capture(
        &self,
        element: UIElement,
        structure: Option<&UIElement>,
        request: &CacheSnapshot,
        with_element: bool,
        depth_scope: TreeScope,
    ) -> Result<Captured, AutomationError> {
        let (props, pats) = if with_element {
            let props = request
                .properties()
                .iter()
                .map(|p| read_property(&element, *p, true))
                .collect::<Result<Vec<_>, _>>()?;
            let pats = request
                .patterns()
                .iter()
                .map(|p| pattern_available(&element, *p, true))
                .collect::<Result<Vec<_>, _>>()?;
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
            let holder = structure.unwrap_or(&element);
            let cached = match holder.get_cached_children() {
                Ok(children) => children,
                Err(e) if is_null_result(&e) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            Some(
                cached
                    .into_iter()
                    .map(|child| self.capture(child, None, request, true, nested))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            None
        };
        Ok(Captured {
            element,
            properties: props,
            patterns: pats,
            children,
        })
    }

    /// Hand out handles for a captured subtree. Called only after every
    /// capture of a call succeeded, so a failed call leaves nothing to release.
    fn register(&self, captured: Captured, request: &CacheSnapshot) -> RawNode {
        let shared = ThreadSafeWinUIElement(Arc::new(captured.element));
        let patterns = captured.patterns.map(|available| {
            let mut handles = self.handles();
            request
                .patterns()
                .iter()
                .zip(available)
                .map(|(pattern, available)| {
                    available.then(|| handles.add_pattern(shared.clone(), pattern.id))
                })
                .collect()
        });
        let children = captured.children.map(|children| {
            children
                .into_iter()
                .map(|child| self.register(child, request))
                .collect()
        });
        let node = match request.automation_element_mode() {
            AutomationElementMode::Full => Some(self.handles().add_node(shared)),
            AutomationElementMode::None => None,
        };
        RawNode {
            node,
            properties: captured.properties,
            patterns,
            children,
        }
    }

    /// Cache `element` with `native` and read back the result. `element`
    /// already carries the values when it came from a `*_build_cache` call.
    fn fetch(
        &self,
        element: &UIElement,
        native: &NativeRequest,
        request: &CacheSnapshot,
        already_cached: bool,
    ) -> Result<Captured, AutomationError> {
        let scope = request.tree_scope();
        let cached = if already_cached {
            element.clone()
        } else {
            element.build_updated_cache(&native.values)?
        };
        let structure = match &native.children {
            Some(children) => Some(element.build_updated_cache(children)?),
            None => None,
        };
        self.capture(
            cached,
            structure.as_ref(),
            request,
            scope.contains(TreeScope::ELEMENT),
            scope,
        )
    }
}

fn ui_property(property: AutomationProperty) -> Option<UIProperty> {
    let mapped = match property.id {
        id if id == properties::RUNTIME_ID.id => UIProperty::RuntimeId,
        id if id == properties::BOUNDING_RECTANGLE.id => UIProperty::BoundingRectangle,
        id if id == properties::PROCESS_ID.id => UIProperty::ProcessId,
        id if id == properties::CONTROL_TYPE.id => UIProperty::ControlType,
        id if id == properties::LOCALIZED_CONTROL_TYPE.id => UIProperty::LocalizedControlType,
        id if id == properties::NAME.id => UIProperty::Name,
        id if id == properties::ACCELERATOR_KEY.id => UIProperty::AcceleratorKey,
        id if id == properties::ACCESS_KEY.id => UIProperty::AccessKey,
        id if id == properties::HAS_KEYBOARD_FOCUS.id => UIProperty::HasKeyboardFocus,
        id if id == properties::IS_KEYBOARD_FOCUSABLE.id => UIProperty::IsKeyboardFocusable,
        id if id == properties::IS_ENABLED.id => UIProperty::IsEnabled,
        id if id == properties::AUTOMATION_ID.id => UIProperty::AutomationId,
        id if id == properties::CLASS_NAME.id => UIProperty::ClassName,
        id if id == properties::HELP_TEXT.id => UIProperty::HelpText,
        id if id == properties::IS_CONTROL_ELEMENT.id => UIProperty::IsControlElement,
        id if id == properties::IS_CONTENT_ELEMENT.id => UIProperty::IsContentElement,
        id if id == properties::IS_OFFSCREEN.id => UIProperty::IsOffscreen,
        id if id == properties::FRAMEWORK_ID.id => UIProperty::FrameworkId,
        id if id == properties::VALUE_VALUE.id => UIProperty::ValueValue,
        _ => return None,
    };
    Some(mapped)
}

fn availability_property(pattern: AutomationPattern) -> Option<UIProperty> {
    let mapped = match pattern.id {
        id if id == patterns::INVOKE.id => UIProperty::IsInvokePatternAvailable,
        id if id == patterns::SELECTION.id => UIProperty::IsSelectionPatternAvailable,
        id if id == patterns::VALUE.id => UIProperty::IsValuePatternAvailable,
        id if id == patterns::RANGE_VALUE.id => UIProperty::IsRangeValuePatternAvailable,
        id if id == patterns::SCROLL.id => UIProperty::IsScrollPatternAvailable,
        id if id == patterns::EXPAND_COLLAPSE.id => UIProperty::IsExpandCollapsePatternAvailable,
        id if id == patterns::GRID.id => UIProperty::IsGridPatternAvailable,
        id if id == patterns::GRID_ITEM.id => UIProperty::IsGridItemPatternAvailable,
        id if id == patterns::MULTIPLE_VIEW.id => UIProperty::IsMultipleViewPatternAvailable,
        id if id == patterns::WINDOW.id => UIProperty::IsWindowPatternAvailable,
        id if id == patterns::SELECTION_ITEM.id => UIProperty::IsSelectionItemPatternAvailable,
        id if id == patterns::DOCK.id => UIProperty::IsDockPatternAvailable,
        id if id == patterns::TABLE.id => UIProperty::IsTablePatternAvailable,
        id if id == patterns::TABLE_ITEM.id => UIProperty::IsTableItemPatternAvailable,
        id if id == patterns::TEXT.id => UIProperty::IsTextPatternAvailable,
        id if id == patterns::TOGGLE.id => UIProperty::IsTogglePatternAvailable,
        id if id == patterns::TRANSFORM.id => UIProperty::IsTransformPatternAvailable,
        id if id == patterns::SCROLL_ITEM.id => UIProperty::IsScrollItemPatternAvailable,
        _ => return None,
    };
    Some(mapped)
}

/// Read a property from the native cache (`cached`) or from the live node.
///
/// Native failures propagate. A value that does not convert to the
/// property's kind is the provider's not-supported marker.
fn read_property(
    element: &UIElement,
    property: AutomationProperty,
    cached: bool,
) -> Result<PropertyValue, AutomationError> {
    if property == properties::RUNTIME_ID {
        return Ok(PropertyValue::IntArray(element.get_runtime_id()?));
    }
    if property == properties::NAME {
        let name = if cached {
            element.get_cached_name()?
        } else {
            element.get_name()?
        };
        return Ok(PropertyValue::String(name));
    }
    if property == properties::CONTROL_TYPE {
        let control_type = if cached {
            element.get_cached_control_type()?
        } else {
            element.get_control_type()?
        };
        return Ok(PropertyValue::Int(control_type as i32));
    }
    if property == properties::BOUNDING_RECTANGLE {
        let rect = if cached {
            element.get_cached_bounding_rectangle()?
        } else {
            element.get_bounding_rectangle()?
        };
        return Ok(PropertyValue::Rect(Rect::new(
            rect.get_left() as f64,
            rect.get_top() as f64,
            rect.get_width() as f64,
            rect.get_height() as f64,
        )));
    }
    let Some(ui_property) = ui_property(property) else {
        return Ok(PropertyValue::NotSupported);
    };
    let variant: Variant = if cached {
        element.get_cached_property_value(ui_property)?
    } else {
        element.get_property_value(ui_property)?
    };
    let value = match property.kind {
        PropertyKind::String => variant.get_string().map(PropertyValue::String).ok(),
        PropertyKind::Bool => TryInto::<bool>::try_into(variant).map(PropertyValue::Bool).ok(),
        PropertyKind::Int => TryInto::<i32>::try_into(variant).map(PropertyValue::Int).ok(),
        _ => None,
    };
    Ok(value.unwrap_or(PropertyValue::NotSupported))
}

fn pattern_available(
    element: &UIElement,
    pattern: AutomationPattern,
    cached: bool,
) -> Result<bool, AutomationError> {
    let Some(availability) = availability_property(pattern) else {
        return Ok(false);
    };
    let variant = if cached {
        element.get_cached_property_value(availability)?
    } else {
        element.get_property_value(availability)?
    };
    Ok(TryInto::<bool>::try_into(variant).unwrap_or(false))
}

impl NativeProvider for WindowsProvider {
    fn root_node(&self) -> Result<NodeRef, AutomationError> {
        let root = self.automation.0.get_root_element()?;
        Ok(self
            .handles()
            .add_node(ThreadSafeWinUIElement(Arc::new(root))))
    }

    fn focused_node(&self) -> Result<NodeRef, AutomationError> {
        let focused = self.automation.0.get_focused_element()?;
        Ok(self
            .handles()
            .add_node(ThreadSafeWinUIElement(Arc::new(focused))))
    }

    #[instrument(level = "debug", skip(self, request))]
    fn fetch_updated_snapshot(
        &self,
        node: NodeRef,
        request: &CacheSnapshot,
    ) -> Result<RawResponse, AutomationError> {
        let element = self.resolve(node)?;
        let native = self.native_request(request)?;
        let captured = self.fetch(&element.0, &native, request, false)?;
        Ok(RawResponse::found(self.register(captured, request)))
    }

    #[instrument(level = "debug", skip(self, condition, request))]
    fn navigate(
        &self,
        node: NodeRef,
        direction: NavigateDirection,
        condition: &Condition,
        request: &CacheSnapshot,
    ) -> Result<RawResponse, AutomationError> {
        let element = self.resolve(node)?;
        let element = &*element.0;
        let walker = self
            .automation
            .0
            .create_tree_walker(&self.ui_condition(condition)?)?;
        let target = match direction {
            NavigateDirection::Parent => walker.get_parent(element),
            NavigateDirection::FirstChild => walker.get_first_child(element),
            NavigateDirection::LastChild => walker.get_last_child(element),
            NavigateDirection::NextSibling => walker.get_next_sibling(element),
            NavigateDirection::PreviousSibling => walker.get_previous_sibling(element),
        };
        match target {
            Ok(target) => {
                let native = self.native_request(request)?;
                let captured = self.fetch(&target, &native, request, false)?;
                Ok(RawResponse::found(self.register(captured, request)))
            }
            Err(e) if is_null_result(&e) => Ok(RawResponse::empty()),
            Err(e) => Err(e.into()),
        }
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
        let element = self.resolve(node)?;
        let ui_condition = self.ui_condition(condition)?;
        let native = self.native_request(request)?;
        // Element-and-children is searched as two native scopes, in that order.
        let (search_scope, separate_children) = native_scope(scope)?;
        let mut scopes = vec![search_scope];
        if separate_children {
            scopes.push(UITreeScope::Children);
        }
        let mut captured = Vec::new();
        for search_scope in scopes {
            if first_only {
                match element
                    .0
                    .find_first_build_cache(search_scope, &ui_condition, &native.values)
                {
                    Ok(found) => {
                        captured.push(self.fetch(&found, &native, request, true)?);
                        break;
                    }
                    Err(e) if is_null_result(&e) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            let found = match element
                .0
                .find_all_build_cache(search_scope, &ui_condition, &native.values)
            {
                Ok(found) => found,
                Err(e) if is_null_result(&e) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            for candidate in found {
                captured.push(self.fetch(&candidate, &native, request, true)?);
            }
        }
        Ok(captured
            .into_iter()
            .map(|c| RawResponse::found(self.register(c, request)))
            .collect())
    }

    fn get_runtime_id(&self, node: NodeRef) -> Result<RuntimeId, AutomationError> {
        let element = self.resolve(node)?;
        Ok(RuntimeId::new(element.0.get_runtime_id()?))
    }

    fn get_property_value(
        &self,
        node: NodeRef,
        property: AutomationProperty,
    ) -> Result<PropertyValue, AutomationError> {
        let element = self.resolve(node)?;
        read_property(&element.0, property, false)
    }

    fn get_pattern(
        &self,
        node: NodeRef,
        pattern: AutomationPattern,
    ) -> Result<Option<PatternHandle>, AutomationError> {
        let element = self.resolve(node)?;
        if pattern_available(&element.0, pattern, false)? {
            Ok(Some(self.handles().add_pattern(element, pattern.id)))
        } else {
            Ok(None)
        }
    }

    fn release_node(&self, node: NodeRef) {
        if self.handles().nodes.remove(&node.0).is_none() {
            warn!("Released unknown node handle {}", node.0);
        }
    }

    fn release_pattern(&self, pattern: PatternHandle) {
        if self.handles().patterns.remove(&pattern.0).is_none() {
            warn!("Released unknown pattern handle {}", pattern.0);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_and_children_needs_a_separate_children_pass() {
        let (scope, separate) = native_scope(TreeScope::ELEMENT | TreeScope::CHILDREN).unwrap();
        assert!(matches!(scope, UITreeScope::Element));
        assert!(separate);
    }

    #[test]
    fn descendant_scopes_map_to_single_native_scopes() {
        let (scope, separate) = native_scope(TreeScope::SUBTREE).unwrap();
        assert!(matches!(scope, UITreeScope::Subtree));
        assert!(!separate);
        let (scope, _) = native_scope(TreeScope::ELEMENT | TreeScope::DESCENDANTS).unwrap();
        assert!(matches!(scope, UITreeScope::Subtree));
        let (scope, _) = native_scope(TreeScope::CHILDREN | TreeScope::DESCENDANTS).unwrap();
        assert!(matches!(scope, UITreeScope::Descendants));
        let (scope, _) = native_scope(TreeScope::CHILDREN).unwrap();
        assert!(matches!(scope, UITreeScope::Children));
    }

    #[test]
    fn empty_scope_is_rejected() {
        assert!(matches!(
            native_scope(TreeScope::NONE),
            Err(AutomationError::InvalidScope(_))
        ));
    }

    #[test]
    fn every_pattern_has_a_native_availability_flag() {
        for pattern in [patterns::INVOKE, patterns::VALUE, patterns::WINDOW, patterns::TOGGLE] {
            assert!(availability_property(pattern).is_some(), "{}", pattern.name);
        }
    }
}
