//! Identifiers, values and handles shared by the cache-request machinery

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// The value type carried by a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    Bool,
    Int,
    IntArray,
    Double,
    String,
    Rect,
}

impl PropertyKind {
    /// The value reported in place of [`PropertyValue::NotSupported`] unless the
    /// caller asks to see the marker.
    pub fn default_value(self) -> PropertyValue {
        match self {
            PropertyKind::Bool => PropertyValue::Bool(false),
            PropertyKind::Int => PropertyValue::Int(0),
            PropertyKind::IntArray => PropertyValue::IntArray(Vec::new()),
            PropertyKind::Double => PropertyValue::Double(0.0),
            PropertyKind::String => PropertyValue::String(String::new()),
            PropertyKind::Rect => PropertyValue::Rect(Rect::default()),
        }
    }

    /// Whether `value` can be stored in a property of this kind.
    pub fn accepts(self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (PropertyKind::Bool, PropertyValue::Bool(_))
                | (PropertyKind::Int, PropertyValue::Int(_))
                | (PropertyKind::IntArray, PropertyValue::IntArray(_))
                | (PropertyKind::Double, PropertyValue::Double(_))
                | (PropertyKind::String, PropertyValue::String(_))
                | (PropertyKind::Rect, PropertyValue::Rect(_))
                | (_, PropertyValue::Empty)
                | (_, PropertyValue::NotSupported)
        )
    }
}

/// Identifies an element property.
#[derive(Clone, Copy)]
pub struct AutomationProperty {
    pub id: i32,
    pub name: &'static str,
    pub kind: PropertyKind,
}

impl AutomationProperty {
    pub const fn new(id: i32, name: &'static str, kind: PropertyKind) -> Self {
        Self { id, name, kind }
    }

    /// Resolve a well-known property by id.
    pub fn lookup(id: i32) -> Option<Self> {
        properties::ALL.iter().copied().find(|p| p.id == id)
    }

    /// Resolve a well-known property by programmatic name (case-insensitive).
    pub fn lookup_name(name: &str) -> Option<Self> {
        properties::ALL
            .iter()
            .copied()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

impl PartialEq for AutomationProperty {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AutomationProperty {}

impl std::hash::Hash for AutomationProperty {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AutomationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

impl fmt::Display for AutomationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identifies a control pattern.
#[derive(Clone, Copy)]
pub struct AutomationPattern {
    pub id: i32,
    pub name: &'static str,
}

impl AutomationPattern {
    pub const fn new(id: i32, name: &'static str) -> Self {
        Self { id, name }
    }

    pub fn lookup(id: i32) -> Option<Self> {
        patterns::ALL.iter().copied().find(|p| p.id == id)
    }

    pub fn lookup_name(name: &str) -> Option<Self> {
        patterns::ALL
            .iter()
            .copied()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

impl PartialEq for AutomationPattern {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AutomationPattern {}

impl std::hash::Hash for AutomationPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for AutomationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

impl fmt::Display for AutomationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Well-known element properties. Ids match the UI Automation property ids.
pub mod properties {
    use super::{AutomationProperty, PropertyKind};

    pub const RUNTIME_ID: AutomationProperty =
        AutomationProperty::new(30000, "RuntimeId", PropertyKind::IntArray);
    pub const BOUNDING_RECTANGLE: AutomationProperty =
        AutomationProperty::new(30001, "BoundingRectangle", PropertyKind::Rect);
    pub const PROCESS_ID: AutomationProperty =
        AutomationProperty::new(30002, "ProcessId", PropertyKind::Int);
    pub const CONTROL_TYPE: AutomationProperty =
        AutomationProperty::new(30003, "ControlType", PropertyKind::Int);
    pub const LOCALIZED_CONTROL_TYPE: AutomationProperty =
        AutomationProperty::new(30004, "LocalizedControlType", PropertyKind::String);
    pub const NAME: AutomationProperty =
        AutomationProperty::new(30005, "Name", PropertyKind::String);
    pub const ACCELERATOR_KEY: AutomationProperty =
        AutomationProperty::new(30006, "AcceleratorKey", PropertyKind::String);
    pub const ACCESS_KEY: AutomationProperty =
        AutomationProperty::new(30007, "AccessKey", PropertyKind::String);
    pub const HAS_KEYBOARD_FOCUS: AutomationProperty =
        AutomationProperty::new(30008, "HasKeyboardFocus", PropertyKind::Bool);
    pub const IS_KEYBOARD_FOCUSABLE: AutomationProperty =
        AutomationProperty::new(30009, "IsKeyboardFocusable", PropertyKind::Bool);
    pub const IS_ENABLED: AutomationProperty =
        AutomationProperty::new(30010, "IsEnabled", PropertyKind::Bool);
    pub const AUTOMATION_ID: AutomationProperty =
        AutomationProperty::new(30011, "AutomationId", PropertyKind::String);
    pub const CLASS_NAME: AutomationProperty =
        AutomationProperty::new(30012, "ClassName", PropertyKind::String);
    pub const HELP_TEXT: AutomationProperty =
        AutomationProperty::new(30013, "HelpText", PropertyKind::String);
    pub const NATIVE_WINDOW_HANDLE: AutomationProperty =
        AutomationProperty::new(30020, "NativeWindowHandle", PropertyKind::Int);
    pub const IS_CONTROL_ELEMENT: AutomationProperty =
        AutomationProperty::new(30016, "IsControlElement", PropertyKind::Bool);
    pub const IS_CONTENT_ELEMENT: AutomationProperty =
        AutomationProperty::new(30017, "IsContentElement", PropertyKind::Bool);
    pub const IS_OFFSCREEN: AutomationProperty =
        AutomationProperty::new(30022, "IsOffscreen", PropertyKind::Bool);
    pub const FRAMEWORK_ID: AutomationProperty =
        AutomationProperty::new(30024, "FrameworkId", PropertyKind::String);
    pub const VALUE_VALUE: AutomationProperty =
        AutomationProperty::new(30045, "ValueValue", PropertyKind::String);

    pub const ALL: &[AutomationProperty] = &[
        RUNTIME_ID,
        BOUNDING_RECTANGLE,
        PROCESS_ID,
        CONTROL_TYPE,
        LOCALIZED_CONTROL_TYPE,
        NAME,
        ACCELERATOR_KEY,
        ACCESS_KEY,
        HAS_KEYBOARD_FOCUS,
        IS_KEYBOARD_FOCUSABLE,
        IS_ENABLED,
        AUTOMATION_ID,
        CLASS_NAME,
        HELP_TEXT,
        NATIVE_WINDOW_HANDLE,
        IS_CONTROL_ELEMENT,
        IS_CONTENT_ELEMENT,
        IS_OFFSCREEN,
        FRAMEWORK_ID,
        VALUE_VALUE,
    ];
}

/// Well-known control patterns. Ids match the UI Automation pattern ids.
pub mod patterns {
    use super::AutomationPattern;

    pub const INVOKE: AutomationPattern = AutomationPattern::new(10000, "Invoke");
    pub const SELECTION: AutomationPattern = AutomationPattern::new(10001, "Selection");
    pub const VALUE: AutomationPattern = AutomationPattern::new(10002, "Value");
    pub const RANGE_VALUE: AutomationPattern = AutomationPattern::new(10003, "RangeValue");
    pub const SCROLL: AutomationPattern = AutomationPattern::new(10004, "Scroll");
    pub const EXPAND_COLLAPSE: AutomationPattern = AutomationPattern::new(10005, "ExpandCollapse");
    pub const GRID: AutomationPattern = AutomationPattern::new(10006, "Grid");
    pub const GRID_ITEM: AutomationPattern = AutomationPattern::new(10007, "GridItem");
    pub const MULTIPLE_VIEW: AutomationPattern = AutomationPattern::new(10008, "MultipleView");
    pub const WINDOW: AutomationPattern = AutomationPattern::new(10009, "Window");
    pub const SELECTION_ITEM: AutomationPattern = AutomationPattern::new(10010, "SelectionItem");
    pub const DOCK: AutomationPattern = AutomationPattern::new(10011, "Dock");
    pub const TABLE: AutomationPattern = AutomationPattern::new(10012, "Table");
    pub const TABLE_ITEM: AutomationPattern = AutomationPattern::new(10013, "TableItem");
    pub const TEXT: AutomationPattern = AutomationPattern::new(10014, "Text");
    pub const TOGGLE: AutomationPattern = AutomationPattern::new(10015, "Toggle");
    pub const TRANSFORM: AutomationPattern = AutomationPattern::new(10016, "Transform");
    pub const SCROLL_ITEM: AutomationPattern = AutomationPattern::new(10017, "ScrollItem");

    pub const ALL: &[AutomationPattern] = &[
        INVOKE,
        SELECTION,
        VALUE,
        RANGE_VALUE,
        SCROLL,
        EXPAND_COLLAPSE,
        GRID,
        GRID_ITEM,
        MULTIPLE_VIEW,
        WINDOW,
        SELECTION_ITEM,
        DOCK,
        TABLE,
        TABLE_ITEM,
        TEXT,
        TOGGLE,
        TRANSFORM,
        SCROLL_ITEM,
    ];
}

/// Which nodes relative to a root a request or search applies to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeScope(u32);

impl TreeScope {
    pub const NONE: TreeScope = TreeScope(0);
    pub const ELEMENT: TreeScope = TreeScope(0x1);
    pub const CHILDREN: TreeScope = TreeScope(0x2);
    pub const DESCENDANTS: TreeScope = TreeScope(0x4);
    pub const PARENT: TreeScope = TreeScope(0x8);
    pub const ANCESTORS: TreeScope = TreeScope(0x10);
    pub const SUBTREE: TreeScope = TreeScope(0x1 | 0x2 | 0x4);

    pub const fn from_bits(bits: u32) -> Self {
        TreeScope(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: TreeScope) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: TreeScope) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for TreeScope {
    type Output = TreeScope;

    fn bitor(self, rhs: TreeScope) -> TreeScope {
        TreeScope(self.0 | rhs.0)
    }
}

impl BitOrAssign for TreeScope {
    fn bitor_assign(&mut self, rhs: TreeScope) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TreeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TreeScope, &str); 5] = [
            (TreeScope::ELEMENT, "Element"),
            (TreeScope::CHILDREN, "Children"),
            (TreeScope::DESCENDANTS, "Descendants"),
            (TreeScope::PARENT, "Parent"),
            (TreeScope::ANCESTORS, "Ancestors"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        let known = NAMES.iter().fold(0, |acc, (flag, _)| acc | flag.bits());
        let unknown = self.0 & !known;
        match (names.is_empty(), unknown) {
            (true, 0) => f.write_str("TreeScope(None)"),
            (_, 0) => write!(f, "TreeScope({})", names.join(" | ")),
            (true, bits) => write!(f, "TreeScope({bits:#x})"),
            (false, bits) => write!(f, "TreeScope({} | {bits:#x})", names.join(" | ")),
        }
    }
}

/// Whether fetched elements keep a reference to the live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AutomationElementMode {
    /// Snapshot only; live queries on the element are unsupported.
    None,
    #[default]
    Full,
}

/// Structural identifier of a live node.
///
/// Unique per node on the current desktop at a point in time, but may be
/// recycled once the node is destroyed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(pub Vec<i32>);

impl RuntimeId {
    pub fn new(parts: impl Into<Vec<i32>>) -> Self {
        Self(parts.into())
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<i32>> for RuntimeId {
    fn from(parts: Vec<i32>) -> Self {
        Self(parts)
    }
}

impl fmt::Debug for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeId({self})")
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// Screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// A property value as reported by the native layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Empty,
    Bool(bool),
    Int(i32),
    IntArray(Vec<i32>),
    Double(f64),
    String(String),
    Rect(Rect),
    /// The node does not support the property.
    NotSupported,
}

impl PropertyValue {
    pub fn is_not_supported(&self) -> bool {
        matches!(self, PropertyValue::NotSupported)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rect(&self) -> Option<Rect> {
        match self {
            PropertyValue::Rect(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            PropertyValue::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Empty => "empty",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::IntArray(_) => "int array",
            PropertyValue::Double(_) => "double",
            PropertyValue::String(_) => "string",
            PropertyValue::Rect(_) => "rect",
            PropertyValue::NotSupported => "not supported",
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Rect> for PropertyValue {
    fn from(value: Rect) -> Self {
        PropertyValue::Rect(value)
    }
}

/// Opaque reference to a live node owned by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub u64);

/// Opaque reference to a pattern object owned by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigateDirection {
    Parent,
    NextSibling,
    PreviousSibling,
    FirstChild,
    LastChild,
}

/// Well-known control type ids.
pub mod control_types {
    pub const BUTTON: i32 = 50000;
    pub const CHECK_BOX: i32 = 50002;
    pub const EDIT: i32 = 50004;
    pub const LIST: i32 = 50008;
    pub const LIST_ITEM: i32 = 50007;
    pub const MENU: i32 = 50009;
    pub const PANE: i32 = 50033;
    pub const TEXT: i32 = 50020;
    pub const WINDOW: i32 = 50032;
}
