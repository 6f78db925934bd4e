//! Tree filters: boolean predicates over the properties of a node

use crate::errors::AutomationError;
use crate::types::{properties, AutomationProperty, PropertyValue};

/// A predicate evaluated against a node's properties.
///
/// Used as the tree filter of a cache request and as the search condition of
/// tree walkers and `find_*` calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    True,
    False,
    Property {
        property: AutomationProperty,
        value: PropertyValue,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Matches every node.
    pub fn raw_view() -> Self {
        Condition::True
    }

    /// Matches nodes that are control elements.
    pub fn control_view() -> Self {
        Condition::Property {
            property: properties::IS_CONTROL_ELEMENT,
            value: PropertyValue::Bool(true),
        }
    }

    /// Matches nodes that are both control and content elements.
    pub fn content_view() -> Self {
        Condition::And(vec![
            Condition::control_view(),
            Condition::Property {
                property: properties::IS_CONTENT_ELEMENT,
                value: PropertyValue::Bool(true),
            },
        ])
    }

    /// Equality test against one property.
    ///
    /// Fails with `ArgumentTypeMismatch` when `value` cannot be held by `property`.
    pub fn property(
        property: AutomationProperty,
        value: impl Into<PropertyValue>,
    ) -> Result<Self, AutomationError> {
        let value = value.into();
        if value.is_not_supported() || !property.kind.accepts(&value) {
            return Err(AutomationError::ArgumentTypeMismatch(format!(
                "{} expects a {:?} value, got {}",
                property.name,
                property.kind,
                value.type_name()
            )));
        }
        Ok(Condition::Property { property, value })
    }

    pub fn and(conditions: Vec<Condition>) -> Result<Self, AutomationError> {
        if conditions.is_empty() {
            return Err(AutomationError::InvalidArgument(
                "an And condition needs at least one operand".to_string(),
            ));
        }
        Ok(Condition::And(conditions))
    }

    pub fn or(conditions: Vec<Condition>) -> Result<Self, AutomationError> {
        if conditions.is_empty() {
            return Err(AutomationError::InvalidArgument(
                "an Or condition needs at least one operand".to_string(),
            ));
        }
        Ok(Condition::Or(conditions))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    /// Evaluate against a node whose properties are read through `lookup`.
    ///
    /// A property the node does not support never satisfies a property test.
    pub fn evaluate(&self, lookup: &dyn Fn(AutomationProperty) -> PropertyValue) -> bool {
        match self {
            Condition::True => true,
            Condition::False => false,
            Condition::Property { property, value } => {
                let actual = lookup(*property);
                !actual.is_not_supported() && actual == *value
            }
            Condition::And(items) => items.iter().all(|c| c.evaluate(lookup)),
            Condition::Or(items) => items.iter().any(|c| c.evaluate(lookup)),
            Condition::Not(inner) => !inner.evaluate(lookup),
        }
    }

    /// Properties this condition reads.
    pub fn referenced_properties(&self) -> Vec<AutomationProperty> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out
    }

    fn collect_properties(&self, out: &mut Vec<AutomationProperty>) {
        match self {
            Condition::True | Condition::False => {}
            Condition::Property { property, .. } => {
                if !out.contains(property) {
                    out.push(*property);
                }
            }
            Condition::And(items) | Condition::Or(items) => {
                for item in items {
                    item.collect_properties(out);
                }
            }
            Condition::Not(inner) => inner.collect_properties(out),
        }
    }
}
