//! Tests for cache request configuration and freezing

use crate::cache_request::CacheRequest;
use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::types::{patterns, properties, AutomationElementMode, TreeScope};
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn new_request_fetches_only_the_element_runtime_id() {
    let request = CacheRequest::new();
    assert_eq!(request.tree_scope(), TreeScope::ELEMENT);
    assert_eq!(request.tree_filter(), Condition::control_view());
    assert_eq!(request.properties(), vec![properties::RUNTIME_ID]);
    assert!(request.patterns().is_empty());
    assert_eq!(request.automation_element_mode(), AutomationElementMode::Full);
    assert!(!request.is_active());
}

#[test]
fn scope_must_be_non_empty_and_downward() {
    let request = CacheRequest::new();

    assert!(matches!(
        request.set_tree_scope(TreeScope::NONE),
        Err(AutomationError::InvalidScope(_))
    ));
    assert!(matches!(
        request.set_tree_scope(TreeScope::PARENT),
        Err(AutomationError::InvalidScope(_))
    ));
    assert!(matches!(
        request.set_tree_scope(TreeScope::ELEMENT | TreeScope::ANCESTORS),
        Err(AutomationError::InvalidScope(_))
    ));

    request
        .set_tree_scope(TreeScope::ELEMENT | TreeScope::CHILDREN)
        .unwrap();
    assert_eq!(request.tree_scope(), TreeScope::ELEMENT | TreeScope::CHILDREN);
    request.set_tree_scope(TreeScope::SUBTREE).unwrap();
    assert_eq!(request.tree_scope(), TreeScope::SUBTREE);
}

#[test]
fn missing_tree_filter_is_a_null_argument() {
    let request = CacheRequest::new();
    assert!(matches!(
        request.set_tree_filter(None),
        Err(AutomationError::NullArgument(_))
    ));
    request.set_tree_filter(Condition::raw_view()).unwrap();
    assert_eq!(request.tree_filter(), Condition::True);
}

#[test]
fn active_request_rejects_every_mutation_until_popped() {
    let request = CacheRequest::new();
    request.push();
    assert!(request.is_active());

    let violations = [
        request.add_property(properties::NAME),
        request.add_pattern(patterns::INVOKE),
        request.set_tree_scope(TreeScope::CHILDREN),
        request.set_tree_filter(Condition::raw_view()),
        request.set_automation_element_mode(AutomationElementMode::None),
    ];
    for result in violations {
        assert!(
            matches!(result, Err(AutomationError::InStateViolation(_))),
            "expected InStateViolation, got {result:?}"
        );
    }

    request.pop().unwrap();
    assert_eq!(request.activation_count(), 0);

    request.add_property(properties::NAME).unwrap();
    request.add_pattern(patterns::INVOKE).unwrap();
    request.set_tree_scope(TreeScope::CHILDREN).unwrap();
    request.set_tree_filter(Condition::raw_view()).unwrap();
    request
        .set_automation_element_mode(AutomationElementMode::None)
        .unwrap();
}

#[test]
fn rejected_mutation_leaves_configuration_untouched() {
    let request = CacheRequest::new();
    let _guard = request.activate();
    let before = request.snapshot();
    let _ = request.add_property(properties::NAME);
    assert!(!request.properties().contains(&properties::NAME));
    assert!(Arc::ptr_eq(&before, &request.snapshot()));
}

#[test]
fn default_request_is_never_mutable() {
    let default = CacheRequest::default_request();
    assert!(default.is_default());
    assert!(default.is_active());
    assert!(matches!(
        default.add_property(properties::NAME),
        Err(AutomationError::InStateViolation(_))
    ));
    assert!(matches!(
        default.set_tree_scope(TreeScope::CHILDREN),
        Err(AutomationError::InStateViolation(_))
    ));
    assert_eq!(default.tree_scope(), TreeScope::ELEMENT);
    assert_eq!(default.tree_filter(), Condition::control_view());
    assert_eq!(default.properties(), vec![properties::RUNTIME_ID]);
}

#[test]
fn adding_twice_is_the_same_as_adding_once() {
    let once = CacheRequest::new();
    once.add_property(properties::NAME).unwrap();
    once.add_pattern(patterns::VALUE).unwrap();

    let twice = CacheRequest::new();
    for _ in 0..2 {
        twice.add_property(properties::NAME).unwrap();
        twice.add_pattern(patterns::VALUE).unwrap();
    }

    assert_eq!(once.properties(), twice.properties());
    assert_eq!(once.patterns(), twice.patterns());
}

#[test]
fn snapshot_is_reused_until_the_request_changes() {
    let request = CacheRequest::new();
    request.add_property(properties::NAME).unwrap();

    let first = request.snapshot();
    let second = request.snapshot();
    assert!(Arc::ptr_eq(&first, &second));

    // No-op writes keep the snapshot.
    request.add_property(properties::NAME).unwrap();
    request.set_tree_scope(TreeScope::ELEMENT).unwrap();
    assert!(Arc::ptr_eq(&first, &request.snapshot()));

    request.add_property(properties::CLASS_NAME).unwrap();
    let third = request.snapshot();
    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.has_property(properties::CLASS_NAME));
    assert!(!first.has_property(properties::CLASS_NAME));
}

#[test]
fn snapshot_slots_follow_insertion_order() {
    let request = CacheRequest::new();
    request.add_property(properties::NAME).unwrap();
    request.add_property(properties::AUTOMATION_ID).unwrap();
    request.add_pattern(patterns::TOGGLE).unwrap();

    let snapshot = request.snapshot();
    assert_eq!(snapshot.property_index(properties::RUNTIME_ID), Some(0));
    assert_eq!(snapshot.property_index(properties::NAME), Some(1));
    assert_eq!(snapshot.property_index(properties::AUTOMATION_ID), Some(2));
    assert_eq!(snapshot.property_index(properties::CLASS_NAME), None);
    assert_eq!(snapshot.pattern_index(patterns::TOGGLE), Some(0));
    assert!(!snapshot.has_pattern(patterns::INVOKE));
}

#[test]
fn clone_copies_configuration_but_not_activation() {
    let original = CacheRequest::new();
    original.add_property(properties::NAME).unwrap();
    original.set_tree_scope(TreeScope::SUBTREE).unwrap();
    let _guard = original.activate();

    let copy = original.clone();
    assert!(!copy.is_same(&original));
    assert!(!copy.is_active());
    assert_eq!(copy.properties(), original.properties());
    assert_eq!(copy.tree_scope(), TreeScope::SUBTREE);

    copy.add_property(properties::CLASS_NAME).unwrap();
    assert!(!original.properties().contains(&properties::CLASS_NAME));
}

#[test]
fn clone_of_default_request_is_mutable() {
    let copy = CacheRequest::default_request().clone();
    assert!(!copy.is_default());
    copy.add_property(properties::NAME).unwrap();
}

proptest! {
    #[test]
    fn scope_is_accepted_exactly_when_non_empty_and_within_subtree(bits in 0u32..64) {
        let request = CacheRequest::new();
        let result = request.set_tree_scope(TreeScope::from_bits(bits));
        let valid = bits != 0 && bits & !TreeScope::SUBTREE.bits() == 0;
        if valid {
            prop_assert!(result.is_ok());
            prop_assert_eq!(request.tree_scope().bits(), bits);
        } else {
            prop_assert!(matches!(result, Err(AutomationError::InvalidScope(_))));
            prop_assert_eq!(request.tree_scope(), TreeScope::ELEMENT);
        }
    }

    #[test]
    fn requested_properties_never_repeat(picks in proptest::collection::vec(0usize..properties::ALL.len(), 0..40)) {
        let request = CacheRequest::new();
        for i in &picks {
            request.add_property(properties::ALL[*i]).unwrap();
        }
        let requested = request.properties();
        let mut ids: Vec<i32> = requested.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), requested.len());
        prop_assert_eq!(requested[0], properties::RUNTIME_ID);
        for i in &picks {
            prop_assert!(request.snapshot().has_property(properties::ALL[*i]));
        }
    }

    #[test]
    fn mutation_fails_while_pushed_for_any_push_depth(depth in 1usize..5) {
        let request = CacheRequest::new();
        for _ in 0..depth {
            request.push();
        }
        prop_assert_eq!(request.activation_count(), depth);
        prop_assert!(matches!(
            request.add_property(properties::NAME),
            Err(AutomationError::InStateViolation(_))
        ));
        for _ in 0..depth {
            request.pop().unwrap();
        }
        prop_assert!(request.add_property(properties::NAME).is_ok());
    }
}
