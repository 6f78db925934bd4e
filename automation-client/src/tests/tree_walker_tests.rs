use super::sample_automation;
use crate::cache_request::CacheRequest;
use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::platforms::memory::{InMemoryProvider, MemoryNode};
use crate::types::{properties, RuntimeId, TreeScope};
use crate::Automation;
use std::sync::Arc;

fn names_request() -> CacheRequest {
    let request = CacheRequest::new();
    request.add_property(properties::NAME).unwrap();
    request
}

#[test]
fn control_view_skips_layout_nodes() {
    let (automation, _provider) = sample_automation();
    let snapshot = names_request().snapshot();
    let walker = automation.control_view_walker();

    let root = automation.root_element_build_cache(&snapshot).unwrap();
    let window = walker.get_first_child(&root, &snapshot).unwrap().unwrap();
    assert_eq!(window.cached().name().unwrap(), "Untitled - Notepad");

    let edit = walker.get_first_child(&window, &snapshot).unwrap().unwrap();
    let ok = walker.get_next_sibling(&edit, &snapshot).unwrap().unwrap();
    assert_eq!(ok.cached().name().unwrap(), "OK");
    let menu = walker.get_next_sibling(&ok, &snapshot).unwrap().unwrap();
    assert_eq!(menu.cached().name().unwrap(), "Application");
    assert!(walker.get_next_sibling(&menu, &snapshot).unwrap().is_none());

    assert_eq!(walker.get_previous_sibling(&ok, &snapshot).unwrap().unwrap(), edit);
    assert_eq!(walker.get_parent(&ok, &snapshot).unwrap().unwrap(), window);
    assert_eq!(walker.get_last_child(&window, &snapshot).unwrap().unwrap(), menu);
    assert!(walker.get_parent(&root, &snapshot).unwrap().is_none());
}

#[test]
fn raw_view_sees_every_node() {
    let (automation, _provider) = sample_automation();
    let snapshot = names_request().snapshot();
    let walker = automation.raw_view_walker();
    assert_eq!(walker.condition(), &Condition::True);

    let root = automation.root_element_build_cache(&snapshot).unwrap();
    let window = walker.get_first_child(&root, &snapshot).unwrap().unwrap();
    let edit = walker.get_first_child(&window, &snapshot).unwrap().unwrap();
    let pane = walker.get_next_sibling(&edit, &snapshot).unwrap().unwrap();
    assert_eq!(pane.runtime_id().unwrap(), RuntimeId::new(vec![3, 152, 9]));

    let ok = walker.get_first_child(&pane, &snapshot).unwrap().unwrap();
    assert_eq!(walker.get_parent(&ok, &snapshot).unwrap().unwrap(), pane);
    assert!(walker.get_previous_sibling(&edit, &snapshot).unwrap().is_none());
}

#[test]
fn custom_condition_walks_matching_nodes_only() {
    let (automation, _provider) = sample_automation();
    let snapshot = names_request().snapshot();
    let walker = automation.create_tree_walker(
        Condition::and(vec![
            Condition::control_view(),
            Condition::not(Condition::property(properties::IS_OFFSCREEN, true).unwrap()),
        ])
        .unwrap(),
    );

    let root = automation.root_element_build_cache(&snapshot).unwrap();
    let window = walker.get_first_child(&root, &snapshot).unwrap().unwrap();
    let last = walker.get_last_child(&window, &snapshot).unwrap().unwrap();
    assert_eq!(last.cached().name().unwrap(), "OK");
}

#[test]
fn navigation_result_carries_the_supplied_request() {
    let (automation, _provider) = sample_automation();
    let walker = automation.control_view_walker();
    let root = automation.root_element().unwrap();

    let subtree = names_request();
    subtree.set_tree_scope(TreeScope::SUBTREE).unwrap();
    let snapshot = subtree.snapshot();
    let window = walker.get_first_child(&root, &snapshot).unwrap().unwrap();
    assert!(Arc::ptr_eq(window.cache_request(), &snapshot));
    assert_eq!(window.cached_children().unwrap().len(), 3);

    // Without an explicit request the default only caches the runtime id.
    let plain = walker.get_first_child_cached_by_current(&root).unwrap().unwrap();
    assert_eq!(plain, window);
    assert!(matches!(
        plain.cached().name(),
        Err(AutomationError::NotInCache(_))
    ));
}

#[test]
fn cached_by_current_follows_the_activation_stack() {
    let (automation, _provider) = sample_automation();
    let walker = automation.control_view_walker();
    let root = automation.root_element().unwrap();

    let request = names_request();
    let _guard = request.activate();
    let window = walker.get_first_child_cached_by_current(&root).unwrap().unwrap();
    assert_eq!(window.cached().name().unwrap(), "Untitled - Notepad");

    let edit = walker.get_first_child_cached_by_current(&window).unwrap().unwrap();
    let ok = walker.get_next_sibling_cached_by_current(&edit).unwrap().unwrap();
    assert_eq!(ok.cached().name().unwrap(), "OK");
    assert_eq!(
        walker.get_previous_sibling_cached_by_current(&ok).unwrap().unwrap(),
        edit
    );
    assert_eq!(walker.get_parent_cached_by_current(&ok).unwrap().unwrap(), window);
    assert_eq!(
        walker
            .get_last_child_cached_by_current(&window)
            .unwrap()
            .unwrap()
            .cached()
            .name()
            .unwrap(),
        "Application"
    );
}

#[test]
fn navigating_from_a_removed_node_fails() {
    let (automation, provider) = sample_automation();
    let snapshot = names_request().snapshot();
    let walker = automation.control_view_walker();
    let root = automation.root_element_build_cache(&snapshot).unwrap();
    let window = walker.get_first_child(&root, &snapshot).unwrap().unwrap();

    provider.remove_node(&RuntimeId::new(vec![3, 152, 7])).unwrap();
    assert!(matches!(
        walker.get_first_child(&window, &snapshot),
        Err(AutomationError::ElementNotAvailable(_))
    ));
    assert!(walker.get_first_child(&root, &snapshot).unwrap().is_none());
}

#[test]
fn walker_rejects_elements_from_another_provider() {
    let other_tree = MemoryNode::new()
        .with_property(properties::NAME, "Other desktop")
        .with_child(MemoryNode::new().with_property(properties::NAME, "Other window"));
    let other = Automation::new(Arc::new(InMemoryProvider::new(&other_tree).unwrap()));
    let (automation, _provider) = sample_automation();
    let snapshot = names_request().snapshot();

    // Handle numbers overlap between the two providers.
    let _ours = automation.root_element_build_cache(&snapshot).unwrap();
    let theirs = other.root_element_build_cache(&snapshot).unwrap();

    let walker = automation.raw_view_walker();
    assert!(matches!(
        walker.get_first_child(&theirs, &snapshot),
        Err(AutomationError::InvalidArgument(_))
    ));
    let child = other
        .raw_view_walker()
        .get_first_child(&theirs, &snapshot)
        .unwrap()
        .unwrap();
    assert_eq!(child.cached().name().unwrap(), "Other window");
}
