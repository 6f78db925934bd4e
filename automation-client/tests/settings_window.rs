use anyhow::Result;
use automation_client::platforms::memory::InMemoryProvider;
use automation_client::{
    patterns, properties, Automation, AutomationElementMode, AutomationError, CacheRequest,
    Condition, PropertyValue, Rect, RuntimeId, TreeDumpConfig, TreeScope,
};
use std::sync::Arc;

fn settings() -> Result<(Automation, Arc<InMemoryProvider>)> {
    let json = include_str!("fixtures/settings.json");
    let provider = Arc::new(InMemoryProvider::from_json(json)?);
    Ok((Automation::new(provider.clone()), provider))
}

#[test]
fn prefetch_window_subtree_in_one_round_trip() -> Result<()> {
    let (automation, _provider) = settings()?;

    let request = CacheRequest::new();
    request.add_property(properties::NAME)?;
    request.add_property(properties::AUTOMATION_ID)?;
    request.add_property(properties::IS_ENABLED)?;
    request.add_pattern(patterns::INVOKE)?;
    request.set_tree_scope(TreeScope::SUBTREE)?;
    let snapshot = request.snapshot();

    let window = automation
        .root_element_build_cache(&snapshot)?
        .find_first(
            TreeScope::CHILDREN,
            &Condition::property(properties::NAME, "Settings")?,
            &snapshot,
        )?
        .expect("settings window");

    let controls = window.cached_children()?;
    let ids: Vec<String> = controls
        .iter()
        .map(|c| c.cached().automation_id())
        .collect::<Result<_, _>>()?;
    assert_eq!(ids, ["darkModeToggle", "fontSize", "applyButton"]);

    let apply = &controls[2];
    assert!(!apply.cached().is_enabled()?);
    assert!(apply.get_cached_pattern(patterns::INVOKE)?.is_cached());
    assert!(matches!(
        controls[0].get_cached_pattern(patterns::INVOKE),
        Err(AutomationError::PatternNotSupported(_))
    ));
    assert!(matches!(
        apply.cached().class_name(),
        Err(AutomationError::NotInCache(_))
    ));
    Ok(())
}

#[test]
fn content_view_drops_non_content_nodes() -> Result<()> {
    let (automation, _provider) = settings()?;
    let request = CacheRequest::new();
    request.set_tree_filter(Condition::content_view())?;
    request.set_tree_scope(TreeScope::ELEMENT | TreeScope::DESCENDANTS)?;

    let root = automation.root_element_build_cache(&request.snapshot())?;
    let node = root.to_node(&TreeDumpConfig::default());
    let window = &node.children.as_ref().expect("children cached")[0];
    let ids: Vec<RuntimeId> = window
        .children
        .as_ref()
        .expect("grandchildren cached")
        .iter()
        .filter_map(|c| c.runtime_id.clone())
        .collect();
    assert_eq!(
        ids,
        vec![
            RuntimeId::new(vec![42, 2041, 2]),
            RuntimeId::new(vec![42, 2041, 4]),
            RuntimeId::new(vec![42, 2041, 5]),
        ]
    );
    Ok(())
}

#[test]
fn activated_request_drives_implicit_retrieval() -> Result<()> {
    let (automation, provider) = settings()?;

    let request = CacheRequest::new();
    request.add_property(properties::VALUE_VALUE)?;
    request.add_property(properties::BOUNDING_RECTANGLE)?;
    let guard = request.activate();
    assert!(CacheRequest::current().is_same(&request));

    let focused = automation.focused_element()?;
    assert_eq!(focused.runtime_id()?, RuntimeId::new(vec![42, 2041, 4]));
    assert_eq!(
        focused.get_cached_property_value(properties::VALUE_VALUE)?,
        PropertyValue::String("12".to_string())
    );
    assert_eq!(focused.cached().bounding_rectangle()?, Rect::default());

    provider.set_property(&focused.runtime_id()?, properties::VALUE_VALUE, "14")?;
    assert_eq!(
        focused.get_cached_property_value(properties::VALUE_VALUE)?,
        PropertyValue::String("12".to_string())
    );
    let updated = focused.refresh()?;
    assert_eq!(
        updated.get_cached_property_value(properties::VALUE_VALUE)?,
        PropertyValue::String("14".to_string())
    );

    guard.release()?;
    assert!(CacheRequest::current().is_default());
    request.add_property(properties::NAME)?;
    Ok(())
}

#[test]
fn snapshot_only_capture_outlives_the_live_tree() -> Result<()> {
    let (automation, provider) = settings()?;
    let request = CacheRequest::new();
    request.add_property(properties::NAME)?;
    request.set_tree_scope(TreeScope::SUBTREE)?;
    request.set_automation_element_mode(AutomationElementMode::None)?;

    let root = automation.root_element_build_cache(&request.snapshot())?;
    assert_eq!(provider.outstanding_handles(), 0);

    provider.remove_node(&RuntimeId::new(vec![42, 2041, 1]))?;
    let window = root.cached_first_child()?.expect("window cached");
    assert_eq!(window.cached().name()?, "Settings");
    assert!(matches!(
        window.current(),
        Err(AutomationError::UnsupportedOperation(_))
    ));

    let json = root.to_node(&TreeDumpConfig::default()).to_json()?;
    assert!(json.contains("Dark mode"));
    Ok(())
}

#[test]
fn released_handles_return_to_zero() -> Result<()> {
    let (automation, provider) = settings()?;
    let request = CacheRequest::new();
    request.add_pattern(patterns::TOGGLE)?;
    request.set_tree_scope(TreeScope::SUBTREE)?;
    request.set_tree_filter(Condition::raw_view())?;
    {
        let root = automation.root_element_build_cache(&request.snapshot())?;
        let found = root.find_all(
            TreeScope::DESCENDANTS,
            &Condition::property(properties::CONTROL_TYPE, 50002)?,
            &request.snapshot(),
        )?;
        assert_eq!(found.len(), 1);
        assert!(provider.outstanding_handles() > 0);
    }
    assert_eq!(provider.outstanding_handles(), 0);
    Ok(())
}
