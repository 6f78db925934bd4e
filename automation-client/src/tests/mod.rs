mod activation_stack_tests;
mod cache_request_tests;
mod tree_walker_tests;

use crate::platforms::memory::{InMemoryProvider, MemoryNode};
use crate::types::{control_types, patterns, properties, Rect};
use crate::Automation;
use std::sync::Arc;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

/// Desktop with one editor window:
///
/// ```text
/// Desktop [1]
/// └── Untitled - Notepad [3.152.7]          (Window)
///     ├── Text Editor [3.152.8]              (Edit, Value)
///     ├── <layout pane> [3.152.9]            (not a control element)
///     │   └── OK [3.152.10]                  (Button, Invoke)
///     └── Application [3.152.11]             (Menu, offscreen)
/// ```
pub fn sample_tree() -> MemoryNode {
    MemoryNode::new()
        .with_runtime_id(vec![1])
        .with_property(properties::NAME, "Desktop")
        .with_property(properties::CONTROL_TYPE, control_types::PANE)
        .with_child(
            MemoryNode::new()
                .with_runtime_id(vec![3, 152, 7])
                .with_property(properties::NAME, "Untitled - Notepad")
                .with_property(properties::CONTROL_TYPE, control_types::WINDOW)
                .with_property(properties::CLASS_NAME, "Notepad")
                .with_property(
                    properties::BOUNDING_RECTANGLE,
                    Rect::new(100.0, 100.0, 800.0, 600.0),
                )
                .with_pattern(patterns::WINDOW)
                .with_child(
                    MemoryNode::new()
                        .with_runtime_id(vec![3, 152, 8])
                        .with_property(properties::NAME, "Text Editor")
                        .with_property(properties::CONTROL_TYPE, control_types::EDIT)
                        .with_property(properties::VALUE_VALUE, "hello")
                        .with_property(properties::HAS_KEYBOARD_FOCUS, true)
                        .with_pattern(patterns::VALUE),
                )
                .with_child(
                    MemoryNode::new()
                        .with_runtime_id(vec![3, 152, 9])
                        .with_property(properties::IS_CONTROL_ELEMENT, false)
                        .with_child(
                            MemoryNode::new()
                                .with_runtime_id(vec![3, 152, 10])
                                .with_property(properties::NAME, "OK")
                                .with_property(properties::CONTROL_TYPE, control_types::BUTTON)
                                .with_pattern(patterns::INVOKE),
                        ),
                )
                .with_child(
                    MemoryNode::new()
                        .with_runtime_id(vec![3, 152, 11])
                        .with_property(properties::NAME, "Application")
                        .with_property(properties::CONTROL_TYPE, control_types::MENU)
                        .with_property(properties::IS_OFFSCREEN, true),
                ),
        )
}

pub fn sample_provider() -> Arc<InMemoryProvider> {
    Arc::new(InMemoryProvider::new(&sample_tree()).expect("sample tree is valid"))
}

pub fn sample_automation() -> (Automation, Arc<InMemoryProvider>) {
    let provider = sample_provider();
    (Automation::new(provider.clone()), provider)
}
