//! Cache requests: which properties, patterns and structural links to fetch
//! alongside an element, and from which part of the tree.
//!
//! A [`CacheRequest`] is a mutable builder. Activating it pushes it onto the
//! calling thread's activation stack and freezes its configuration into an
//! immutable [`CacheSnapshot`]; while any thread holds it active, every
//! mutation is rejected. Retrieval calls take the snapshot explicitly, and
//! [`CacheRequest::current`] resolves the snapshot for the calling thread
//! when the caller prefers the implicit form.

use crate::condition::Condition;
use crate::errors::AutomationError;
use crate::types::{
    properties, AutomationElementMode, AutomationPattern, AutomationProperty, TreeScope,
};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

static DEFAULT_REQUEST: Lazy<Arc<RequestInner>> =
    Lazy::new(|| Arc::new(RequestInner::new(RequestConfig::default(), true)));

thread_local! {
    static ACTIVE_REQUESTS: RefCell<Vec<Arc<RequestInner>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone)]
struct RequestConfig {
    filter: Condition,
    scope: TreeScope,
    properties: Vec<AutomationProperty>,
    patterns: Vec<AutomationPattern>,
    mode: AutomationElementMode,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            filter: Condition::control_view(),
            scope: TreeScope::ELEMENT,
            // The runtime id is always fetched and always sits at slot 0.
            properties: vec![properties::RUNTIME_ID],
            patterns: Vec::new(),
            mode: AutomationElementMode::Full,
        }
    }
}

struct RequestState {
    config: RequestConfig,
    snapshot: Option<Arc<CacheSnapshot>>,
    activation_count: usize,
}

struct RequestInner {
    id: u64,
    /// Set on the process-wide default, which is never mutable.
    permanent: bool,
    state: Mutex<RequestState>,
}

impl RequestInner {
    fn new(config: RequestConfig, permanent: bool) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            permanent,
            state: Mutex::new(RequestState {
                config,
                snapshot: None,
                activation_count: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_locked(&self, state: &mut RequestState) -> Arc<CacheSnapshot> {
        if let Some(snapshot) = &state.snapshot {
            return snapshot.clone();
        }
        let snapshot = Arc::new(CacheSnapshot::from_config(&state.config));
        trace!(request = self.id, "froze cache request");
        state.snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Lock the state for a write, rejecting the write if the request is live.
    fn mutable_state(&self, operation: &str) -> Result<MutexGuard<'_, RequestState>, AutomationError> {
        if self.permanent {
            return Err(AutomationError::InStateViolation(format!(
                "{operation}: the default cache request cannot be modified"
            )));
        }
        let state = self.state();
        if state.activation_count > 0 {
            return Err(AutomationError::InStateViolation(format!(
                "{operation}: cache request is active ({} activations)",
                state.activation_count
            )));
        }
        Ok(state)
    }
}

/// Mutable description of what to prefetch when elements are retrieved.
///
/// `Clone` produces an independent, inactive request with the same
/// configuration. To share one request between threads, wrap it in an `Arc`.
pub struct CacheRequest {
    inner: Arc<RequestInner>,
}

impl CacheRequest {
    /// A request for the element itself in the control view, fetching only
    /// the runtime id.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RequestInner::new(RequestConfig::default(), false)),
        }
    }

    /// The process-wide request used when a thread has nothing pushed.
    ///
    /// It has the configuration of [`CacheRequest::new`] and rejects every
    /// mutation.
    pub fn default_request() -> Self {
        Self {
            inner: DEFAULT_REQUEST.clone(),
        }
    }

    /// The request on top of the calling thread's stack, or the default.
    pub fn current() -> Self {
        let top = ACTIVE_REQUESTS.with(|stack| stack.borrow().last().cloned());
        Self {
            inner: top.unwrap_or_else(|| DEFAULT_REQUEST.clone()),
        }
    }

    /// Snapshot of [`CacheRequest::current`].
    pub fn current_snapshot() -> Arc<CacheSnapshot> {
        Self::current().snapshot()
    }

    /// Number of requests pushed on the calling thread.
    pub fn stack_depth() -> usize {
        ACTIVE_REQUESTS.with(|stack| stack.borrow().len())
    }

    /// True when both handles refer to the same request.
    pub fn is_same(&self, other: &CacheRequest) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_default(&self) -> bool {
        self.inner.permanent
    }

    pub fn tree_scope(&self) -> TreeScope {
        self.inner.state().config.scope
    }

    /// Set the scope; only `ELEMENT`, `CHILDREN` and `DESCENDANTS` may be combined.
    pub fn set_tree_scope(&self, scope: TreeScope) -> Result<(), AutomationError> {
        if scope.is_empty() {
            return Err(AutomationError::InvalidScope(
                "scope must not be empty".to_string(),
            ));
        }
        if scope.bits() & !TreeScope::SUBTREE.bits() != 0 {
            return Err(AutomationError::InvalidScope(format!(
                "{scope:?} is not allowed; only Element, Children and Descendants may be cached"
            )));
        }
        let mut state = self.inner.mutable_state("set_tree_scope")?;
        if state.config.scope != scope {
            state.config.scope = scope;
            state.snapshot = None;
        }
        Ok(())
    }

    pub fn tree_filter(&self) -> Condition {
        self.inner.state().config.filter.clone()
    }

    pub fn set_tree_filter(&self, filter: impl Into<Option<Condition>>) -> Result<(), AutomationError> {
        let filter = filter
            .into()
            .ok_or_else(|| AutomationError::NullArgument("tree filter".to_string()))?;
        let mut state = self.inner.mutable_state("set_tree_filter")?;
        if state.config.filter != filter {
            state.config.filter = filter;
            state.snapshot = None;
        }
        Ok(())
    }

    pub fn automation_element_mode(&self) -> AutomationElementMode {
        self.inner.state().config.mode
    }

    pub fn set_automation_element_mode(
        &self,
        mode: AutomationElementMode,
    ) -> Result<(), AutomationError> {
        let mut state = self.inner.mutable_state("set_automation_element_mode")?;
        if state.config.mode != mode {
            state.config.mode = mode;
            state.snapshot = None;
        }
        Ok(())
    }

    pub fn properties(&self) -> Vec<AutomationProperty> {
        self.inner.state().config.properties.clone()
    }

    pub fn patterns(&self) -> Vec<AutomationPattern> {
        self.inner.state().config.patterns.clone()
    }

    /// Request `property`. Adding a property twice is a no-op.
    pub fn add_property(&self, property: AutomationProperty) -> Result<(), AutomationError> {
        let mut state = self.inner.mutable_state("add_property")?;
        if !state.config.properties.contains(&property) {
            state.config.properties.push(property);
            state.snapshot = None;
        }
        Ok(())
    }

    /// Request `pattern`. Adding a pattern twice is a no-op.
    pub fn add_pattern(&self, pattern: AutomationPattern) -> Result<(), AutomationError> {
        let mut state = self.inner.mutable_state("add_pattern")?;
        if !state.config.patterns.contains(&pattern) {
            state.config.patterns.push(pattern);
            state.snapshot = None;
        }
        Ok(())
    }

    /// Number of outstanding pushes, across all threads.
    pub fn activation_count(&self) -> usize {
        self.inner.state().activation_count
    }

    pub fn is_active(&self) -> bool {
        self.inner.permanent || self.activation_count() > 0
    }

    /// Freeze the current configuration.
    ///
    /// Returns the same `Arc` on every call until the request is modified.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        let mut state = self.inner.state();
        self.inner.snapshot_locked(&mut state)
    }

    /// Push onto the calling thread's stack, making this the current request.
    ///
    /// A request may be pushed several times, on one or many threads.
    pub fn push(&self) {
        {
            let mut state = self.inner.state();
            state.activation_count += 1;
            self.inner.snapshot_locked(&mut state);
        }
        let depth = ACTIVE_REQUESTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(self.inner.clone());
            stack.len()
        });
        debug!(request = self.inner.id, depth, "pushed cache request");
    }

    /// Pop this request off the calling thread's stack.
    ///
    /// Fails with `InStateViolation` unless it is the top of the stack.
    pub fn pop(&self) -> Result<(), AutomationError> {
        pop_request(&self.inner)
    }

    /// Push and return a guard that pops on drop.
    #[must_use = "the request is popped as soon as the guard is dropped"]
    pub fn activate(&self) -> ActivationGuard {
        self.push();
        ActivationGuard {
            inner: Some(self.inner.clone()),
            _not_send: PhantomData,
        }
    }
}

fn pop_request(inner: &Arc<RequestInner>) -> Result<(), AutomationError> {
    let depth = ACTIVE_REQUESTS.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.last() {
            Some(top) if Arc::ptr_eq(top, inner) => {
                stack.pop();
                Ok(stack.len())
            }
            Some(top) => Err(AutomationError::InStateViolation(format!(
                "cannot pop cache request {}: request {} is on top of the stack",
                inner.id, top.id
            ))),
            None => Err(AutomationError::InStateViolation(format!(
                "cannot pop cache request {}: no request is pushed on this thread",
                inner.id
            ))),
        }
    })?;
    {
        let mut state = inner.state();
        state.activation_count = state.activation_count.saturating_sub(1);
    }
    debug!(request = inner.id, depth, "popped cache request");
    Ok(())
}

impl Default for CacheRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CacheRequest {
    fn clone(&self) -> Self {
        let config = self.inner.state().config.clone();
        Self {
            inner: Arc::new(RequestInner::new(config, false)),
        }
    }
}

impl fmt::Debug for CacheRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("CacheRequest")
            .field("id", &self.inner.id)
            .field("default", &self.inner.permanent)
            .field("scope", &state.config.scope)
            .field("filter", &state.config.filter)
            .field("properties", &state.config.properties)
            .field("patterns", &state.config.patterns)
            .field("mode", &state.config.mode)
            .field("activation_count", &state.activation_count)
            .finish()
    }
}

/// Keeps a request pushed on the current thread until dropped.
pub struct ActivationGuard {
    inner: Option<Arc<RequestInner>>,
    // The stack is per-thread; the guard must be dropped where it was made.
    _not_send: PhantomData<*const ()>,
}

impl ActivationGuard {
    /// Pop now, reporting a nesting violation instead of logging it.
    pub fn release(mut self) -> Result<(), AutomationError> {
        match self.inner.take() {
            Some(inner) => pop_request(&inner),
            None => Ok(()),
        }
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(e) = pop_request(&inner) {
                warn!("Failed to deactivate cache request on drop: {}", e);
            }
        }
    }
}

/// Frozen configuration of a [`CacheRequest`].
///
/// Property and pattern positions are stable and index the value tables of
/// every element fetched with this snapshot.
#[derive(Debug)]
pub struct CacheSnapshot {
    filter: Condition,
    scope: TreeScope,
    properties: Vec<AutomationProperty>,
    patterns: Vec<AutomationPattern>,
    mode: AutomationElementMode,
    property_slots: HashMap<i32, usize>,
    pattern_slots: HashMap<i32, usize>,
}

impl CacheSnapshot {
    fn from_config(config: &RequestConfig) -> Self {
        let property_slots = config
            .properties
            .iter()
            .enumerate()
            .map(|(slot, p)| (p.id, slot))
            .collect();
        let pattern_slots = config
            .patterns
            .iter()
            .enumerate()
            .map(|(slot, p)| (p.id, slot))
            .collect();
        Self {
            filter: config.filter.clone(),
            scope: config.scope,
            properties: config.properties.clone(),
            patterns: config.patterns.clone(),
            mode: config.mode,
            property_slots,
            pattern_slots,
        }
    }

    pub fn tree_filter(&self) -> &Condition {
        &self.filter
    }

    pub fn tree_scope(&self) -> TreeScope {
        self.scope
    }

    pub fn properties(&self) -> &[AutomationProperty] {
        &self.properties
    }

    pub fn patterns(&self) -> &[AutomationPattern] {
        &self.patterns
    }

    pub fn automation_element_mode(&self) -> AutomationElementMode {
        self.mode
    }

    pub fn property_index(&self, property: AutomationProperty) -> Option<usize> {
        self.property_slots.get(&property.id).copied()
    }

    pub fn pattern_index(&self, pattern: AutomationPattern) -> Option<usize> {
        self.pattern_slots.get(&pattern.id).copied()
    }

    pub fn has_property(&self, property: AutomationProperty) -> bool {
        self.property_slots.contains_key(&property.id)
    }

    pub fn has_pattern(&self, pattern: AutomationPattern) -> bool {
        self.pattern_slots.contains_key(&pattern.id)
    }
}
