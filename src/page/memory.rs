//! In-memory host page.
//!
//! Backs headless embeds and the test suite. Nodes, scripts, surfaces, and
//! mounted widgets are plain records in a mutex-guarded map; test drivers can
//! emit pointer events, click surfaces, and fire widget callbacks to exercise
//! the full lifecycle without a browser.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::providers::{ChallengeRelay, ProviderError, ProviderKind, WidgetId, WidgetParams};

use super::{
    HostPage, ListenerId, ObserverId, PointerEvent, PointerListener, ScriptLoadError, Surface,
};

#[derive(Debug, Clone)]
struct NodeRecord {
    parent: Option<String>,
    classes: Vec<String>,
    decoy: bool,
    hidden: bool,
}

struct MountedSurface {
    surface: Surface,
    on_click: Option<PointerListener>,
}

struct MountedWidget {
    provider: ProviderKind,
    container: String,
    params: WidgetParams,
    relay: Arc<dyn ChallengeRelay>,
    reset_count: u32,
}

#[derive(Default)]
struct PageState {
    scripts: HashSet<String>,
    failing_scripts: HashSet<String>,
    nodes: HashMap<String, NodeRecord>,
    children: HashMap<String, Vec<String>>,
    surfaces: HashMap<String, MountedSurface>,
    pointer_listeners: HashMap<u64, PointerListener>,
    observers: HashMap<u64, String>,
    widgets: HashMap<u64, MountedWidget>,
    styles: HashSet<String>,
    body_markup: Option<String>,
    denial_reason: Option<String>,
    navigated_to: Option<String>,
    fail_widget_mounts: bool,
    fail_widget_resets: bool,
}

/// A scriptable page held entirely in memory.
pub struct MemoryPage {
    hostname: String,
    state: Mutex<PageState>,
    next_id: AtomicU64,
}

impl MemoryPage {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            state: Mutex::new(PageState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn selector_matches(selector: &str, record: &NodeRecord) -> bool {
        match selector.strip_prefix('.') {
            Some(class) => record.classes.iter().any(|c| c == class),
            None => false,
        }
    }

    fn insert_node(&self, state: &mut PageState, parent: Option<&str>, id: &str, record: NodeRecord) {
        let mut record = record;
        if state
            .observers
            .values()
            .any(|selector| Self::selector_matches(selector, &record))
        {
            record.hidden = true;
        }
        state.nodes.insert(id.to_string(), record);
        if let Some(parent) = parent {
            state
                .children
                .entry(parent.to_string())
                .or_default()
                .push(id.to_string());
        }
    }

    // ---- test / host drivers -------------------------------------------

    /// Add a plain element with CSS classes, the way page markup would.
    pub fn add_element(&self, parent: Option<&str>, id: &str, classes: &[&str]) {
        let mut state = self.lock();
        let record = NodeRecord {
            parent: parent.map(str::to_string),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            decoy: false,
            hidden: false,
        };
        self.insert_node(&mut state, parent, id, record);
    }

    /// Make future loads of `url` fail.
    pub fn fail_script(&self, url: &str) {
        self.lock().failing_scripts.insert(url.to_string());
    }

    /// Make future widget mounts throw, as a broken vendor library would.
    pub fn fail_widget_mounts(&self) {
        self.lock().fail_widget_mounts = true;
    }

    pub fn fail_widget_resets(&self) {
        self.lock().fail_widget_resets = true;
    }

    /// Deliver a pointer-move to every registered listener.
    pub fn emit_pointer_move(&self, event: PointerEvent) {
        let listeners: Vec<PointerListener> =
            self.lock().pointer_listeners.values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Click a mounted surface node.
    pub fn click(&self, node_id: &str, event: PointerEvent) {
        let handler = self
            .lock()
            .surfaces
            .get(node_id)
            .and_then(|mounted| mounted.on_click.clone());
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Fire the provider success callback for a mounted widget.
    pub fn emit_widget_token(&self, widget: WidgetId, token: &str) {
        let relay = self.lock().widgets.get(&widget.0).map(|w| w.relay.clone());
        if let Some(relay) = relay {
            relay.on_token(token);
        }
    }

    pub fn emit_widget_error(&self, widget: WidgetId, message: &str) {
        let relay = self.lock().widgets.get(&widget.0).map(|w| w.relay.clone());
        if let Some(relay) = relay {
            relay.on_error(message);
        }
    }

    pub fn emit_widget_expiry(&self, widget: WidgetId) {
        let relay = self.lock().widgets.get(&widget.0).map(|w| w.relay.clone());
        if let Some(relay) = relay {
            relay.on_expire();
        }
    }

    // ---- inspection ----------------------------------------------------

    pub fn script_urls(&self) -> Vec<String> {
        self.lock().scripts.iter().cloned().collect()
    }

    pub fn child_order(&self, parent: &str) -> Vec<String> {
        self.lock().children.get(parent).cloned().unwrap_or_default()
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        self.lock().nodes.get(id).is_some_and(|n| n.hidden)
    }

    pub fn is_decoy(&self, id: &str) -> bool {
        self.lock().nodes.get(id).is_some_and(|n| n.decoy)
    }

    pub fn node_exists(&self, id: &str) -> bool {
        self.lock().nodes.contains_key(id)
    }

    /// Node ids of surfaces of a given kind mounted under `container`.
    pub fn surfaces_in(&self, container: &str, label: &str) -> Vec<String> {
        let state = self.lock();
        let children = match state.children.get(container) {
            Some(children) => children.clone(),
            None => return Vec::new(),
        };
        children
            .into_iter()
            .filter(|id| {
                state
                    .surfaces
                    .get(id)
                    .is_some_and(|mounted| mounted.surface.label() == label)
            })
            .collect()
    }

    /// The most recently mounted widget, if any.
    pub fn last_widget(&self) -> Option<WidgetId> {
        self.lock().widgets.keys().max().copied().map(WidgetId)
    }

    pub fn widget_container(&self, widget: WidgetId) -> Option<String> {
        self.lock()
            .widgets
            .get(&widget.0)
            .map(|w| w.container.clone())
    }

    pub fn widget_site_key(&self, widget: WidgetId) -> Option<String> {
        self.lock()
            .widgets
            .get(&widget.0)
            .map(|w| w.params.site_key.clone())
    }

    pub fn widget_provider(&self, widget: WidgetId) -> Option<ProviderKind> {
        self.lock().widgets.get(&widget.0).map(|w| w.provider)
    }

    pub fn widget_reset_count(&self, widget: WidgetId) -> u32 {
        self.lock()
            .widgets
            .get(&widget.0)
            .map(|w| w.reset_count)
            .unwrap_or(0)
    }

    pub fn pointer_listener_count(&self) -> usize {
        self.lock().pointer_listeners.len()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn body_markup(&self) -> Option<String> {
        self.lock().body_markup.clone()
    }

    pub fn denial_reason(&self) -> Option<String> {
        self.lock().denial_reason.clone()
    }

    pub fn navigated_to(&self) -> Option<String> {
        self.lock().navigated_to.clone()
    }

    pub fn injected_styles(&self) -> Vec<String> {
        self.lock().styles.iter().cloned().collect()
    }
}

#[async_trait]
impl HostPage for MemoryPage {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn has_script(&self, url: &str) -> bool {
        self.lock().scripts.contains(url)
    }

    async fn load_script(&self, url: &str) -> Result<(), ScriptLoadError> {
        // Yield once so concurrent preloads interleave like real loads do.
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if state.failing_scripts.contains(url) {
            return Err(ScriptLoadError {
                url: url.to_string(),
                message: "script error".into(),
            });
        }
        state.scripts.insert(url.to_string());
        Ok(())
    }

    fn container_exists(&self, id: &str) -> bool {
        self.lock().nodes.contains_key(id)
    }

    fn create_container(&self, parent: &str, id: &str, decoy: bool) {
        let mut state = self.lock();
        let record = NodeRecord {
            parent: Some(parent.to_string()),
            classes: if decoy {
                vec!["botgate-container".into(), "botgate-decoy".into()]
            } else {
                vec!["botgate-container".into(), "botgate-real".into()]
            },
            decoy,
            hidden: false,
        };
        self.insert_node(&mut state, Some(parent), id, record);
    }

    fn reorder_children(&self, parent: &str, order: &[String]) {
        let mut state = self.lock();
        let children = state.children.entry(parent.to_string()).or_default();
        let mut reordered: Vec<String> = order
            .iter()
            .filter(|id| children.contains(id))
            .cloned()
            .collect();
        for id in children.iter() {
            if !reordered.contains(id) {
                reordered.push(id.clone());
            }
        }
        *children = reordered;
    }

    fn remove_node(&self, id: &str) {
        let mut state = self.lock();
        if let Some(record) = state.nodes.remove(id) {
            if let Some(parent) = record.parent
                && let Some(children) = state.children.get_mut(&parent)
            {
                children.retain(|c| c != id);
            }
        }
        state.children.remove(id);
        state.surfaces.remove(id);
    }

    fn clear_container(&self, id: &str) {
        let children = self.lock().children.get(id).cloned().unwrap_or_default();
        for child in children {
            self.remove_node(&child);
        }
    }

    fn mount_surface(
        &self,
        container: &str,
        surface: Surface,
        on_click: Option<PointerListener>,
    ) -> String {
        let node_id = format!("botgate-{}-{}", surface.label(), self.fresh_id());
        let mut state = self.lock();
        let record = NodeRecord {
            parent: Some(container.to_string()),
            classes: vec![format!("botgate-{}", surface.label())],
            decoy: false,
            hidden: false,
        };
        self.insert_node(&mut state, Some(container), &node_id, record);
        state
            .surfaces
            .insert(node_id.clone(), MountedSurface { surface, on_click });
        node_id
    }

    fn hide_matching(&self, selector: &str) -> ObserverId {
        let id = self.fresh_id();
        let mut state = self.lock();
        let matching: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, record)| Self::selector_matches(selector, record))
            .map(|(id, _)| id.clone())
            .collect();
        for node_id in matching {
            if let Some(record) = state.nodes.get_mut(&node_id) {
                record.hidden = true;
            }
        }
        state.observers.insert(id, selector.to_string());
        ObserverId(id)
    }

    fn disconnect(&self, observer: ObserverId) {
        self.lock().observers.remove(&observer.0);
    }

    fn add_pointer_listener(&self, listener: PointerListener) -> ListenerId {
        let id = self.fresh_id();
        self.lock().pointer_listeners.insert(id, listener);
        ListenerId(id)
    }

    fn remove_pointer_listener(&self, listener: ListenerId) {
        self.lock().pointer_listeners.remove(&listener.0);
    }

    fn navigate(&self, url: &str) {
        self.lock().navigated_to = Some(url.to_string());
    }

    fn replace_body(&self, markup: &str) {
        self.lock().body_markup = Some(markup.to_string());
    }

    fn show_denial(&self, reason: &str) {
        self.lock().denial_reason = Some(reason.to_string());
    }

    fn ensure_style(&self, key: &str) {
        self.lock().styles.insert(key.to_string());
    }

    fn mount_widget(
        &self,
        provider: ProviderKind,
        container: &str,
        params: &WidgetParams,
        relay: Arc<dyn ChallengeRelay>,
    ) -> Result<WidgetId, ProviderError> {
        let mut state = self.lock();
        if state.fail_widget_mounts {
            return Err(ProviderError::Runtime("widget render threw".into()));
        }
        let id = self.fresh_id();
        state.widgets.insert(
            id,
            MountedWidget {
                provider,
                container: container.to_string(),
                params: params.clone(),
                relay,
                reset_count: 0,
            },
        );
        Ok(WidgetId(id))
    }

    fn reset_widget(&self, _provider: ProviderKind, widget: WidgetId) -> Result<(), ProviderError> {
        let mut state = self.lock();
        if state.fail_widget_resets {
            return Err(ProviderError::Runtime("widget reset threw".into()));
        }
        match state.widgets.get_mut(&widget.0) {
            Some(mounted) => {
                mounted.reset_count += 1;
                Ok(())
            }
            None => Err(ProviderError::Runtime("unknown widget handle".into())),
        }
    }
}
