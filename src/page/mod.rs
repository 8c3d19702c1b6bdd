//! Host page seam.
//!
//! The gate never manipulates markup directly. Everything it needs from the
//! embedding page - containers, script tags, pointer events, widget mounts -
//! goes through the [`HostPage`] trait so the same orchestration code runs
//! against a real DOM bridge or the in-memory page used headlessly and in
//! tests.

pub mod memory;

pub use memory::MemoryPage;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::providers::{ChallengeRelay, ProviderKind, WidgetId, WidgetParams};

/// Pointer event delivered by the host page.
#[derive(Debug, Clone, Copy)]
pub struct PointerEvent {
    pub x: f64,
    pub y: f64,
    /// Milliseconds since an arbitrary page-local epoch.
    pub timestamp_ms: f64,
    /// Whether the host attests the event came from a real input device.
    pub trusted: bool,
}

impl PointerEvent {
    pub fn new(x: f64, y: f64, timestamp_ms: f64) -> Self {
        Self {
            x,
            y,
            timestamp_ms,
            trusted: true,
        }
    }

    pub fn untrusted(mut self) -> Self {
        self.trusted = false;
        self
    }
}

/// Content the gate asks the host page to present. How each surface looks is
/// entirely up to the host; the gate only decides what is visible when.
#[derive(Debug, Clone, PartialEq)]
pub enum Surface {
    /// Spinner shown while bootstrap or a widget mount is in flight.
    Loading,
    /// Hidden-mode affordance that reveals the real challenge on click.
    StartButton {
        text: String,
        emoji: String,
        color: String,
        animate_emoji: bool,
    },
    /// "Protected by" branding line.
    Branding,
    /// Prompt asking the visitor to move the pointer naturally and retry.
    RetryPrompt,
    /// Hard stop after repeated rejected clicks; only a reload helps.
    HardStop,
}

impl Surface {
    /// Stable label used for logging and node bookkeeping.
    pub fn label(&self) -> &'static str {
        match self {
            Surface::Loading => "loading",
            Surface::StartButton { .. } => "start-button",
            Surface::Branding => "branding",
            Surface::RetryPrompt => "retry-prompt",
            Surface::HardStop => "hard-stop",
        }
    }
}

/// Callback invoked with pointer events.
pub type PointerListener = Arc<dyn Fn(PointerEvent) + Send + Sync>;

/// Handle for a registered pointer listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle for a live element-hiding observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Raised when an async script tag fails to attach or load.
#[derive(Debug, Clone, Error)]
#[error("failed to load script {url}: {message}")]
pub struct ScriptLoadError {
    pub url: String,
    pub message: String,
}

/// Seam between the gate and whatever hosts it.
///
/// Implementations must be cheap to call from synchronous contexts; only
/// script loading suspends.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Hostname of the page currently embedding the gate.
    fn hostname(&self) -> String;

    /// `true` when a script with this URL is already attached to the page.
    fn has_script(&self, url: &str) -> bool;

    /// Attach an async script tag and resolve once it has loaded.
    async fn load_script(&self, url: &str) -> Result<(), ScriptLoadError>;

    fn container_exists(&self, id: &str) -> bool;

    /// Create an element under `parent`. Decoys are inert, visually
    /// collapsed, and hidden from assistive technology.
    fn create_container(&self, parent: &str, id: &str, decoy: bool);

    /// Re-append the children of `parent` in exactly this order.
    fn reorder_children(&self, parent: &str, order: &[String]);

    fn remove_node(&self, id: &str);

    /// Empty a container without removing it.
    fn clear_container(&self, id: &str);

    /// Present a surface inside `container`, wiring `on_click` when given.
    /// Returns the node id of the mounted surface.
    fn mount_surface(
        &self,
        container: &str,
        surface: Surface,
        on_click: Option<PointerListener>,
    ) -> String;

    /// Hide every current and future node matching `selector` until the
    /// returned observer is disconnected.
    fn hide_matching(&self, selector: &str) -> ObserverId;

    fn disconnect(&self, observer: ObserverId);

    fn add_pointer_listener(&self, listener: PointerListener) -> ListenerId;

    fn remove_pointer_listener(&self, listener: ListenerId);

    /// Navigate the page away to `url`.
    fn navigate(&self, url: &str);

    /// Replace the whole page body with inline fallback markup.
    fn replace_body(&self, markup: &str);

    /// Replace the whole page body with the built-in denial notice.
    fn show_denial(&self, reason: &str);

    /// Inject a keyed style/animation definition. Must be idempotent per key.
    fn ensure_style(&self, key: &str);

    /// Mount a provider widget into `container` with the provider's own
    /// library. Callbacks flow back through `relay`.
    fn mount_widget(
        &self,
        provider: ProviderKind,
        container: &str,
        params: &WidgetParams,
        relay: Arc<dyn ChallengeRelay>,
    ) -> Result<WidgetId, crate::providers::ProviderError>;

    fn reset_widget(
        &self,
        provider: ProviderKind,
        widget: WidgetId,
    ) -> Result<(), crate::providers::ProviderError>;
}

static REGISTERED_STYLES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Process-wide keyed style registration. Returns `true` the first time a key
/// is seen, so presentation assets are injected at most once per page no
/// matter how many gate instances exist.
pub fn register_style_once(key: &str) -> bool {
    let mut registered = match REGISTERED_STYLES.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registered.insert(key.to_string())
}
