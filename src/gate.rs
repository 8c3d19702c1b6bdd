//! High level gate orchestration.
//!
//! Wires the backend boundary, decision engine, motion classifier, container
//! obfuscation, and provider lifecycle into the public widget API: an
//! instance bootstraps asynchronously once, decides whether the visitor may
//! proceed, and then gates rendering of the real challenge widget.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::Notify;

use crate::api::{ApiError, BackendApi, HttpBackendApi, SitePolicy, VerificationRequest};
use crate::behavior::{ClickGate, ClickOutcome, MotionTracker};
use crate::cloaking;
use crate::config::{GateConfig, GateOverrides};
use crate::detection::{self, EnvironmentSnapshot};
use crate::obfuscation;
use crate::page::{
    HostPage, ListenerId, MemoryPage, ObserverId, PointerEvent, Surface, register_style_once,
};
use crate::providers::{
    self, ChallengeProvider, ChallengeRelay, HcaptchaProvider, ProviderError, ProviderKind,
    TurnstileProvider, WidgetId, WidgetParams,
};

/// Result alias used across the orchestration layer.
pub type GateResult<T> = Result<T, GateError>;

/// High-level error surfaced by the gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("backend error: {0}")]
    Api(#[from] ApiError),
    #[error("domain not authorized for this site key")]
    DomainNotAllowed,
    #[error("{0}")]
    ScriptLoad(#[from] crate::page::ScriptLoadError),
    #[error("gate not initialized yet")]
    NotInitialized,
    #[error("no challenge token available; complete the challenge first")]
    NoToken,
    #[error("container \"{0}\" not found")]
    ContainerNotFound(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Closed set of lifecycle states. `Blocked` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    FetchingPolicy,
    DecidingProvider,
    LoadingProvider,
    Ready,
    Blocked,
    Failed,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Blocked | Lifecycle::Failed)
    }

    fn can_advance_to(self, next: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, next),
            (Created, FetchingPolicy)
                | (FetchingPolicy, Blocked)
                | (FetchingPolicy, DecidingProvider)
                | (DecidingProvider, LoadingProvider)
                | (LoadingProvider, Ready)
        ) || (!self.is_terminal() && next == Failed)
    }
}

type SuccessCallback = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&GateError) + Send + Sync>;
type VoidCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    success: Option<SuccessCallback>,
    error: Option<ErrorCallback>,
    expire: Option<VoidCallback>,
    init: Option<VoidCallback>,
}

#[derive(Debug, Clone)]
struct DeferredRender {
    container: String,
    placeholder: Option<String>,
}

struct Session {
    stage: Lifecycle,
    provider: Option<ProviderKind>,
    token: Option<String>,
    widget: Option<WidgetId>,
    /// Sticky; once set it is never cleared, not even by teardown.
    blocked: bool,
    cloaking_active: bool,
    policy: Option<SitePolicy>,
    deferred: VecDeque<DeferredRender>,
    /// Node ids this instance created, removed again on teardown.
    artifacts: Vec<String>,
    affordances: HashMap<String, String>,
    loaders: HashMap<String, String>,
    prompts: HashMap<String, String>,
    pointer_listener: Option<ListenerId>,
    hiding_observer: Option<ObserverId>,
}

impl Session {
    fn new() -> Self {
        Self {
            stage: Lifecycle::Created,
            provider: None,
            token: None,
            widget: None,
            blocked: false,
            cloaking_active: false,
            policy: None,
            deferred: VecDeque::new(),
            artifacts: Vec::new(),
            affordances: HashMap::new(),
            loaders: HashMap::new(),
            prompts: HashMap::new(),
            pointer_listener: None,
            hiding_observer: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct GateInner {
    site_key: String,
    config: GateConfig,
    environment: EnvironmentSnapshot,
    page: Arc<dyn HostPage>,
    api: Arc<dyn BackendApi>,
    turnstile: TurnstileProvider,
    hcaptcha: HcaptchaProvider,
    rng: Mutex<StdRng>,
    session: Mutex<Session>,
    motion: Mutex<MotionTracker>,
    clicks: Mutex<ClickGate>,
    callbacks: Mutex<Callbacks>,
    ready: Notify,
}

/// Fluent builder for [`BotGate`].
pub struct BotGateBuilder {
    site_key: String,
    overrides: GateOverrides,
    page: Option<Arc<dyn HostPage>>,
    api: Option<Arc<dyn BackendApi>>,
    environment: EnvironmentSnapshot,
    rng_seed: Option<u64>,
}

impl BotGateBuilder {
    fn new(site_key: impl Into<String>) -> Self {
        Self {
            site_key: site_key.into(),
            overrides: GateOverrides::default(),
            page: None,
            api: None,
            environment: EnvironmentSnapshot::default(),
            rng_seed: None,
        }
    }

    pub fn with_overrides(mut self, overrides: GateOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_page(mut self, page: Arc<dyn HostPage>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_api(mut self, api: Arc<dyn BackendApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentSnapshot) -> Self {
        self.environment = environment;
        self
    }

    /// Seed the internal randomness source. Defaults to entropy.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate the configuration and spawn the bootstrap task. Must run
    /// inside a tokio runtime.
    pub fn build(self) -> GateResult<BotGate> {
        if self.site_key.trim().is_empty() {
            return Err(GateError::Configuration("site key is required".into()));
        }

        let config = GateConfig::resolve(self.overrides);
        let api: Arc<dyn BackendApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpBackendApi::new(&config.api_url)?),
        };
        let page = self
            .page
            .unwrap_or_else(|| Arc::new(MemoryPage::new("localhost")) as Arc<dyn HostPage>);
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let retry_attempts = config.retry_attempts;

        let inner = Arc::new(GateInner {
            site_key: self.site_key,
            config,
            environment: self.environment,
            page,
            api,
            turnstile: TurnstileProvider::new(),
            hcaptcha: HcaptchaProvider::new(),
            rng: Mutex::new(rng),
            session: Mutex::new(Session::new()),
            motion: Mutex::new(MotionTracker::new()),
            clicks: Mutex::new(ClickGate::new(retry_attempts)),
            callbacks: Mutex::new(Callbacks::default()),
            ready: Notify::new(),
        });

        // Tracking starts at construction so motion recorded before
        // readiness counts toward clicks on the instant affordance.
        if inner.config.motion_tracking {
            inner.arm_pointer_tracking();
        }

        let bootstrap = inner.clone();
        tokio::spawn(async move { bootstrap.bootstrap().await });

        Ok(BotGate { inner })
    }
}

/// One gate instance per page embed.
#[derive(Clone)]
pub struct BotGate {
    inner: Arc<GateInner>,
}

impl BotGate {
    /// Obtain a builder to customise the gate instance.
    pub fn builder(site_key: impl Into<String>) -> BotGateBuilder {
        BotGateBuilder::new(site_key)
    }

    /// Construct a gate with the default page and backend.
    pub fn new(site_key: impl Into<String>, overrides: GateOverrides) -> GateResult<Self> {
        BotGateBuilder::new(site_key).with_overrides(overrides).build()
    }

    // ---- public widget API ---------------------------------------------

    /// Request the challenge UI inside `container_id`.
    ///
    /// Before readiness this either paints an instant affordance and defers
    /// the full mount, or fails with [`GateError::NotInitialized`] when
    /// instant render is disabled. Blocked sessions ignore the call with a
    /// warning.
    pub fn render(&self, container_id: &str) -> GateResult<()> {
        self.inner.render(container_id)
    }

    /// Exchange the challenge token for a server-issued verification token.
    pub async fn verify(&self) -> GateResult<String> {
        self.inner.verify().await
    }

    /// Clear the token and reset the active provider widget.
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Tear the instance down: detach listeners, reset the widget, remove
    /// every DOM artifact this instance created, and drop session state back
    /// to uninitialized. Safe to call from any state.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Deliver a click on the hidden-mode affordance. Host pages that wire
    /// the affordance themselves call this; the mounted surface's click
    /// handler routes here as well.
    pub fn press(&self, container_id: &str, event: PointerEvent) {
        self.inner.clone().press(container_id, event);
    }

    /// The pointer entered the affordance.
    pub fn pointer_entered_affordance(&self, timestamp_ms: f64) {
        lock(&self.inner.clicks).hover_start(timestamp_ms);
    }

    /// The pointer left the affordance.
    pub fn pointer_left_affordance(&self) {
        lock(&self.inner.clicks).hover_end();
    }

    /// Wait for readiness up to `cap`, then proceed regardless. Returns
    /// whether the gate is actually ready.
    pub async fn await_ready(&self, cap: Duration) -> bool {
        self.inner.await_ready(cap).await
    }

    pub fn token(&self) -> Option<String> {
        lock(&self.inner.session).token.clone()
    }

    pub fn is_blocked(&self) -> bool {
        lock(&self.inner.session).blocked
    }

    pub fn is_cloaking_active(&self) -> bool {
        lock(&self.inner.session).cloaking_active
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.inner.session).stage == Lifecycle::Ready
    }

    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.inner.session).stage
    }

    // ---- callback registration (fluent) --------------------------------

    pub fn on_success(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        lock(&self.inner.callbacks).success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(&self, callback: impl Fn(&GateError) + Send + Sync + 'static) -> &Self {
        lock(&self.inner.callbacks).error = Some(Arc::new(callback));
        self
    }

    pub fn on_expire(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        lock(&self.inner.callbacks).expire = Some(Arc::new(callback));
        self
    }

    /// Register the init listener. Invoked synchronously right away when the
    /// gate is already ready.
    pub fn on_init(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        let callback: VoidCallback = Arc::new(callback);
        lock(&self.inner.callbacks).init = Some(callback.clone());
        if self.is_ready() {
            callback();
        }
        self
    }
}

impl GateInner {
    // ---- bootstrap -----------------------------------------------------

    async fn bootstrap(self: Arc<Self>) {
        if let Err(err) = self.clone().run_bootstrap().await {
            log::error!("gate initialization failed: {err}");
            self.transition(Lifecycle::Failed);
            self.fire_error(&err);
        }
    }

    async fn run_bootstrap(self: Arc<Self>) -> GateResult<()> {
        self.transition(Lifecycle::FetchingPolicy);

        // Policy fetch, optionally alongside a dual-provider preload.
        let policy = if self.config.protection.preload_providers {
            let (policy, preload) = tokio::join!(
                self.api.fetch_policy(&self.site_key),
                providers::preload_all(self.page.as_ref()),
            );
            if let Err(err) = preload {
                // The selected provider gets one more load attempt below.
                log::warn!("provider preload failed: {err}");
            }
            policy?
        } else {
            self.api.fetch_policy(&self.site_key).await?
        };

        let hostname = self.page.hostname();
        if !policy.allows_domain(&hostname) {
            return Err(GateError::DomainNotAllowed);
        }

        if let Some(cloak) = policy.cloaking.clone().filter(|c| c.enabled) {
            let evidence = detection::detect_bot(&self.environment);
            let device = detection::check_device(&self.environment.user_agent);
            // Lookup failure is non-fatal; the country just stays unknown.
            let country = match self.api.geo_check(&self.site_key).await {
                Ok(geo) => geo.country,
                Err(err) => {
                    log::warn!("geolocation check failed: {err}");
                    None
                }
            };

            let decision = cloaking::decide(&cloak, &evidence, &device, country.as_deref());
            log::debug!(
                "cloaking decision: blocked={} score={} checks={:?}",
                decision.blocked,
                evidence.score,
                evidence.checks
            );

            lock(&self.session).cloaking_active = true;

            if decision.blocked {
                {
                    let mut session = lock(&self.session);
                    session.blocked = true;
                    session.policy = Some(policy);
                }
                self.transition(Lifecycle::Blocked);
                cloaking::handle_block(self.page.as_ref(), &cloak, &decision.reason);
                return Ok(());
            }

            let observer = cloaking::apply_element_hiding(self.page.as_ref(), &cloak);
            lock(&self.session).hiding_observer = Some(observer);
        }

        lock(&self.session).policy = Some(policy.clone());
        self.transition(Lifecycle::DecidingProvider);

        let kind = {
            let mut rng = lock(&self.rng);
            providers::select_provider(self.config.provider, &policy, &mut *rng)?
        };
        log::info!("selected challenge provider: {kind}");
        lock(&self.session).provider = Some(kind);

        self.transition(Lifecycle::LoadingProvider);
        providers::ensure_script(self.page.as_ref(), kind.script_url()).await?;

        self.transition(Lifecycle::Ready);
        self.ready.notify_waiters();
        self.flush_deferred();
        self.fire_init();
        Ok(())
    }

    fn transition(&self, next: Lifecycle) {
        let mut session = lock(&self.session);
        let current = session.stage;
        if current.can_advance_to(next) {
            session.stage = next;
        } else {
            log::warn!("ignoring invalid lifecycle transition {current:?} -> {next:?}");
        }
    }

    fn arm_pointer_tracking(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let listener = self.page.add_pointer_listener(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.motion).record(event.into());
            }
        }));
        lock(&self.session).pointer_listener = Some(listener);
    }

    async fn await_ready(&self, cap: Duration) -> bool {
        let notified = self.ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if lock(&self.session).stage == Lifecycle::Ready {
            return true;
        }
        let _ = tokio::time::timeout(cap, notified).await;
        lock(&self.session).stage == Lifecycle::Ready
    }

    // ---- rendering -----------------------------------------------------

    fn render(self: &Arc<Self>, container: &str) -> GateResult<()> {
        let (stage, blocked) = {
            let session = lock(&self.session);
            (session.stage, session.blocked)
        };

        if blocked {
            log::warn!("render ignored: visitor is blocked");
            return Ok(());
        }

        if !self.page.container_exists(container) {
            return Err(GateError::ContainerNotFound(container.to_string()));
        }

        if stage == Lifecycle::Ready {
            self.mount_content(container);
            return Ok(());
        }

        if !self.config.protection.instant_render {
            return Err(GateError::NotInitialized);
        }

        // Instant render: paint a lightweight affordance synchronously and
        // queue the full mount for readiness.
        let placeholder = if self.config.hide_challenge {
            Some(self.mount_affordance(container))
        } else {
            Some(self.mount_loader(container))
        };
        let flushed_meanwhile = {
            let mut session = lock(&self.session);
            session.deferred.push_back(DeferredRender {
                container: container.to_string(),
                placeholder,
            });
            // Bootstrap may have flushed the queue between the stage check
            // above and this enqueue.
            session.stage == Lifecycle::Ready
        };
        if flushed_meanwhile {
            self.flush_deferred();
        }
        Ok(())
    }

    /// Drain the deferred-render queue in submission order.
    fn flush_deferred(self: &Arc<Self>) {
        loop {
            let next = lock(&self.session).deferred.pop_front();
            let Some(entry) = next else { break };
            if let Some(placeholder) = entry.placeholder {
                self.page.remove_node(&placeholder);
            }
            self.mount_content(&entry.container);
        }
    }

    /// Ready-state mount: branding, then either the click-gated affordance
    /// or the real challenge.
    fn mount_content(self: &Arc<Self>, container: &str) {
        self.page.clear_container(container);
        {
            let mut session = lock(&self.session);
            session.affordances.remove(container);
            session.loaders.remove(container);
            session.prompts.remove(container);
        }

        let show_branding = lock(&self.session)
            .policy
            .as_ref()
            .is_some_and(|policy| policy.show_branding);
        if show_branding {
            let branding = self.page.mount_surface(container, Surface::Branding, None);
            lock(&self.session).artifacts.push(branding);
        }

        if self.config.hide_challenge {
            self.mount_affordance(container);
        } else {
            self.mount_challenge(container);
        }
    }

    fn mount_affordance(self: &Arc<Self>, container: &str) -> String {
        let affordance = &self.config.affordance;
        if affordance.animate_emoji && register_style_once("botgate-poke") {
            self.page.ensure_style("botgate-poke");
        }

        let weak = Arc::downgrade(self);
        let target = container.to_string();
        let on_click: crate::page::PointerListener = Arc::new(move |event: PointerEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.press(&target, event);
            }
        });

        let node = self.page.mount_surface(
            container,
            Surface::StartButton {
                text: affordance.text.clone(),
                emoji: affordance.emoji.clone(),
                color: affordance.color.clone(),
                animate_emoji: affordance.animate_emoji,
            },
            Some(on_click),
        );
        let mut session = lock(&self.session);
        session.artifacts.push(node.clone());
        session.affordances.insert(container.to_string(), node.clone());
        node
    }

    fn mount_loader(self: &Arc<Self>, container: &str) -> String {
        if register_style_once("botgate-spin") {
            self.page.ensure_style("botgate-spin");
        }
        let node = self.page.mount_surface(container, Surface::Loading, None);
        let mut session = lock(&self.session);
        session.artifacts.push(node.clone());
        session.loaders.insert(container.to_string(), node.clone());
        node
    }

    fn clear_loader(&self, container: &str) {
        let loader = lock(&self.session).loaders.remove(container);
        if let Some(loader) = loader {
            self.page.remove_node(&loader);
        }
    }

    /// Handle a click on the affordance, pre- or post-readiness.
    fn press(self: Arc<Self>, container: &str, event: PointerEvent) {
        if lock(&self.session).blocked {
            log::warn!("affordance click ignored: visitor is blocked");
            return;
        }

        if self.config.motion_tracking {
            let outcome = {
                let motion = lock(&self.motion);
                lock(&self.clicks).evaluate(&event, &motion)
            };
            match outcome {
                ClickOutcome::Admitted(admission) => {
                    log::debug!("click admitted ({}/5 checks)", admission.score);
                }
                ClickOutcome::Retry(admission) => {
                    log::debug!("click rejected ({}/5 checks)", admission.score);
                    self.show_prompt(container, Surface::RetryPrompt);
                    return;
                }
                ClickOutcome::Exhausted => {
                    log::warn!("click attempts exhausted; affordance disabled");
                    self.remove_affordance(container);
                    self.show_prompt(container, Surface::HardStop);
                    return;
                }
            }
        }

        self.remove_affordance(container);
        // An admitted click supersedes the queued deferred mount.
        {
            let mut session = lock(&self.session);
            session.deferred.retain(|entry| entry.container != container);
        }

        if lock(&self.session).stage == Lifecycle::Ready {
            self.mount_challenge(container);
            return;
        }

        // Not ready yet: show a loader and mount once ready, or once the
        // bounded wait gives up and proceeds regardless.
        self.mount_loader(container);
        let inner = self.clone();
        let container = container.to_string();
        let cap = self.config.ready_timeout;
        tokio::spawn(async move {
            if !inner.await_ready(cap).await {
                log::warn!("readiness wait expired after {cap:?}; proceeding anyway");
            }
            inner.clear_loader(&container);
            inner.mount_challenge(&container);
        });
    }

    fn remove_affordance(&self, container: &str) {
        let node = lock(&self.session).affordances.remove(container);
        if let Some(node) = node {
            self.page.remove_node(&node);
        }
    }

    fn show_prompt(&self, container: &str, surface: Surface) {
        let previous = lock(&self.session).prompts.remove(container);
        if let Some(previous) = previous {
            self.page.remove_node(&previous);
        }
        let node = self.page.mount_surface(container, surface, None);
        let mut session = lock(&self.session);
        session.artifacts.push(node.clone());
        session.prompts.insert(container.to_string(), node);
    }

    /// Mount the real challenge: real container, loader, decoys, provider
    /// widget with the callback relay.
    fn mount_challenge(self: &Arc<Self>, container: &str) {
        let (policy, kind) = {
            let session = lock(&self.session);
            (session.policy.clone(), session.provider)
        };
        let Some(policy) = policy else {
            log::warn!("challenge mount skipped: no site policy yet");
            return;
        };
        let Some(kind) = kind else {
            log::warn!("challenge mount skipped: no provider selected yet");
            return;
        };

        let real_id = {
            let mut rng = lock(&self.rng);
            format!("botgate-real-{:08x}{:08x}", rng.r#gen::<u32>(), rng.r#gen::<u32>())
        };
        self.page.create_container(container, &real_id, false);
        lock(&self.session).artifacts.push(real_id.clone());
        self.mount_loader(container);

        if self.config.protection.random_containers {
            let layout = {
                let mut rng = lock(&self.rng);
                obfuscation::plan_layout(
                    &mut *rng,
                    &real_id,
                    self.config.protection.min_decoys,
                    self.config.protection.max_decoys,
                )
            };
            obfuscation::apply(self.page.as_ref(), container, &layout);
            lock(&self.session).artifacts.extend(layout.decoy_ids.clone());
        }

        let provider = self.provider_for(kind);
        let Some(site_key) = provider.site_key(&policy).map(str::to_string) else {
            log::error!("challenge mount failed: {kind} key missing from policy");
            self.clear_loader(container);
            return;
        };
        let params = WidgetParams {
            site_key,
            theme: self.config.theme.as_str().into(),
            size: self.config.size.as_str().into(),
        };
        let relay = Arc::new(WidgetRelay {
            inner: Arc::downgrade(self),
            container: container.to_string(),
        });

        match provider.mount(self.page.as_ref(), &real_id, &params, relay) {
            Ok(widget) => {
                lock(&self.session).widget = Some(widget);
            }
            Err(err) => {
                // Provider render exceptions are non-fatal; the widget just
                // does not appear.
                log::error!("{kind} render error: {err}");
                self.clear_loader(container);
            }
        }
    }

    fn provider_for(&self, kind: ProviderKind) -> &dyn ChallengeProvider {
        match kind {
            ProviderKind::Turnstile => &self.turnstile,
            ProviderKind::Hcaptcha => &self.hcaptcha,
        }
    }

    // ---- verification and teardown -------------------------------------

    async fn verify(&self) -> GateResult<String> {
        let (token, provider) = {
            let session = lock(&self.session);
            (session.token.clone(), session.provider)
        };
        let token = token.ok_or(GateError::NoToken)?;
        let provider = provider.ok_or(GateError::NotInitialized)?;

        let request = VerificationRequest {
            site_key: self.site_key.clone(),
            domain: self.page.hostname(),
            captcha_token: token,
            captcha_provider: provider.label().into(),
        };
        let outcome = self.api.verify(&request).await?;
        Ok(outcome.token)
    }

    fn reset(&self) {
        let (provider, widget) = {
            let mut session = lock(&self.session);
            session.token = None;
            (session.provider, session.widget)
        };
        if let (Some(kind), Some(widget)) = (provider, widget)
            && let Err(err) = self.provider_for(kind).reset(self.page.as_ref(), widget)
        {
            log::warn!("widget reset failed: {err}");
        }
    }

    fn destroy(&self) {
        let (listener, observer) = {
            let mut session = lock(&self.session);
            (session.pointer_listener.take(), session.hiding_observer.take())
        };
        if let Some(listener) = listener {
            self.page.remove_pointer_listener(listener);
        }
        if let Some(observer) = observer {
            self.page.disconnect(observer);
        }

        self.reset();

        let artifacts = {
            let mut session = lock(&self.session);
            let artifacts: Vec<String> = session.artifacts.drain(..).collect();
            session.affordances.clear();
            session.loaders.clear();
            session.prompts.clear();
            session.deferred.clear();
            session.token = None;
            session.widget = None;
            session.provider = None;
            session.policy = None;
            // Back to the uninitialized marker; the blocked flag is sticky.
            session.stage = Lifecycle::Created;
            artifacts
        };
        for node in artifacts {
            self.page.remove_node(&node);
        }

        lock(&self.motion).clear();
    }

    // ---- callbacks -----------------------------------------------------

    fn fire_success(&self, token: &str) {
        let callback = lock(&self.callbacks).success.clone();
        if let Some(callback) = callback {
            callback(token);
        }
    }

    fn fire_error(&self, error: &GateError) {
        let callback = lock(&self.callbacks).error.clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    fn fire_expire(&self) {
        let callback = lock(&self.callbacks).expire.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn fire_init(&self) {
        let callback = lock(&self.callbacks).init.clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Relays provider widget callbacks into the session.
struct WidgetRelay {
    inner: Weak<GateInner>,
    container: String,
}

impl ChallengeRelay for WidgetRelay {
    fn on_token(&self, token: &str) {
        let Some(inner) = self.inner.upgrade() else { return };
        inner.clear_loader(&self.container);
        lock(&inner.session).token = Some(token.to_string());
        inner.fire_success(token);
    }

    fn on_error(&self, message: &str) {
        let Some(inner) = self.inner.upgrade() else { return };
        inner.clear_loader(&self.container);
        let error = GateError::Provider(ProviderError::Runtime(message.to_string()));
        inner.fire_error(&error);
    }

    fn on_expire(&self) {
        let Some(inner) = self.inner.upgrade() else { return };
        lock(&inner.session).token = None;
        inner.fire_expire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_site_key_fails_immediately() {
        let result = BotGate::builder("  ").build();
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }

    #[test]
    fn lifecycle_transitions_form_a_closed_set() {
        use Lifecycle::*;
        assert!(Created.can_advance_to(FetchingPolicy));
        assert!(FetchingPolicy.can_advance_to(Blocked));
        assert!(FetchingPolicy.can_advance_to(DecidingProvider));
        assert!(DecidingProvider.can_advance_to(LoadingProvider));
        assert!(LoadingProvider.can_advance_to(Ready));
        assert!(LoadingProvider.can_advance_to(Failed));

        assert!(!Created.can_advance_to(Ready));
        assert!(!Blocked.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(FetchingPolicy));
        assert!(!Ready.can_advance_to(Blocked));
    }
}
