//! End-to-end lifecycle coverage against the in-memory host page and a
//! scripted backend stub.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use botgate::{
    ApiError, BackendApi, BotGate, CloakingPolicy, EnvironmentSnapshot, GateError, GateOverrides,
    GeoLookup, HostPage, Lifecycle, MemoryPage, PointerEvent, ProtectionOverrides, ProviderKind,
    SitePolicy, VerificationOutcome, VerificationRequest, HCAPTCHA_SCRIPT_URL,
    TURNSTILE_SCRIPT_URL,
};

/// Scripted backend. `hold_policy` keeps the bootstrap parked in the policy
/// fetch until the test releases it.
struct StubApi {
    policy: SitePolicy,
    country: Option<String>,
    hold_policy: Option<Arc<Notify>>,
    verify_calls: Mutex<Vec<VerificationRequest>>,
}

impl StubApi {
    fn new(policy: SitePolicy) -> Self {
        Self {
            policy,
            country: None,
            hold_policy: None,
            verify_calls: Mutex::new(Vec::new()),
        }
    }

    fn held(policy: SitePolicy) -> (Arc<Self>, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let mut api = Self::new(policy);
        api.hold_policy = Some(release.clone());
        (Arc::new(api), release)
    }

    fn verify_calls(&self) -> Vec<VerificationRequest> {
        self.verify_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendApi for StubApi {
    async fn fetch_policy(&self, _site_key: &str) -> Result<SitePolicy, ApiError> {
        if let Some(release) = &self.hold_policy {
            release.notified().await;
        }
        Ok(self.policy.clone())
    }

    async fn geo_check(&self, _site_key: &str) -> Result<GeoLookup, ApiError> {
        Ok(GeoLookup {
            country: self.country.clone(),
        })
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome, ApiError> {
        self.verify_calls.lock().unwrap().push(request.clone());
        Ok(VerificationOutcome {
            token: "server-token".into(),
        })
    }
}

fn turnstile_policy() -> SitePolicy {
    SitePolicy {
        allowed_domains: vec!["example.com".into()],
        turnstile_site_key: Some("ts-key".into()),
        hcaptcha_site_key: None,
        cloaking: None,
        show_branding: false,
    }
}

fn page_with_slot() -> Arc<MemoryPage> {
    let page = Arc::new(MemoryPage::new("example.com"));
    page.add_element(None, "slot", &[]);
    page
}

fn build_gate(page: Arc<MemoryPage>, api: Arc<StubApi>, overrides: GateOverrides) -> BotGate {
    BotGate::builder("sk-test")
        .with_page(page)
        .with_api(api)
        .with_overrides(overrides)
        .with_rng_seed(7)
        .build()
        .unwrap()
}

fn visible_overrides() -> GateOverrides {
    GateOverrides {
        hide_challenge: Some(false),
        ..GateOverrides::default()
    }
}

/// Zig-zag pointer path that reads as human: plenty of samples, alternating
/// direction, spread over about a second.
fn feed_human_motion(page: &MemoryPage) {
    for i in 0..20 {
        let y = if i % 2 == 0 { 0.0 } else { 20.0 };
        page.emit_pointer_move(PointerEvent::new(i as f64 * 20.0, y, i as f64 * 50.0));
    }
}

/// Let the mount task spawned by an admitted pre-ready click run to
/// completion on the test runtime.
async fn wait_for_widget(page: &MemoryPage) -> botgate::WidgetId {
    for _ in 0..50 {
        if let Some(widget) = page.last_widget() {
            return widget;
        }
        tokio::task::yield_now().await;
    }
    panic!("no widget mounted");
}

fn surface_sequence(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[tokio::test]
async fn bootstrap_reaches_ready_and_loads_selected_provider() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, GateOverrides::default());

    assert!(gate.await_ready(Duration::from_secs(2)).await);
    assert_eq!(gate.lifecycle(), Lifecycle::Ready);
    assert!(page.has_script(TURNSTILE_SCRIPT_URL));
    assert_eq!(page.pointer_listener_count(), 1);
    assert!(!gate.is_blocked());
    assert!(!gate.is_cloaking_active());
}

#[tokio::test]
async fn deferred_renders_flush_in_submission_order() {
    let page = page_with_slot();
    for id in ["a", "b", "c"] {
        page.add_element(None, id, &[]);
    }
    let (api, release) = StubApi::held(turnstile_policy());
    let gate = build_gate(page.clone(), api, GateOverrides::default());

    // All three land in the deferred queue with an instant affordance.
    for id in ["a", "b", "c"] {
        gate.render(id).unwrap();
        assert_eq!(page.surfaces_in(id, "start-button").len(), 1);
    }
    assert!(!gate.is_ready());

    release.notify_one();
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    // Each placeholder was replaced by a fresh ready-state affordance, in
    // submission order.
    let sequences: Vec<u64> = ["a", "b", "c"]
        .iter()
        .map(|id| {
            let surfaces = page.surfaces_in(id, "start-button");
            assert_eq!(surfaces.len(), 1, "container {id} should hold one affordance");
            surface_sequence(&surfaces[0])
        })
        .collect();
    assert!(sequences[0] < sequences[1] && sequences[1] < sequences[2]);
}

#[tokio::test]
async fn render_before_ready_fails_without_instant_render() {
    let page = page_with_slot();
    let (api, release) = StubApi::held(turnstile_policy());
    let overrides = GateOverrides {
        protection: Some(ProtectionOverrides {
            instant_render: Some(false),
            ..ProtectionOverrides::default()
        }),
        ..GateOverrides::default()
    };
    let gate = build_gate(page.clone(), api, overrides);

    assert!(matches!(gate.render("slot"), Err(GateError::NotInitialized)));

    release.notify_one();
    assert!(gate.await_ready(Duration::from_secs(2)).await);
    gate.render("slot").unwrap();
    assert_eq!(page.surfaces_in("slot", "start-button").len(), 1);
}

#[tokio::test]
async fn render_into_missing_container_fails() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page, api, GateOverrides::default());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    assert!(matches!(
        gate.render("nowhere"),
        Err(GateError::ContainerNotFound(_))
    ));
}

#[tokio::test]
async fn automated_visitor_is_blocked_with_denial_notice() {
    let page = page_with_slot();
    let mut policy = turnstile_policy();
    policy.cloaking = Some(CloakingPolicy::default());
    let api = Arc::new(StubApi::new(policy));

    let gate = BotGate::builder("sk-test")
        .with_page(page.clone())
        .with_api(api)
        .with_environment(EnvironmentSnapshot::default().with_automation_property("webdriver"))
        .with_rng_seed(7)
        .build()
        .unwrap();

    // Never becomes ready; blocked is terminal.
    assert!(!gate.await_ready(Duration::from_millis(300)).await);
    assert!(gate.is_blocked());
    assert!(gate.is_cloaking_active());
    assert_eq!(gate.lifecycle(), Lifecycle::Blocked);
    assert_eq!(page.denial_reason().as_deref(), Some("Bot detected"));

    // Renders are silently ignored for blocked visitors.
    gate.render("slot").unwrap();
    assert!(page.surfaces_in("slot", "start-button").is_empty());
    assert!(page.surfaces_in("slot", "loading").is_empty());
}

#[tokio::test]
async fn domain_mismatch_fails_bootstrap_and_fires_error() {
    let page = Arc::new(MemoryPage::new("rogue.net"));
    page.add_element(None, "slot", &[]);
    let api = Arc::new(StubApi::new(turnstile_policy()));

    let seen = Arc::new(Mutex::new(None::<String>));
    let gate = build_gate(page, api, GateOverrides::default());
    let sink = seen.clone();
    gate.on_error(move |err| {
        *sink.lock().unwrap() = Some(err.to_string());
    });

    assert!(!gate.await_ready(Duration::from_millis(300)).await);
    assert_eq!(gate.lifecycle(), Lifecycle::Failed);
    let message = seen.lock().unwrap().clone();
    assert_eq!(
        message.as_deref(),
        Some("domain not authorized for this site key")
    );
}

#[tokio::test]
async fn visible_mode_mounts_widget_with_decoys() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, visible_overrides());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    gate.render("slot").unwrap();

    let widget = page.last_widget().expect("widget should be mounted");
    assert_eq!(page.widget_provider(widget), Some(ProviderKind::Turnstile));
    assert_eq!(page.widget_site_key(widget).as_deref(), Some("ts-key"));

    // The widget lives inside the real container; its siblings are decoys.
    let real = page.widget_container(widget).unwrap();
    assert!(!page.is_decoy(&real));
    let decoys: Vec<String> = page
        .child_order("slot")
        .into_iter()
        .filter(|id| page.is_decoy(id))
        .collect();
    assert!((2..=5).contains(&decoys.len()), "got {} decoys", decoys.len());
}

#[tokio::test]
async fn token_flow_feeds_callbacks_and_verification() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api.clone(), visible_overrides());

    let tokens = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = tokens.clone();
    gate.on_success(move |token| sink.lock().unwrap().push(token.to_string()));

    assert!(gate.await_ready(Duration::from_secs(2)).await);
    gate.render("slot").unwrap();

    assert!(matches!(gate.verify().await, Err(GateError::NoToken)));

    let widget = page.last_widget().unwrap();
    page.emit_widget_token(widget, "challenge-token");
    assert_eq!(gate.token().as_deref(), Some("challenge-token"));
    assert_eq!(tokens.lock().unwrap().as_slice(), ["challenge-token"]);

    let verified = gate.verify().await.unwrap();
    assert_eq!(verified, "server-token");

    let calls = api.verify_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].site_key, "sk-test");
    assert_eq!(calls[0].domain, "example.com");
    assert_eq!(calls[0].captcha_token, "challenge-token");
    assert_eq!(calls[0].captcha_provider, "turnstile");
}

#[tokio::test]
async fn expiry_clears_token_until_next_solve() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, visible_overrides());

    let expired = Arc::new(Mutex::new(0u32));
    let sink = expired.clone();
    gate.on_expire(move || *sink.lock().unwrap() += 1);

    assert!(gate.await_ready(Duration::from_secs(2)).await);
    gate.render("slot").unwrap();

    let widget = page.last_widget().unwrap();
    page.emit_widget_token(widget, "t1");
    page.emit_widget_expiry(widget);

    assert!(gate.token().is_none());
    assert_eq!(*expired.lock().unwrap(), 1);
    assert!(matches!(gate.verify().await, Err(GateError::NoToken)));
}

#[tokio::test]
async fn affordance_click_with_human_motion_mounts_widget() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, GateOverrides::default());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    gate.render("slot").unwrap();
    let button = page.surfaces_in("slot", "start-button")[0].clone();

    feed_human_motion(&page);
    gate.pointer_entered_affordance(1000.0);
    page.click(&button, PointerEvent::new(200.0, 10.0, 2000.0));

    assert!(page.last_widget().is_some());
    assert!(page.surfaces_in("slot", "start-button").is_empty());
}

#[tokio::test]
async fn preready_click_with_human_motion_waits_then_mounts() {
    let page = page_with_slot();
    let (api, release) = StubApi::held(turnstile_policy());
    let gate = build_gate(page.clone(), api, GateOverrides::default());

    gate.render("slot").unwrap();
    let button = page.surfaces_in("slot", "start-button")[0].clone();

    // Motion tracked before readiness counts; the default configuration
    // must admit a genuinely human pre-ready click.
    feed_human_motion(&page);
    gate.pointer_entered_affordance(1000.0);
    page.click(&button, PointerEvent::new(200.0, 10.0, 2000.0));

    // Admitted: affordance swapped for a loader while bootstrap is parked.
    assert!(page.surfaces_in("slot", "start-button").is_empty());
    assert!(page.surfaces_in("slot", "hard-stop").is_empty());
    assert_eq!(page.surfaces_in("slot", "loading").len(), 1);
    assert!(page.last_widget().is_none());

    release.notify_one();
    assert!(gate.await_ready(Duration::from_secs(2)).await);
    let widget = wait_for_widget(&page).await;
    assert_eq!(page.widget_provider(widget), Some(ProviderKind::Turnstile));
    // The admitted click superseded the queued render; no second affordance.
    assert!(page.surfaces_in("slot", "start-button").is_empty());
}

#[tokio::test]
async fn preready_click_without_tracking_mounts_after_ready() {
    let page = page_with_slot();
    let (api, release) = StubApi::held(turnstile_policy());
    let overrides = GateOverrides {
        motion_tracking: Some(false),
        ..GateOverrides::default()
    };
    let gate = build_gate(page.clone(), api, overrides);

    gate.render("slot").unwrap();
    let button = page.surfaces_in("slot", "start-button")[0].clone();
    page.click(&button, PointerEvent::new(10.0, 10.0, 100.0));

    assert_eq!(page.surfaces_in("slot", "loading").len(), 1);
    assert!(page.last_widget().is_none());

    release.notify_one();
    assert!(gate.await_ready(Duration::from_secs(2)).await);
    wait_for_widget(&page).await;
}

#[tokio::test]
async fn unnatural_clicks_prompt_then_hard_stop() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, GateOverrides::default());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    gate.render("slot").unwrap();
    let button = page.surfaces_in("slot", "start-button")[0].clone();

    // No pointer motion at all; every admission check fails.
    let robotic = PointerEvent::new(0.0, 0.0, 10.0).untrusted();
    page.click(&button, robotic);
    assert_eq!(page.surfaces_in("slot", "retry-prompt").len(), 1);
    assert!(page.last_widget().is_none());

    page.click(&button, robotic);
    assert_eq!(page.surfaces_in("slot", "retry-prompt").len(), 1);

    // Third strike disables the affordance for good.
    page.click(&button, robotic);
    assert_eq!(page.surfaces_in("slot", "hard-stop").len(), 1);
    assert!(page.surfaces_in("slot", "start-button").is_empty());
    assert!(page.last_widget().is_none());
}

#[tokio::test]
async fn preload_tolerates_one_failing_vendor_script() {
    let page = page_with_slot();
    page.fail_script(HCAPTCHA_SCRIPT_URL);
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let overrides = GateOverrides {
        protection: Some(ProtectionOverrides {
            preload_providers: Some(true),
            ..ProtectionOverrides::default()
        }),
        ..GateOverrides::default()
    };
    let gate = build_gate(page.clone(), api, overrides);

    assert!(gate.await_ready(Duration::from_secs(2)).await);
    assert!(page.has_script(TURNSTILE_SCRIPT_URL));
    assert!(!page.has_script(HCAPTCHA_SCRIPT_URL));
}

#[tokio::test]
async fn element_hiding_runs_for_allowed_visitors() {
    let page = page_with_slot();
    page.add_element(None, "secret", &["bot-hide"]);
    let mut policy = turnstile_policy();
    policy.cloaking = Some(CloakingPolicy::default());
    let api = Arc::new(StubApi::new(policy));

    let gate = build_gate(page.clone(), api, GateOverrides::default());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    assert!(gate.is_cloaking_active());
    assert!(!gate.is_blocked());
    assert!(page.is_hidden("secret"));
    assert_eq!(page.observer_count(), 1);
}

#[tokio::test]
async fn destroy_removes_every_artifact_and_detaches() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, visible_overrides());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    gate.render("slot").unwrap();
    let widget = page.last_widget().unwrap();
    page.emit_widget_token(widget, "t1");
    assert!(gate.token().is_some());

    gate.destroy();

    assert!(!gate.is_ready());
    assert_eq!(gate.lifecycle(), Lifecycle::Created);
    assert!(gate.token().is_none());
    assert_eq!(page.pointer_listener_count(), 0);
    assert!(page.child_order("slot").is_empty());
    assert_eq!(page.widget_reset_count(widget), 1);
}

#[tokio::test]
async fn destroy_before_ready_removes_instant_artifacts() {
    let page = page_with_slot();
    let (api, _release) = StubApi::held(turnstile_policy());
    let gate = build_gate(page.clone(), api, GateOverrides::default());

    gate.render("slot").unwrap();
    assert_eq!(page.surfaces_in("slot", "start-button").len(), 1);

    gate.destroy();

    assert!(!gate.is_ready());
    assert_eq!(gate.lifecycle(), Lifecycle::Created);
    assert!(gate.token().is_none());
    assert!(page.child_order("slot").is_empty());
    assert_eq!(page.pointer_listener_count(), 0);
}

#[tokio::test]
async fn destroy_from_blocked_keeps_block_sticky() {
    let page = page_with_slot();
    let mut policy = turnstile_policy();
    policy.cloaking = Some(CloakingPolicy::default());
    let api = Arc::new(StubApi::new(policy));

    let gate = BotGate::builder("sk-test")
        .with_page(page.clone())
        .with_api(api)
        .with_environment(EnvironmentSnapshot::default().with_automation_property("webdriver"))
        .with_rng_seed(7)
        .build()
        .unwrap();

    assert!(!gate.await_ready(Duration::from_millis(300)).await);
    assert!(gate.is_blocked());

    gate.destroy();

    assert!(!gate.is_ready());
    assert!(gate.token().is_none());
    assert!(gate.is_blocked());
    // Renders stay refused after teardown of a blocked session.
    gate.render("slot").unwrap();
    assert!(page.surfaces_in("slot", "start-button").is_empty());
}

#[tokio::test]
async fn reset_clears_token_and_resets_widget() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page.clone(), api, visible_overrides());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    gate.render("slot").unwrap();
    let widget = page.last_widget().unwrap();
    page.emit_widget_token(widget, "t1");

    gate.reset();
    assert!(gate.token().is_none());
    assert_eq!(page.widget_reset_count(widget), 1);
}

#[tokio::test]
async fn init_callback_fires_immediately_once_ready() {
    let page = page_with_slot();
    let api = Arc::new(StubApi::new(turnstile_policy()));
    let gate = build_gate(page, api, GateOverrides::default());
    assert!(gate.await_ready(Duration::from_secs(2)).await);

    let fired = Arc::new(Mutex::new(false));
    let sink = fired.clone();
    gate.on_init(move || *sink.lock().unwrap() = true);
    assert!(*fired.lock().unwrap());
}
