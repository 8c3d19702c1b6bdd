//! # botgate
//!
//! Client-embedded access-control gate in front of challenge widgets.
//!
//! A gate instance fetches its site policy, scores the embedding environment
//! for automation signals, and either blocks the visitor or renders a
//! Turnstile/hCaptcha challenge, optionally hidden behind a click-gated
//! affordance and surrounded by decoy containers.
//!
//! ## Features
//!
//! - Heuristic bot scoring with configurable cloaking sensitivity
//! - Pointer-motion classifier gating the hidden-mode affordance
//! - Decoy-container obfuscation of the real challenge mount
//! - Turnstile and hCaptcha providers behind one trait
//! - Async bootstrap with instant render and a deferred mount queue
//!
//! ## Example
//!
//! ```no_run
//! use botgate::{BotGate, GateOverrides};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gate = BotGate::new("site-key-from-dashboard", GateOverrides::default())?;
//!     gate.on_success(|token| println!("challenge token: {token}"));
//!     gate.render("captcha-container")?;
//!     Ok(())
//! }
//! ```

mod gate;

pub mod api;
pub mod behavior;
pub mod cloaking;
pub mod config;
pub mod detection;
pub mod obfuscation;
pub mod page;
pub mod providers;

pub use crate::gate::{
    BotGate,
    BotGateBuilder,
    GateError,
    GateResult,
    Lifecycle,
};

pub use crate::api::{
    ApiError,
    BackendApi,
    GeoLookup,
    HttpBackendApi,
    SitePolicy,
    VerificationOutcome,
    VerificationRequest,
};

pub use crate::behavior::{
    ClickAdmission,
    ClickChecks,
    ClickGate,
    ClickOutcome,
    MotionSample,
    MotionTracker,
};

pub use crate::cloaking::{
    CloakingPolicy,
    Decision,
    SensitivityMode,
};

pub use crate::config::{
    AffordanceConfig,
    AffordanceOverrides,
    GateConfig,
    GateOverrides,
    ProtectionConfig,
    ProtectionOverrides,
    ProviderPreference,
    Theme,
    WidgetSize,
};

pub use crate::detection::{
    DetectionEvidence,
    DeviceClass,
    DeviceType,
    EnvironmentSnapshot,
};

pub use crate::obfuscation::DecoyLayout;

pub use crate::page::{
    HostPage,
    ListenerId,
    MemoryPage,
    ObserverId,
    PointerEvent,
    PointerListener,
    ScriptLoadError,
    Surface,
};

pub use crate::providers::{
    ChallengeProvider,
    ChallengeRelay,
    HCAPTCHA_SCRIPT_URL,
    HcaptchaProvider,
    ProviderError,
    ProviderKind,
    TURNSTILE_SCRIPT_URL,
    TurnstileProvider,
    WidgetId,
    WidgetParams,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
