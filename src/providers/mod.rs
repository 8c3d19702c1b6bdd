//! Challenge provider lifecycle.
//!
//! Covers provider selection, idempotent script loading (with an optional
//! parallel preload of both vendors), and the fixed relay contract that
//! carries widget callbacks back into the session. The vendor adapters stay
//! behind [`ChallengeProvider`] so the orchestrator never special-cases one
//! of them.

mod hcaptcha;
mod turnstile;

pub use hcaptcha::HcaptchaProvider;
pub use turnstile::TurnstileProvider;

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use thiserror::Error;

use crate::api::SitePolicy;
use crate::config::ProviderPreference;
use crate::page::{HostPage, ScriptLoadError};

/// Script URL for the Cloudflare Turnstile widget library.
pub const TURNSTILE_SCRIPT_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/api.js";
/// Script URL for the hCaptcha widget library.
pub const HCAPTCHA_SCRIPT_URL: &str = "https://js.hcaptcha.com/1/api.js";

/// The two supported challenge vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Turnstile,
    Hcaptcha,
}

impl ProviderKind {
    pub fn script_url(self) -> &'static str {
        match self {
            ProviderKind::Turnstile => TURNSTILE_SCRIPT_URL,
            ProviderKind::Hcaptcha => HCAPTCHA_SCRIPT_URL,
        }
    }

    /// Wire label used in verification payloads.
    pub fn label(self) -> &'static str {
        match self {
            ProviderKind::Turnstile => "turnstile",
            ProviderKind::Hcaptcha => "hcaptcha",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Handle issued by a provider library for a mounted widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WidgetId(pub u64);

/// Parameters handed to the provider's render call.
#[derive(Debug, Clone)]
pub struct WidgetParams {
    pub site_key: String,
    pub theme: String,
    pub size: String,
}

/// Fixed three-member capability interface relaying widget callbacks.
pub trait ChallengeRelay: Send + Sync {
    /// The visitor completed the challenge.
    fn on_token(&self, token: &str);
    /// The widget reported a verification failure.
    fn on_error(&self, message: &str);
    /// A previously issued token expired.
    fn on_expire(&self);
}

/// Errors surfaced by provider selection and widget operations.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("no challenge provider configured for this site")]
    NotConfigured,
    #[error("{0} is not configured for this site")]
    KeyMissing(ProviderKind),
    #[error("provider library not loaded: {0}")]
    NotLoaded(ProviderKind),
    #[error("provider widget error: {0}")]
    Runtime(String),
}

/// Uniform interface over the vendor widget libraries.
pub trait ChallengeProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// This provider's site key in the fetched policy, if configured.
    fn site_key<'a>(&self, policy: &'a SitePolicy) -> Option<&'a str>;

    /// Render the widget into `container`. Any exception thrown by the
    /// underlying library surfaces as [`ProviderError::Runtime`].
    fn mount(
        &self,
        page: &dyn HostPage,
        container: &str,
        params: &WidgetParams,
        relay: Arc<dyn ChallengeRelay>,
    ) -> Result<WidgetId, ProviderError>;

    /// Reset a previously mounted widget by handle.
    fn reset(&self, page: &dyn HostPage, widget: WidgetId) -> Result<(), ProviderError>;
}

/// Pick the provider for this session.
///
/// `both` chooses uniformly at random when the site carries both keys and
/// falls back to whichever single key exists. A pinned preference fails when
/// its key is absent.
pub fn select_provider<R: Rng + ?Sized>(
    preference: ProviderPreference,
    policy: &SitePolicy,
    rng: &mut R,
) -> Result<ProviderKind, ProviderError> {
    let turnstile = policy.turnstile_site_key.is_some();
    let hcaptcha = policy.hcaptcha_site_key.is_some();

    match preference {
        ProviderPreference::Both => match (turnstile, hcaptcha) {
            (true, true) => Ok(if rng.gen_bool(0.5) {
                ProviderKind::Turnstile
            } else {
                ProviderKind::Hcaptcha
            }),
            (true, false) => Ok(ProviderKind::Turnstile),
            (false, true) => Ok(ProviderKind::Hcaptcha),
            (false, false) => Err(ProviderError::NotConfigured),
        },
        ProviderPreference::Turnstile => {
            if turnstile {
                Ok(ProviderKind::Turnstile)
            } else {
                Err(ProviderError::KeyMissing(ProviderKind::Turnstile))
            }
        }
        ProviderPreference::Hcaptcha => {
            if hcaptcha {
                Ok(ProviderKind::Hcaptcha)
            } else {
                Err(ProviderError::KeyMissing(ProviderKind::Hcaptcha))
            }
        }
    }
}

/// Load a provider script unless the page already carries it.
pub async fn ensure_script(page: &dyn HostPage, url: &str) -> Result<(), ScriptLoadError> {
    if page.has_script(url) {
        log::debug!("script already present, skipping load: {url}");
        return Ok(());
    }
    page.load_script(url).await
}

/// Preload both vendors' scripts concurrently, ahead of provider selection.
///
/// One of the two failing is tolerated (logged); only a total failure is an
/// error.
pub async fn preload_all(page: &dyn HostPage) -> Result<(), ScriptLoadError> {
    let (turnstile, hcaptcha) = tokio::join!(
        ensure_script(page, TURNSTILE_SCRIPT_URL),
        ensure_script(page, HCAPTCHA_SCRIPT_URL),
    );

    match (turnstile, hcaptcha) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(err)) | (Err(err), Ok(())) => {
            log::warn!("provider preload partially failed: {err}");
            Ok(())
        }
        (Err(err), Err(other)) => {
            log::warn!("provider preload failed for both vendors: {err}; {other}");
            Err(err)
        }
    }
}
