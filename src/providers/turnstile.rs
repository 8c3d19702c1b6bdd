//! Cloudflare Turnstile adapter.

use std::sync::Arc;

use crate::api::SitePolicy;
use crate::page::HostPage;

use super::{ChallengeProvider, ChallengeRelay, ProviderError, ProviderKind, WidgetId, WidgetParams};

/// Turnstile behind the uniform provider contract.
#[derive(Debug, Default)]
pub struct TurnstileProvider;

impl TurnstileProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ChallengeProvider for TurnstileProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Turnstile
    }

    fn site_key<'a>(&self, policy: &'a SitePolicy) -> Option<&'a str> {
        policy.turnstile_site_key.as_deref()
    }

    fn mount(
        &self,
        page: &dyn HostPage,
        container: &str,
        params: &WidgetParams,
        relay: Arc<dyn ChallengeRelay>,
    ) -> Result<WidgetId, ProviderError> {
        if !page.has_script(ProviderKind::Turnstile.script_url()) {
            return Err(ProviderError::NotLoaded(ProviderKind::Turnstile));
        }
        page.mount_widget(ProviderKind::Turnstile, container, params, relay)
    }

    fn reset(&self, page: &dyn HostPage, widget: WidgetId) -> Result<(), ProviderError> {
        page.reset_widget(ProviderKind::Turnstile, widget)
    }
}
