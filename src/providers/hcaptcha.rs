//! hCaptcha adapter.

use std::sync::Arc;

use crate::api::SitePolicy;
use crate::page::HostPage;

use super::{ChallengeProvider, ChallengeRelay, ProviderError, ProviderKind, WidgetId, WidgetParams};

/// hCaptcha behind the uniform provider contract.
#[derive(Debug, Default)]
pub struct HcaptchaProvider;

impl HcaptchaProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ChallengeProvider for HcaptchaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hcaptcha
    }

    fn site_key<'a>(&self, policy: &'a SitePolicy) -> Option<&'a str> {
        policy.hcaptcha_site_key.as_deref()
    }

    fn mount(
        &self,
        page: &dyn HostPage,
        container: &str,
        params: &WidgetParams,
        relay: Arc<dyn ChallengeRelay>,
    ) -> Result<WidgetId, ProviderError> {
        if !page.has_script(ProviderKind::Hcaptcha.script_url()) {
            return Err(ProviderError::NotLoaded(ProviderKind::Hcaptcha));
        }
        page.mount_widget(ProviderKind::Hcaptcha, container, params, relay)
    }

    fn reset(&self, page: &dyn HostPage, widget: WidgetId) -> Result<(), ProviderError> {
        page.reset_widget(ProviderKind::Hcaptcha, widget)
    }
}
