//! Bot/cloaking decision engine.
//!
//! Combines the collected evidence with the site's cloaking policy into a
//! single allow/block decision. Checks run in a fixed order; a later check
//! can only add or confirm a block, never clear one, and the surfaced reason
//! is whichever check fired last. The last-write-wins reason is observed
//! behaviour downstream consumers rely on - keep it.

use serde::Deserialize;

use crate::detection::{DetectionEvidence, DeviceClass, DeviceType};
use crate::page::{HostPage, ObserverId};

/// Selector hidden from suspected bots when none is configured.
pub const DEFAULT_HIDE_SELECTOR: &str = ".bot-hide";

/// How aggressively the engine blocks on accumulated evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityMode {
    #[default]
    Standard,
    Moderate,
    Aggressive,
}

/// Per-site cloaking rules delivered inside the site policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CloakingPolicy {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SensitivityMode,
    #[serde(default)]
    pub block_crawlers: bool,
    #[serde(default)]
    pub blocked_countries: Vec<String>,
    #[serde(default)]
    pub blocked_devices: Vec<DeviceType>,
    /// Absolute URL to navigate to, or inline fallback markup.
    #[serde(default)]
    pub fallback_page_url: Option<String>,
    #[serde(default = "default_selector")]
    pub hide_elements_selector: String,
}

fn default_enabled() -> bool {
    true
}

fn default_selector() -> String {
    DEFAULT_HIDE_SELECTOR.into()
}

impl Default for CloakingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SensitivityMode::Standard,
            block_crawlers: false,
            blocked_countries: Vec::new(),
            blocked_devices: Vec::new(),
            fallback_page_url: None,
            hide_elements_selector: default_selector(),
        }
    }
}

/// Outcome of the decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub blocked: bool,
    pub reason: String,
}

impl Decision {
    fn allow() -> Self {
        Self {
            blocked: false,
            reason: String::new(),
        }
    }
}

/// Run every check in order and produce the block decision.
pub fn decide(
    policy: &CloakingPolicy,
    evidence: &DetectionEvidence,
    device: &DeviceClass,
    country: Option<&str>,
) -> Decision {
    if !policy.enabled {
        return Decision::allow();
    }

    let mut blocked = false;
    let mut reason = String::new();

    match policy.mode {
        SensitivityMode::Standard => {
            if evidence.definite_bot || device.legacy_os {
                blocked = true;
                reason = if evidence.definite_bot {
                    "Bot detected".into()
                } else {
                    "Unsupported OS".into()
                };
            }
        }
        SensitivityMode::Moderate => {
            if evidence.score >= 3 || device.legacy_os {
                blocked = true;
                reason = "Suspicious activity detected".into();
            }
        }
        SensitivityMode::Aggressive => {
            if evidence.score >= 2 || device.legacy_os {
                blocked = true;
                reason = "Security check failed".into();
            }
        }
    }

    if policy.block_crawlers && evidence.crawler {
        blocked = true;
        reason = "Crawler blocked".into();
    }

    if let Some(country) = country
        && policy.blocked_countries.iter().any(|c| c == country)
    {
        blocked = true;
        reason = "Geographic restriction".into();
    }

    if policy.blocked_devices.contains(&device.device_type) {
        blocked = true;
        reason = "Device not allowed".into();
    }

    Decision { blocked, reason }
}

/// External-facing reaction to a block: navigate to an absolute fallback,
/// swap in inline fallback markup, or show the built-in denial notice.
pub fn handle_block(page: &dyn HostPage, policy: &CloakingPolicy, reason: &str) {
    log::warn!("access blocked: {reason}");
    match policy.fallback_page_url.as_deref() {
        Some(fallback) if fallback.starts_with("http") => page.navigate(fallback),
        Some(markup) => page.replace_body(markup),
        None => page.show_denial(reason),
    }
}

/// Hide configured elements now and keep hiding matching nodes added later,
/// for the lifetime of the page.
pub fn apply_element_hiding(page: &dyn HostPage, policy: &CloakingPolicy) -> ObserverId {
    page.hide_matching(&policy.hide_elements_selector)
}
