//! Gate configuration.
//!
//! A fixed default configuration deep-merged with a caller-supplied partial
//! override: nested groups merge field by field, scalars and arrays replace.
//! The resolved [`GateConfig`] is immutable for the life of the instance.

use std::time::Duration;

use serde::Deserialize;

/// Default backend the gate talks to.
pub const DEFAULT_API_URL: &str = "https://api.neva-ofm.cc";

/// Which challenge vendor the embed prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    Turnstile,
    Hcaptcha,
    /// Let the gate pick between the two at random when both are configured.
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    Auto,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSize {
    Normal,
    Compact,
}

impl WidgetSize {
    pub fn as_str(self) -> &'static str {
        match self {
            WidgetSize::Normal => "normal",
            WidgetSize::Compact => "compact",
        }
    }
}

/// Presentation hints for the hidden-mode affordance.
#[derive(Debug, Clone, PartialEq)]
pub struct AffordanceConfig {
    pub text: String,
    pub emoji: String,
    pub color: String,
    pub animate_emoji: bool,
}

impl Default for AffordanceConfig {
    fn default() -> Self {
        Self {
            text: "Press here to see captcha".into(),
            emoji: "\u{1F448}".into(),
            color: "white".into(),
            animate_emoji: true,
        }
    }
}

/// Scraping-resistance and bootstrap behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionConfig {
    /// Synthesize decoy containers around the real one.
    pub random_containers: bool,
    pub min_decoys: u32,
    pub max_decoys: u32,
    /// Load both vendors' scripts concurrently during bootstrap.
    pub preload_providers: bool,
    /// Paint an affordance synchronously when render beats readiness.
    pub instant_render: bool,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            random_containers: true,
            min_decoys: 2,
            max_decoys: 5,
            preload_providers: false,
            instant_render: true,
        }
    }
}

/// Fully resolved gate configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub api_url: String,
    pub theme: Theme,
    pub size: WidgetSize,
    pub provider: ProviderPreference,
    /// Hide the real challenge behind a click-gated affordance.
    pub hide_challenge: bool,
    /// Arm the pointer-motion classifier once the gate is ready.
    pub motion_tracking: bool,
    /// Rejected affordance clicks tolerated before the hard stop.
    pub retry_attempts: u32,
    /// Cap on the bounded wait for readiness after an instant-render click.
    pub ready_timeout: Duration,
    pub affordance: AffordanceConfig,
    pub protection: ProtectionConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            theme: Theme::Light,
            size: WidgetSize::Normal,
            provider: ProviderPreference::Both,
            hide_challenge: true,
            motion_tracking: true,
            retry_attempts: 3,
            ready_timeout: Duration::from_secs(30),
            affordance: AffordanceConfig::default(),
            protection: ProtectionConfig::default(),
        }
    }
}

impl GateConfig {
    /// Merge a partial override onto the defaults.
    pub fn resolve(overrides: GateOverrides) -> Self {
        let mut config = GateConfig::default();
        overrides.apply(&mut config);
        config
    }
}

/// Partial override for [`AffordanceConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AffordanceOverrides {
    pub text: Option<String>,
    pub emoji: Option<String>,
    pub color: Option<String>,
    pub animate_emoji: Option<bool>,
}

impl AffordanceOverrides {
    fn apply(self, target: &mut AffordanceConfig) {
        if let Some(text) = self.text {
            target.text = text;
        }
        if let Some(emoji) = self.emoji {
            target.emoji = emoji;
        }
        if let Some(color) = self.color {
            target.color = color;
        }
        if let Some(animate) = self.animate_emoji {
            target.animate_emoji = animate;
        }
    }
}

/// Partial override for [`ProtectionConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProtectionOverrides {
    pub random_containers: Option<bool>,
    pub min_decoys: Option<u32>,
    pub max_decoys: Option<u32>,
    pub preload_providers: Option<bool>,
    pub instant_render: Option<bool>,
}

impl ProtectionOverrides {
    fn apply(self, target: &mut ProtectionConfig) {
        if let Some(value) = self.random_containers {
            target.random_containers = value;
        }
        if let Some(value) = self.min_decoys {
            target.min_decoys = value;
        }
        if let Some(value) = self.max_decoys {
            target.max_decoys = value;
        }
        if let Some(value) = self.preload_providers {
            target.preload_providers = value;
        }
        if let Some(value) = self.instant_render {
            target.instant_render = value;
        }
    }
}

/// Caller-supplied partial configuration. Deserializable so hosts can pass
/// it straight through as JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateOverrides {
    pub api_url: Option<String>,
    pub theme: Option<Theme>,
    pub size: Option<WidgetSize>,
    pub provider: Option<ProviderPreference>,
    pub hide_challenge: Option<bool>,
    pub motion_tracking: Option<bool>,
    pub retry_attempts: Option<u32>,
    pub ready_timeout_secs: Option<u64>,
    pub affordance: Option<AffordanceOverrides>,
    pub protection: Option<ProtectionOverrides>,
}

impl GateOverrides {
    fn apply(self, target: &mut GateConfig) {
        if let Some(api_url) = self.api_url {
            target.api_url = api_url;
        }
        if let Some(theme) = self.theme {
            target.theme = theme;
        }
        if let Some(size) = self.size {
            target.size = size;
        }
        if let Some(provider) = self.provider {
            target.provider = provider;
        }
        if let Some(hide) = self.hide_challenge {
            target.hide_challenge = hide;
        }
        if let Some(tracking) = self.motion_tracking {
            target.motion_tracking = tracking;
        }
        if let Some(attempts) = self.retry_attempts {
            target.retry_attempts = attempts;
        }
        if let Some(secs) = self.ready_timeout_secs {
            target.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(affordance) = self.affordance {
            affordance.apply(&mut target.affordance);
        }
        if let Some(protection) = self.protection {
            protection.apply(&mut target.protection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_behaviour() {
        let config = GateConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.provider, ProviderPreference::Both);
        assert!(config.hide_challenge);
        assert!(config.motion_tracking);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.protection.min_decoys, 2);
        assert_eq!(config.protection.max_decoys, 5);
    }

    #[test]
    fn nested_overrides_merge_field_by_field() {
        let overrides = GateOverrides {
            provider: Some(ProviderPreference::Turnstile),
            protection: Some(ProtectionOverrides {
                max_decoys: Some(9),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = GateConfig::resolve(overrides);
        assert_eq!(config.provider, ProviderPreference::Turnstile);
        // Untouched siblings inside the nested group keep their defaults.
        assert_eq!(config.protection.min_decoys, 2);
        assert_eq!(config.protection.max_decoys, 9);
        assert!(config.protection.random_containers);
    }

    #[test]
    fn overrides_deserialize_from_json() {
        let overrides: GateOverrides = serde_json::from_str(
            r#"{
                "theme": "dark",
                "hide_challenge": false,
                "affordance": { "text": "Show me" },
                "protection": { "instant_render": false }
            }"#,
        )
        .unwrap();
        let config = GateConfig::resolve(overrides);
        assert_eq!(config.theme, Theme::Dark);
        assert!(!config.hide_challenge);
        assert_eq!(config.affordance.text, "Show me");
        assert!(!config.protection.instant_render);
        assert_eq!(config.affordance.color, "white");
    }
}
