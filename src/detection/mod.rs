//! Heuristic signal collectors.
//!
//! Stateless scans over an [`EnvironmentSnapshot`] of the embedding runtime.
//! Each triggered check adds its fixed weight to the evidence score; high
//! confidence signals additionally mark the session as a definite bot or a
//! crawler. Evidence accumulates - there is no early exit.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// User-agent fragments that mark crawlers and automation frameworks.
const CRAWLER_UA_PATTERNS: &[&str] = &[
    "bot",
    "crawl",
    "spider",
    "slurp",
    "mediapartners",
    "headless",
    "phantom",
    "selenium",
    "webdriver",
];

/// Properties only automation tooling installs on navigator-like objects.
const AUTOMATION_PROPERTIES: &[&str] = &[
    "webdriver",
    "__nightmare",
    "_phantom",
    "callPhantom",
    "__selenium_unwrapped",
];

/// Automation-only globals on the window object itself.
const WINDOW_AUTOMATION_PROPERTIES: &[&str] = &[
    "domAutomation",
    "domAutomationController",
    "__webdriver_script_fn",
];

static CRAWLER_UA_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    CRAWLER_UA_PATTERNS
        .iter()
        .map(|pattern| build_ua_regex(pattern))
        .collect()
});

static MOBILE_RE: Lazy<Regex> =
    Lazy::new(|| build_ua_regex("Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini"));
static IPAD_RE: Lazy<Regex> = Lazy::new(|| build_ua_regex("iPad"));
static ANDROID_RE: Lazy<Regex> = Lazy::new(|| build_ua_regex("Android"));
static CHROME_RE: Lazy<Regex> = Lazy::new(|| build_ua_regex("Chrome"));
static MOBILE_HINT_RE: Lazy<Regex> = Lazy::new(|| build_ua_regex("Mobile|Android"));
static LEGACY_OS_RE: Lazy<Regex> = Lazy::new(|| build_ua_regex(r"Windows NT (5\.|6\.0|6\.1)"));

fn build_ua_regex(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid user-agent regex `{pattern}`: {err}"))
}

/// Ambient signals read once from the embedding runtime. Hosts with a real
/// browser bridge fill this from their globals; headless embeds use the
/// default, which looks like an ordinary desktop Chrome.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshot {
    pub user_agent: String,
    /// Automation-only properties present on the navigator-like object.
    pub automation_properties: HashSet<String>,
    /// Automation-only properties present on the window-like object.
    pub window_properties: HashSet<String>,
    /// The runtime's explicit automation flag (navigator.webdriver).
    pub webdriver_flag: bool,
    /// Whether the browser the user agent claims actually exposes its global.
    pub has_chrome_global: bool,
    pub languages: Vec<String>,
    /// `None` when the plugins capability is absent entirely.
    pub plugin_count: Option<u32>,
    pub has_permissions_api: bool,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                .into(),
            automation_properties: HashSet::new(),
            window_properties: HashSet::new(),
            webdriver_flag: false,
            has_chrome_global: true,
            languages: vec!["en-US".into(), "en".into()],
            plugin_count: Some(3),
            has_permissions_api: true,
        }
    }
}

impl EnvironmentSnapshot {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_automation_property(mut self, property: impl Into<String>) -> Self {
        self.automation_properties.insert(property.into());
        self
    }

    pub fn with_window_property(mut self, property: impl Into<String>) -> Self {
        self.window_properties.insert(property.into());
        self
    }
}

/// Accumulated bot evidence for one session. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct DetectionEvidence {
    pub score: u32,
    pub definite_bot: bool,
    pub crawler: bool,
    /// Names of the checks that fired, for diagnostics.
    pub checks: Vec<String>,
}

/// Device classification derived once from the user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClass {
    pub device_type: DeviceType,
    /// Windows XP / Vista / 7 signatures the challenge vendors no longer
    /// support.
    pub legacy_os: bool,
}

/// Stateless bot scan. Weights are fixed; matching user-agent patterns each
/// add their own score.
pub fn detect_bot(env: &EnvironmentSnapshot) -> DetectionEvidence {
    let mut evidence = DetectionEvidence::default();

    for regex in CRAWLER_UA_REGEXES.iter() {
        if regex.is_match(&env.user_agent) {
            evidence.score += 2;
            evidence.crawler = true;
            evidence.checks.push("user_agent".into());
        }
    }

    for property in AUTOMATION_PROPERTIES {
        if env.automation_properties.contains(*property) {
            evidence.score += 3;
            evidence.definite_bot = true;
            evidence.checks.push(format!("property_{property}"));
        }
    }

    for property in WINDOW_AUTOMATION_PROPERTIES {
        if env.window_properties.contains(*property) {
            evidence.score += 3;
            evidence.definite_bot = true;
            evidence.checks.push(format!("window_{property}"));
        }
    }

    if env.webdriver_flag {
        evidence.score += 3;
        evidence.definite_bot = true;
        evidence.checks.push("webdriver".into());
    }

    if !env.has_chrome_global && CHROME_RE.is_match(&env.user_agent) {
        evidence.score += 1;
        evidence.checks.push("chrome_mismatch".into());
    }

    if env.languages.is_empty() {
        evidence.score += 1;
        evidence.checks.push("no_languages".into());
    }

    if env.plugin_count == Some(0) && !MOBILE_HINT_RE.is_match(&env.user_agent) {
        evidence.score += 1;
        evidence.checks.push("no_plugins".into());
    }

    if !env.has_permissions_api {
        evidence.score += 1;
        evidence.checks.push("no_permissions".into());
    }

    evidence
}

/// Classify the device from the user-agent string.
pub fn check_device(user_agent: &str) -> DeviceClass {
    let tablet =
        IPAD_RE.is_match(user_agent) || (ANDROID_RE.is_match(user_agent) && !user_agent.contains("Mobile"));
    let device_type = if tablet {
        DeviceType::Tablet
    } else if MOBILE_RE.is_match(user_agent) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    };

    DeviceClass {
        device_type,
        legacy_os: LEGACY_OS_RE.is_match(user_agent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_environment_scores_zero() {
        let evidence = detect_bot(&EnvironmentSnapshot::default());
        assert_eq!(evidence.score, 0);
        assert!(!evidence.definite_bot);
        assert!(!evidence.crawler);
        assert!(evidence.checks.is_empty());
    }

    #[test]
    fn score_is_sum_of_triggered_weights() {
        // "HeadlessChrome" matches both "headless" and "chrome_mismatch"
        // territory: headless UA (+2), webdriver flag (+3), empty languages
        // (+1), missing permissions (+1).
        let env = EnvironmentSnapshot {
            user_agent: "Mozilla/5.0 HeadlessChrome/126.0".into(),
            webdriver_flag: true,
            has_chrome_global: true,
            languages: Vec::new(),
            has_permissions_api: false,
            ..EnvironmentSnapshot::default()
        };
        let evidence = detect_bot(&env);
        assert_eq!(evidence.score, 2 + 3 + 1 + 1);
        assert!(evidence.definite_bot);
        assert!(evidence.crawler);
    }

    #[test]
    fn each_matching_ua_pattern_adds_its_own_weight() {
        let env = EnvironmentSnapshot::default().with_user_agent("SuperBot spider crawler v2");
        // "bot", "crawl", "spider" all match.
        let evidence = detect_bot(&env);
        assert_eq!(evidence.score, 6);
        assert!(evidence.crawler);
        assert!(!evidence.definite_bot);
        assert_eq!(
            evidence.checks.iter().filter(|c| *c == "user_agent").count(),
            3
        );
    }

    #[test]
    fn automation_property_marks_definite_bot() {
        let env = EnvironmentSnapshot::default().with_automation_property("_phantom");
        let evidence = detect_bot(&env);
        assert_eq!(evidence.score, 3);
        assert!(evidence.definite_bot);
        assert!(evidence.checks.contains(&"property__phantom".to_string()));
    }

    #[test]
    fn unknown_properties_do_not_score() {
        let env = EnvironmentSnapshot::default().with_automation_property("myCustomThing");
        assert_eq!(detect_bot(&env).score, 0);
    }

    #[test]
    fn chrome_ua_without_chrome_global_is_suspicious() {
        let env = EnvironmentSnapshot {
            has_chrome_global: false,
            ..EnvironmentSnapshot::default()
        };
        let evidence = detect_bot(&env);
        assert_eq!(evidence.score, 1);
        assert!(evidence.checks.contains(&"chrome_mismatch".to_string()));
    }

    #[test]
    fn zero_plugins_only_counts_on_desktop_agents() {
        let desktop = EnvironmentSnapshot {
            plugin_count: Some(0),
            ..EnvironmentSnapshot::default()
        };
        assert_eq!(detect_bot(&desktop).score, 1);

        let mobile = EnvironmentSnapshot {
            plugin_count: Some(0),
            user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari".into(),
            ..EnvironmentSnapshot::default()
        };
        assert_eq!(detect_bot(&mobile).score, 0);
    }

    #[test]
    fn device_classification_covers_the_three_classes() {
        assert_eq!(
            check_device("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)").device_type,
            DeviceType::Mobile
        );
        assert_eq!(
            check_device("Mozilla/5.0 (iPad; CPU OS 17_0)").device_type,
            DeviceType::Tablet
        );
        assert_eq!(
            check_device("Mozilla/5.0 (Linux; Android 14; SM-X910)").device_type,
            DeviceType::Tablet
        );
        assert_eq!(
            check_device("Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile").device_type,
            DeviceType::Mobile
        );
        assert_eq!(
            check_device("Mozilla/5.0 (Windows NT 10.0; Win64; x64)").device_type,
            DeviceType::Desktop
        );
    }

    #[test]
    fn legacy_windows_signatures_are_flagged() {
        assert!(check_device("Mozilla/5.0 (Windows NT 5.1)").legacy_os);
        assert!(check_device("Mozilla/5.0 (Windows NT 6.0)").legacy_os);
        assert!(check_device("Mozilla/5.0 (Windows NT 6.1; WOW64)").legacy_os);
        assert!(!check_device("Mozilla/5.0 (Windows NT 6.2)").legacy_os);
        assert!(!check_device("Mozilla/5.0 (Windows NT 10.0)").legacy_os);
    }
}
