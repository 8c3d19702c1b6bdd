//! Backend boundary.
//!
//! The gate consumes three remote endpoints - site policy, geolocation
//! lookup, and token verification - behind the [`BackendApi`] trait so the
//! orchestration code stays independent of the transport. The shipped
//! implementation is a thin `reqwest` adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::cloaking::CloakingPolicy;

/// Per-site policy returned by the configuration service.
#[derive(Debug, Clone, Deserialize)]
pub struct SitePolicy {
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub turnstile_site_key: Option<String>,
    #[serde(default)]
    pub hcaptcha_site_key: Option<String>,
    #[serde(default)]
    pub cloaking: Option<CloakingPolicy>,
    #[serde(default)]
    pub show_branding: bool,
}

impl SitePolicy {
    /// Exact match or sub-domain suffix match against the allow-list.
    pub fn allows_domain(&self, hostname: &str) -> bool {
        self.allowed_domains
            .iter()
            .any(|domain| hostname == domain || hostname.ends_with(&format!(".{domain}")))
    }
}

/// Country resolved by the geolocation service, when it knows one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoLookup {
    #[serde(default)]
    pub country: Option<String>,
}

/// Body of the token-exchange request.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRequest {
    pub site_key: String,
    pub domain: String,
    pub captcha_token: String,
    pub captcha_provider: String,
}

/// Server-issued verification result.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationOutcome {
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Errors surfaced by the backend boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid api base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed backend response: {0}")]
    Decode(String),
}

/// Remote services the gate consumes.
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn fetch_policy(&self, site_key: &str) -> Result<SitePolicy, ApiError>;
    async fn geo_check(&self, site_key: &str) -> Result<GeoLookup, ApiError>;
    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome, ApiError>;
}

/// Reqwest-backed [`BackendApi`] implementation.
pub struct HttpBackendApi {
    base: Url,
    client: reqwest::Client,
}

impl HttpBackendApi {
    pub fn new(api_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            base: Url::parse(api_url)?,
            client: reqwest::Client::new(),
        })
    }

    /// Wrap an existing reqwest client, e.g. one with custom timeouts.
    pub fn with_client(api_url: &str, client: reqwest::Client) -> Result<Self, ApiError> {
        Ok(Self {
            base: Url::parse(api_url)?,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn rejection(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error.unwrap_or_else(|| "request failed".into()),
            Err(_) => "request failed".into(),
        };
        ApiError::Rejected { status, message }
    }
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn fetch_policy(&self, site_key: &str) -> Result<SitePolicy, ApiError> {
        let url = self.endpoint(&format!("/api/config/{site_key}"))?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        response
            .json::<SitePolicy>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn geo_check(&self, site_key: &str) -> Result<GeoLookup, ApiError> {
        let url = self.endpoint("/api/geo-check")?;
        let response = self
            .client
            .get(url)
            .header("X-Site-Key", site_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        response
            .json::<GeoLookup>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome, ApiError> {
        let url = self.endpoint("/api/verify")?;
        let response = self.client.post(url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        response
            .json::<VerificationOutcome>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_allow_list_accepts_exact_and_subdomain() {
        let policy: SitePolicy = serde_json::from_str(
            r#"{ "allowed_domains": ["example.com"], "turnstile_site_key": "k" }"#,
        )
        .unwrap();
        assert!(policy.allows_domain("example.com"));
        assert!(policy.allows_domain("app.example.com"));
        assert!(!policy.allows_domain("example.com.evil.net"));
        assert!(!policy.allows_domain("otherexample.com"));
    }

    #[test]
    fn policy_tolerates_missing_optional_fields() {
        let policy: SitePolicy = serde_json::from_str(r#"{}"#).unwrap();
        assert!(policy.allowed_domains.is_empty());
        assert!(policy.turnstile_site_key.is_none());
        assert!(policy.cloaking.is_none());
        assert!(!policy.show_branding);
    }
}
