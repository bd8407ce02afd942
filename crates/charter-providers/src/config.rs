//! Provider credentials and endpoints, loaded from the environment
//!
//! Each partner is configured through three variables, e.g. for Firstbase:
//! `FIRSTBASE_API_KEY`, `FIRSTBASE_WEBHOOK_SECRET`, and an optional
//! `FIRSTBASE_BASE_URL` override. A partner with no API key set is treated
//! as not configured; a partner with an API key but no webhook secret is a
//! startup error, since its webhooks could never be verified.

use charter_core::CoreError;
use std::collections::HashMap;

/// Well-known partner names
pub const FIRSTBASE: &str = "firstbase";
/// Clerky partner name
pub const CLERKY: &str = "clerky";
/// ZenBusiness partner name
pub const ZENBUSINESS: &str = "zenbusiness";
/// Mercury partner name
pub const MERCURY: &str = "mercury";

const KNOWN_PARTNERS: &[(&str, &str)] = &[
    (FIRSTBASE, "https://api.firstbase.com/v1"),
    (CLERKY, "https://api.clerky.com/v1"),
    (ZENBUSINESS, "https://api.zenbusiness.com/v1"),
    (MERCURY, "https://api.mercury.com/v1"),
];

/// Credentials and endpoint for one partner
#[derive(Debug, Clone)]
pub struct PartnerConfig {
    /// Bearer token for outbound calls
    pub api_key: String,
    /// Shared secret for webhook signature verification
    pub webhook_secret: String,
    /// API base URL, overridable per environment
    pub base_url: String,
}

/// All configured partners, keyed by partner name
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    partners: HashMap<String, PartnerConfig>,
}

impl ProvidersConfig {
    /// Load partner configuration from process environment variables
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load partner configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut partners = HashMap::new();

        for (name, default_base_url) in KNOWN_PARTNERS {
            let prefix = name.to_uppercase();
            let Some(api_key) = lookup(&format!("{}_API_KEY", prefix)) else {
                continue;
            };
            let webhook_secret =
                lookup(&format!("{}_WEBHOOK_SECRET", prefix)).ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "{}_API_KEY is set but {}_WEBHOOK_SECRET is missing",
                        prefix, prefix
                    ))
                })?;
            let base_url = lookup(&format!("{}_BASE_URL", prefix))
                .unwrap_or_else(|| default_base_url.to_string());

            partners.insert(
                name.to_string(),
                PartnerConfig {
                    api_key,
                    webhook_secret,
                    base_url: base_url.trim_end_matches('/').to_string(),
                },
            );
        }

        Ok(Self { partners })
    }

    /// Configuration for one partner, if it is configured
    pub fn partner(&self, name: &str) -> Option<&PartnerConfig> {
        self.partners.get(name)
    }

    /// Configuration for one partner, failing fast when it is referenced
    /// but not configured
    pub fn require(&self, name: &str) -> Result<&PartnerConfig, CoreError> {
        self.partner(name).ok_or_else(|| {
            CoreError::Configuration(format!("Partner '{}' is not configured", name))
        })
    }

    /// Names of all configured partners
    pub fn configured(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.partners.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
