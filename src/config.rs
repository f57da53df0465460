//! Configuration module for the Dynamics 365 gateway
//!
//! Credentials and endpoints are read from the environment (optionally via a
//! `.env` file or a config file named by `DYNAMICS_CONFIG_FILE`). All four
//! connection settings are required before any network operation; a missing
//! value fails fast with a configuration error rather than surfacing later
//! as a transport failure.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for the Dynamics 365 gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicsConfig {
    /// Dynamics 365 organization URL (e.g. `https://org.crm.dynamics.com`)
    pub base_url: String,
    /// Azure AD application (client) id
    pub client_id: String,
    /// Azure AD client secret
    pub client_secret: String,
    /// Azure AD tenant id
    pub tenant_id: String,
    /// Token authority (default: `https://login.microsoftonline.com`)
    pub authority_url: String,
    /// Web API version segment (default: `v9.2`)
    pub api_version: String,
    /// HTTP request timeout in seconds (default: 30)
    pub request_timeout: u64,
    /// Seconds subtracted from the provider's stated token lifetime so a
    /// cached token is never used right at its expiry (default: 600)
    pub token_refresh_margin: i64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            tenant_id: String::new(),
            authority_url: "https://login.microsoftonline.com".to_string(),
            api_version: "v9.2".to_string(),
            request_timeout: 30,
            token_refresh_margin: 600,
        }
    }
}

impl DynamicsConfig {
    /// Load configuration from environment variables (`DYNAMICS_BASE_URL`,
    /// `DYNAMICS_CLIENT_ID`, `DYNAMICS_CLIENT_SECRET`, `DYNAMICS_TENANT_ID`,
    /// plus the optional tuning knobs)
    pub fn from_env() -> GatewayResult<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = config::Config::builder()
            .set_default("base_url", "")
            .and_then(|b| b.set_default("client_id", ""))
            .and_then(|b| b.set_default("client_secret", ""))
            .and_then(|b| b.set_default("tenant_id", ""))
            .and_then(|b| b.set_default("authority_url", "https://login.microsoftonline.com"))
            .and_then(|b| b.set_default("api_version", "v9.2"))
            .and_then(|b| b.set_default("request_timeout", 30))
            .and_then(|b| b.set_default("token_refresh_margin", 600))
            .map_err(|e| GatewayError::configuration(e.to_string()))?
            .add_source(config::Environment::with_prefix("DYNAMICS"));

        if let Ok(config_path) = std::env::var("DYNAMICS_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_path).required(false));
        }

        cfg.build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::configuration(e.to_string()))
    }

    /// Validate the configuration. Every network operation requires all four
    /// connection settings.
    pub fn validate(&self) -> GatewayResult<()> {
        for (name, value) in [
            ("base_url", &self.base_url),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("tenant_id", &self.tenant_id),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::configuration(format!("{} is required", name)));
            }
        }

        Url::parse(&self.base_url)
            .map_err(|e| GatewayError::configuration(format!("Invalid base_url: {}", e)))?;
        Url::parse(&self.authority_url)
            .map_err(|e| GatewayError::configuration(format!("Invalid authority_url: {}", e)))?;

        Ok(())
    }

    /// Azure AD token endpoint for the client-credentials exchange
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// OAuth2 scope for the Web API (`{base_url}/.default`)
    pub fn scope(&self) -> String {
        format!("{}/.default", self.base_url.trim_end_matches('/'))
    }

    /// Full Web API URL for a relative entity path or query
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/data/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version,
            path
        )
    }
}
