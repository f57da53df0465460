//! # CRMONCE Dynamics 365 Gateway
//!
//! Remote-entity gateway between the CRMONCE website backend and the
//! Microsoft Dynamics 365 Web API. The gateway authenticates with an Azure
//! AD client-credentials grant, validates and cleans inbound contact/lead
//! records, maps them to Dynamics attribute names, and performs the
//! create/read/update operations the website needs.
//!
//! ## Features
//!
//! - **Token caching**: a cached bearer token is reused until a safety
//!   margin before its stated expiry; refreshes are single-flight under
//!   concurrency
//! - **Two-pass validation**: missing required fields fail fast; all other
//!   rule violations on a record are collected and reported together
//! - **Error taxonomy**: locally rejected input, remotely rejected input
//!   (OData error envelope), and transport failures are distinguishable
//!   error kinds, so callers know whether to fix the data or retry later
//! - **No hidden resilience**: the gateway performs no retries, backoff, or
//!   circuit breaking; retry policy belongs to the caller
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dynamics_gateway::{ContactRecord, DynamicsConfig, DynamicsGateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DynamicsConfig::from_env()?;
//!     let gateway = DynamicsGateway::new(config)?;
//!
//!     let record = ContactRecord {
//!         first_name: Some("John".to_string()),
//!         last_name: Some("Doe".to_string()),
//!         email: Some("john@co.com".to_string()),
//!         ..ContactRecord::default()
//!     };
//!     let contact = gateway.create_contact(record.into_record()).await?;
//!     println!("created contact {}", contact.contactid);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod token;
pub mod validation;

// Re-export main types for easier usage
pub use config::DynamicsConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{escape_odata, DynamicsGateway, DEFAULT_SIGNUP_SOURCE};
pub use models::{
    ContactDetails, ContactRecord, ExternalContact, ExternalLead, Interests, LeadRecord, Record,
};
pub use token::{AccessToken, InMemoryTokenCache, TokenCache};
pub use validation::{
    validate_and_clean, FieldRule, RuleSet, ValidationOptions, Violation, FORM_RULES,
    SIGNUP_REQUIRED,
};

/// Version information for the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "dynamics-gateway";
