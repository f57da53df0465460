//! Dynamics 365 Web API gateway
//!
//! This is the remote-entity gateway the website backend calls into:
//! it authenticates against Azure AD with client credentials, validates and
//! cleans inbound form records, maps them to Dynamics attribute names, and
//! performs the create/read/update operations. Remote rejections carrying
//! the OData error envelope are translated into a distinguishable
//! validation-class error; everything else propagates as a transport-class
//! failure.
//!
//! The gateway performs no retries, backoff, or circuit breaking; any retry
//! policy belongs to the caller.

use crate::config::DynamicsConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    ContactDetails, ExternalContact, ExternalLead, ODataCollection, ODataError,
    ODataErrorEnvelope, Record, TokenResponse, WhoAmIResponse,
};
use crate::token::{AccessToken, InMemoryTokenCache, TokenCache};
use crate::validation::{
    is_valid_email, validate_and_clean, ValidationOptions, FORM_RULES, SIGNUP_REQUIRED,
};
use chrono::{Duration, Utc};
use reqwest::{header, Client, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default signup source recorded on website-captured contacts
pub const DEFAULT_SIGNUP_SOURCE: &str = "CRMONCE Website";

/// Dynamics lead-source option value for "Web"
const LEAD_SOURCE_WEB: i64 = 8;

/// `$select` list for the contact-details lookup
const CONTACT_DETAIL_FIELDS: &str = "contactid,firstname,lastname,emailaddress1,new_password,\
telephone1,jobtitle,address1_city,address1_country,new_interests,new_websitesignupdate,\
new_signupsource";

/// Gateway to the Dynamics 365 Web API
pub struct DynamicsGateway {
    config: DynamicsConfig,
    http: Client,
    token_cache: Arc<dyn TokenCache>,
    // Serializes token refreshes so concurrent expired-token observers
    // produce at most one request to the token endpoint
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for DynamicsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicsGateway")
            .field("config", &self.config)
            .field("http", &self.http)
            .finish_non_exhaustive()
    }
}

impl DynamicsGateway {
    /// Create a gateway with the default in-memory token cache. Fails fast
    /// on incomplete configuration, before any network I/O.
    pub fn new(config: DynamicsConfig) -> GatewayResult<Self> {
        Self::with_token_cache(config, Arc::new(InMemoryTokenCache::new()))
    }

    /// Create a gateway with an injected token cache
    pub fn with_token_cache(
        config: DynamicsConfig,
        token_cache: Arc<dyn TokenCache>,
    ) -> GatewayResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .user_agent(concat!("dynamics-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            token_cache,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Get a bearer token, reusing the cached one while it is valid.
    ///
    /// A non-expired cached token is returned with zero network calls.
    /// Expired or absent tokens trigger a client-credentials exchange; the
    /// refresh lock makes that exchange single-flight, and waiters re-check
    /// the cache after acquiring it.
    pub async fn get_access_token(&self) -> GatewayResult<String> {
        if let Some(token) = self.token_cache.get() {
            if !token.is_expired(Utc::now()) {
                debug!(expires_at = %token.expires_at, "Reusing cached access token");
                return Ok(token.value);
            }
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.token_cache.get() {
            if !token.is_expired(Utc::now()) {
                debug!("Access token refreshed by a concurrent caller");
                return Ok(token.value);
            }
        }

        self.fetch_token().await
    }

    async fn fetch_token(&self) -> GatewayResult<String> {
        let token_url = self.config.token_url();
        debug!(token_url = %token_url, "Requesting new access token");

        let params = [
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
            ("scope", self.config.scope()),
        ];

        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Token request failed");
                GatewayError::authentication(format!("Token request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Token endpoint rejected the exchange");
            return Err(GatewayError::authentication(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Token response could not be parsed");
            GatewayError::authentication(format!("Invalid token response: {}", e))
        })?;

        // Refresh ahead of the provider's stated lifetime; clamp the margin
        // so short-lived tokens are not born expired
        let margin = self
            .config
            .token_refresh_margin
            .min(token_response.expires_in / 2)
            .max(0);
        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in - margin);

        let token = AccessToken::new(token_response.access_token, expires_at);
        let value = token.value.clone();
        info!(expires_at = %expires_at, "Acquired new access token");
        self.token_cache.set(token);

        Ok(value)
    }

    /// Execute a Web API request and parse the response.
    ///
    /// Non-2xx responses carrying the OData error envelope become
    /// [`GatewayError::RemoteValidation`] with a message synthesized from
    /// the envelope; other non-2xx responses become
    /// [`GatewayError::ExternalApi`]; network failures stay transport
    /// errors, unmodified.
    pub async fn make_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<Value> {
        let token = self.get_access_token().await?;
        let url = self.config.api_url(path);
        debug!(method = %method, url = %url, "Dynamics request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(&token)
            .header(header::ACCEPT, "application/json")
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Prefer", "return=representation");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let text = response.text().await?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let text = response.text().await.unwrap_or_default();
        if let Ok(ODataErrorEnvelope {
            error: Some(remote),
        }) = serde_json::from_str::<ODataErrorEnvelope>(&text)
        {
            let message = synthesize_remote_message(&remote);
            let body = serde_json::from_str(&text).unwrap_or(Value::Null);
            error!(status = %status, message = %message, "Dynamics rejected the request");
            return Err(GatewayError::remote_validation(message, body));
        }

        error!(status = %status, body = %text, "Dynamics request failed");
        Err(GatewayError::external_api(
            status.as_u16(),
            if text.is_empty() {
                status.to_string()
            } else {
                text
            },
        ))
    }

    /// Validate, map, and create a contact in Dynamics
    pub async fn create_contact(&self, record: Record) -> GatewayResult<ExternalContact> {
        let clean = self.validate_signup(&record, "contact")?;
        let payload = contact_create_payload(&clean);

        info!(
            email = clean.get("email").and_then(serde_json::Value::as_str).unwrap_or(""),
            "Creating Dynamics contact"
        );
        let value = self
            .make_request(Method::POST, "contacts", Some(&Value::Object(payload)))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Validate, map, and create a lead in Dynamics
    pub async fn create_lead(&self, record: Record) -> GatewayResult<ExternalLead> {
        let clean = self.validate_signup(&record, "lead")?;
        let payload = lead_create_payload(&clean);

        info!(
            email = clean.get("email").and_then(serde_json::Value::as_str).unwrap_or(""),
            "Creating Dynamics lead"
        );
        let value = self
            .make_request(Method::POST, "leads", Some(&Value::Object(payload)))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Look up a contact by email address. Returns `None` for zero matches;
    /// never an error for "not found".
    pub async fn get_contact_by_email(
        &self,
        email: &str,
    ) -> GatewayResult<Option<ExternalContact>> {
        let email = self.checked_email(email)?;
        let path = format!(
            "contacts?$filter=emailaddress1 eq '{}'",
            escape_odata(&email)
        );

        let value = self.make_request(Method::GET, &path, None).await?;
        let collection: ODataCollection<ExternalContact> = serde_json::from_value(value)?;
        Ok(collection.value.into_iter().next())
    }

    /// Look up a contact by email with an explicit field selection and
    /// re-shape the result for the application layer
    pub async fn get_contact_details_by_email(
        &self,
        email: &str,
    ) -> GatewayResult<Option<ContactDetails>> {
        let email = self.checked_email(email)?;
        let path = format!(
            "contacts?$select={}&$filter=emailaddress1 eq '{}'",
            CONTACT_DETAIL_FIELDS,
            escape_odata(&email)
        );

        let value = self.make_request(Method::GET, &path, None).await?;
        let collection: ODataCollection<Record> = serde_json::from_value(value)?;
        Ok(collection.value.first().map(contact_details_from))
    }

    /// Update a contact with a partial record. Any subset of fields may be
    /// supplied; only the cleaned fields are sent, with no defaults
    /// injected.
    pub async fn update_contact(
        &self,
        contact_id: &str,
        partial: Record,
    ) -> GatewayResult<ExternalContact> {
        let contact_id = contact_id.trim();
        if contact_id.is_empty() {
            let err =
                GatewayError::invalid_field("id", "required", "Contact id must not be empty");
            error!(field = "id", "Contact update rejected before submission");
            return Err(err);
        }

        let clean = validate_and_clean(&partial, &[], &FORM_RULES, &ValidationOptions::default())
            .map_err(|e| {
            error!(violations = ?e.violations(), "Contact update rejected before submission");
            e
        })?;

        let mut payload = Record::new();
        map_contact_fields(&clean, &mut payload);

        info!(contact_id = %contact_id, fields = payload.len(), "Updating Dynamics contact");
        let path = format!("contacts({})", contact_id);
        let value = self
            .make_request(Method::PATCH, &path, Some(&Value::Object(payload)))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Lightweight connectivity probe against the `WhoAmI` endpoint.
    /// Returns success/failure as a boolean rather than an error.
    pub async fn test_connection(&self) -> bool {
        match self.make_request(Method::GET, "WhoAmI", None).await {
            Ok(value) => match serde_json::from_value::<WhoAmIResponse>(value) {
                Ok(identity) => {
                    info!(user_id = %identity.user_id, "Dynamics connection verified");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "WhoAmI returned an unexpected body");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, error_code = e.error_code(), "Dynamics connectivity check failed");
                false
            }
        }
    }

    fn validate_signup(&self, record: &Record, kind: &str) -> GatewayResult<Record> {
        validate_and_clean(record, SIGNUP_REQUIRED, &FORM_RULES, &ValidationOptions::default())
            .map_err(|e| {
                error!(
                    kind = kind,
                    field = e.field().unwrap_or("<multiple>"),
                    violations = ?e.violations(),
                    "Record rejected before submission"
                );
                e
            })
    }

    fn checked_email(&self, email: &str) -> GatewayResult<String> {
        let email = email.trim();
        if email.is_empty() {
            return Err(GatewayError::invalid_field(
                "email",
                "required",
                "Missing required field: email",
            ));
        }
        if !is_valid_email(email) {
            return Err(GatewayError::invalid_field(
                "email",
                "email",
                "email is not a valid email address",
            ));
        }
        Ok(email.to_string())
    }
}

/// Escape a string literal for an OData `$filter` expression
/// (single quotes are doubled)
pub fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

fn get_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Map cleaned camelCase fields to Dynamics contact attribute names.
/// Only provided fields are mapped; used for both create and update.
fn map_contact_fields(clean: &Record, payload: &mut Record) {
    const DIRECT: &[(&str, &str)] = &[
        ("firstName", "firstname"),
        ("lastName", "lastname"),
        ("email", "emailaddress1"),
        ("phone", "telephone1"),
        ("jobTitle", "jobtitle"),
        ("city", "address1_city"),
        ("country", "address1_country"),
        ("signupSource", "new_signupsource"),
        ("websiteSignupDate", "new_websitesignupdate"),
        ("password", "new_password"),
    ];
    for (from, to) in DIRECT {
        if let Some(value) = get_str(clean, from) {
            payload.insert((*to).to_string(), json!(value));
        }
    }
    if let Some(interests) = joined_interests(clean) {
        payload.insert("new_interests".to_string(), json!(interests));
    }
}

/// Build the full contact-creation payload: mapped fields plus the
/// defaulted signup metadata, the synthesized description, and the active
/// status pair
fn contact_create_payload(clean: &Record) -> Record {
    let mut payload = Record::new();
    map_contact_fields(clean, &mut payload);

    if let Some(description) = synthesize_description(clean) {
        payload.insert("description".to_string(), json!(description));
    }

    payload
        .entry("new_signupsource".to_string())
        .or_insert_with(|| json!(DEFAULT_SIGNUP_SOURCE));
    payload
        .entry("new_websitesignupdate".to_string())
        .or_insert_with(|| json!(Utc::now().to_rfc3339()));

    // Active contact
    payload.insert("statecode".to_string(), json!(0));
    payload.insert("statuscode".to_string(), json!(1));

    payload
}

/// Build the lead-creation payload. Leads carry a company name and a
/// synthesized subject instead of address fields.
fn lead_create_payload(clean: &Record) -> Record {
    let mut payload = Record::new();

    const DIRECT: &[(&str, &str)] = &[
        ("firstName", "firstname"),
        ("lastName", "lastname"),
        ("email", "emailaddress1"),
        ("phone", "telephone1"),
        ("jobTitle", "jobtitle"),
        ("company", "companyname"),
    ];
    for (from, to) in DIRECT {
        if let Some(value) = get_str(clean, from) {
            payload.insert((*to).to_string(), json!(value));
        }
    }

    let full_name = full_name_from(clean);
    payload.insert(
        "subject".to_string(),
        json!(format!("Website signup: {}", full_name)),
    );
    let description = synthesize_description(clean)
        .unwrap_or_else(|| "Lead captured from the CRMONCE website".to_string());
    payload.insert("description".to_string(), json!(description));

    payload.insert("leadsourcecode".to_string(), json!(LEAD_SOURCE_WEB));
    // Open / New
    payload.insert("statecode".to_string(), json!(0));
    payload.insert("statuscode".to_string(), json!(1));

    payload
}

/// Free-text description synthesized from company and job title
fn synthesize_description(clean: &Record) -> Option<String> {
    match (get_str(clean, "company"), get_str(clean, "jobTitle")) {
        (Some(company), Some(job_title)) => {
            Some(format!("Works as {} at {}", job_title, company))
        }
        (Some(company), None) => Some(format!("Works at {}", company)),
        (None, Some(job_title)) => Some(format!("Works as {}", job_title)),
        (None, None) => None,
    }
}

/// Interests as one string: arrays are joined with `", "`, free text is
/// passed through
fn joined_interests(clean: &Record) -> Option<String> {
    match clean.get("interests") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

fn full_name_from(record: &Record) -> String {
    format!(
        "{} {}",
        get_str(record, "firstName").unwrap_or(""),
        get_str(record, "lastName").unwrap_or("")
    )
    .trim()
    .to_string()
}

/// Re-shape a selected contact entity into [`ContactDetails`]
fn contact_details_from(entity: &Record) -> ContactDetails {
    let owned = |key: &str| get_str(entity, key).map(str::to_string);

    let first_name = owned("firstname");
    let last_name = owned("lastname");
    let full_name = format!(
        "{} {}",
        first_name.as_deref().unwrap_or(""),
        last_name.as_deref().unwrap_or("")
    )
    .trim()
    .to_string();

    ContactDetails {
        id: get_str(entity, "contactid").unwrap_or_default().to_string(),
        first_name,
        last_name,
        full_name,
        email: owned("emailaddress1"),
        password: owned("new_password"),
        phone: owned("telephone1"),
        job_title: owned("jobtitle"),
        city: owned("address1_city"),
        country: owned("address1_country"),
        interests: owned("new_interests"),
        signup_date: owned("new_websitesignupdate"),
        signup_source: owned("new_signupsource"),
    }
}

/// Synthesize one descriptive message from the OData error envelope:
/// primary message, per-field detail lines, and the inner-error message
fn synthesize_remote_message(error: &ODataError) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(
        error
            .message
            .clone()
            .unwrap_or_else(|| "Dynamics 365 request failed".to_string()),
    );

    for detail in &error.details {
        if let Some(message) = &detail.message {
            parts.push(format!(
                "{}: {}",
                detail.target.as_deref().unwrap_or("unknown"),
                message
            ));
        }
    }

    if let Some(inner) = &error.innererror {
        if let Some(message) = &inner.message {
            parts.push(message.clone());
        }
    }

    parts.join("; ")
}
