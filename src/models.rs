//! Data models for the Dynamics 365 gateway
//!
//! Everything here is a transient request/response shape: inbound
//! website-form records, the cleaned/mapped payloads sent to the Web API,
//! and the OData envelopes the Web API answers with. Nothing is persisted
//! by this layer; Dynamics owns the entities.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat field map used for inbound records and outbound payloads.
///
/// Website forms submit loosely shaped JSON objects, so records travel as
/// maps rather than closed structs; [`crate::validation::validate_and_clean`]
/// is what enforces shape and format.
pub type Record = Map<String, Value>;

/// Typed convenience builder for a website signup record. Serializes to the
/// same camelCase field map the forms submit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Either a list of interest labels or a single comma-separated string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interests: Option<Interests>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signup_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_signup_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Lead capture uses the same inbound shape as contact capture; only the
/// external mapping differs.
pub type LeadRecord = ContactRecord;

/// Interests arrive either as an array of labels or a free-text string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interests {
    List(Vec<String>),
    Text(String),
}

impl ContactRecord {
    /// Convert to the flat field map the validator operates on
    pub fn into_record(self) -> Record {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Record::new(),
        }
    }
}

/// Contact entity as returned by the Web API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalContact {
    pub contactid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emailaddress1: Option<String>,
    /// All other attributes returned by the representation preference
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lead entity as returned by the Web API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLead {
    pub leadid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emailaddress1: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Re-shaped contact lookup result for the application layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Trimmed concatenation of first and last name
    pub full_name: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub interests: Option<String>,
    pub signup_date: Option<String>,
    pub signup_source: Option<String>,
}

/// OData collection envelope (`{"value": [...]}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ODataCollection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// OData error envelope (`{"error": {...}}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ODataErrorEnvelope {
    pub error: Option<ODataError>,
}

/// Structured error body from the Web API
#[derive(Debug, Clone, Deserialize)]
pub struct ODataError {
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<ODataErrorDetail>,
    pub innererror: Option<ODataInnerError>,
}

/// Per-field detail inside an OData error
#[derive(Debug, Clone, Deserialize)]
pub struct ODataErrorDetail {
    pub target: Option<String>,
    pub message: Option<String>,
}

/// Inner error inside an OData error
#[derive(Debug, Clone, Deserialize)]
pub struct ODataInnerError {
    pub message: Option<String>,
}

/// Azure AD token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: Option<String>,
}

/// `WhoAmI` identity-check response
#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmIResponse {
    #[serde(rename = "UserId")]
    pub user_id: String,
    #[serde(rename = "BusinessUnitId")]
    pub business_unit_id: Option<String>,
    #[serde(rename = "OrganizationId")]
    pub organization_id: Option<String>,
}
