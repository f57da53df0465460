//! HTTP-level tests for the Dynamics 365 gateway, driven against a mock
//! Web API and token endpoint.

use dynamics_gateway::{DynamicsConfig, DynamicsGateway};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> DynamicsGateway {
    let config = DynamicsConfig {
        base_url: server.uri(),
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        tenant_id: "test-tenant".to_string(),
        authority_url: server.uri(),
        ..DynamicsConfig::default()
    };
    DynamicsGateway::new(config).expect("gateway config is complete")
}

async fn mount_token_endpoint(server: &MockServer, expected_requests: u64) {
    Mock::given(method("POST"))
        .and(path("/test-tenant/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=test-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-access-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(expected_requests)
        .mount(server)
        .await;
}

fn signup_record(email: &str) -> dynamics_gateway::Record {
    match json!({
        "firstName": "John",
        "lastName": "Doe",
        "email": email
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn cached_token_is_reused_within_its_validity_window() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;
    let gateway = gateway_for(&server);

    let first = gateway.get_access_token().await?;
    let second = gateway.get_access_token().await?;

    assert_eq!(first, "test-access-token");
    assert_eq!(first, second);
    // The mock's expect(1) verifies the second call made zero HTTP requests
    Ok(())
}

#[tokio::test]
async fn concurrent_callers_share_a_single_token_refresh() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;
    let gateway = gateway_for(&server);

    let (a, b, c) = tokio::join!(
        gateway.get_access_token(),
        gateway.get_access_token(),
        gateway.get_access_token()
    );

    assert_eq!(a?, "test-access-token");
    assert_eq!(b?, "test-access-token");
    assert_eq!(c?, "test-access-token");
    Ok(())
}

#[tokio::test]
async fn rejected_token_exchange_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/test-tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .mount(&server)
        .await;
    let gateway = gateway_for(&server);

    let error = gateway.get_access_token().await.unwrap_err();
    assert_eq!(error.error_code(), "AUTHENTICATION_ERROR");
    assert!(error.to_string().contains("401"));
}

#[test_log::test(tokio::test)]
async fn create_contact_sends_mapped_payload_with_defaults() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/api/data/v9.2/contacts"))
        .and(header("Authorization", "Bearer test-access-token"))
        .and(header("OData-MaxVersion", "4.0"))
        .and(header("OData-Version", "4.0"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({
            "firstname": "John",
            "lastname": "Doe",
            "emailaddress1": "john@co.com",
            "new_signupsource": "CRMONCE Website",
            "statecode": 0,
            "statuscode": 1
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "contactid": "00000000-0000-0000-0000-000000000001",
            "firstname": "John",
            "lastname": "Doe",
            "emailaddress1": "john@co.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let contact = gateway.create_contact(signup_record("john@co.com")).await?;

    assert_eq!(contact.contactid, "00000000-0000-0000-0000-000000000001");
    assert_eq!(contact.emailaddress1.as_deref(), Some("john@co.com"));
    Ok(())
}

#[tokio::test]
async fn invalid_record_fails_before_any_network_call() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 0).await;
    let gateway = gateway_for(&server);

    let record = match json!({"firstName": "John", "phone": "abc-def"}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let error = gateway.create_contact(record).await.unwrap_err();

    assert_eq!(error.error_code(), "VALIDATION_ERROR");
    // Required-field pass fails fast: the phone rule never ran
    let fields: Vec<&str> = error.violations().iter().map(|v| v.field.as_str()).collect();
    assert_eq!(fields, vec!["lastName", "email"]);
}

#[tokio::test]
async fn create_lead_maps_company_and_synthesized_subject() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/api/data/v9.2/leads"))
        .and(body_partial_json(json!({
            "firstname": "Jane",
            "lastname": "Smith",
            "emailaddress1": "jane@co.com",
            "companyname": "Contoso",
            "subject": "Website signup: Jane Smith",
            "leadsourcecode": 8
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "leadid": "00000000-0000-0000-0000-0000000000aa",
            "firstname": "Jane",
            "lastname": "Smith",
            "emailaddress1": "jane@co.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let record = match json!({
        "firstName": "Jane",
        "lastName": "Smith",
        "email": "jane@co.com",
        "company": "Contoso"
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let lead = gateway.create_lead(record).await?;

    assert_eq!(lead.leadid, "00000000-0000-0000-0000-0000000000aa");
    Ok(())
}

#[tokio::test]
async fn get_contact_by_email_returns_first_match() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/contacts"))
        .and(query_param("$filter", "emailaddress1 eq 'john@co.com'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "contactid": "00000000-0000-0000-0000-000000000001",
                "firstname": "John",
                "lastname": "Doe",
                "emailaddress1": "john@co.com"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let contact = gateway.get_contact_by_email("john@co.com").await?;

    let contact = contact.expect("contact should be found");
    assert_eq!(contact.emailaddress1.as_deref(), Some("john@co.com"));
    Ok(())
}

#[tokio::test]
async fn get_contact_by_email_returns_none_for_zero_matches() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let contact = gateway.get_contact_by_email("absent@co.com").await?;

    assert!(contact.is_none());
    Ok(())
}

#[tokio::test]
async fn get_contact_by_email_doubles_single_quotes_in_the_filter() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/contacts"))
        .and(query_param("$filter", "emailaddress1 eq 'o''brien@co.com'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let contact = gateway.get_contact_by_email("o'brien@co.com").await?;

    assert!(contact.is_none());
    Ok(())
}

#[tokio::test]
async fn get_contact_by_email_rejects_invalid_email_without_io() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 0).await;
    let gateway = gateway_for(&server);

    let empty = gateway.get_contact_by_email("   ").await.unwrap_err();
    assert_eq!(empty.field(), Some("email"));

    let malformed = gateway.get_contact_by_email("not-an-email").await.unwrap_err();
    assert_eq!(malformed.error_code(), "VALIDATION_ERROR");
    assert_eq!(malformed.violations()[0].rule, "email");
}

#[tokio::test]
async fn get_contact_details_selects_and_reshapes() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/contacts"))
        .and(query_param("$filter", "emailaddress1 eq 'john@co.com'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "contactid": "00000000-0000-0000-0000-000000000001",
                "firstname": "John",
                "lastname": "Doe",
                "emailaddress1": "john@co.com",
                "telephone1": "+15551234567",
                "new_interests": "CRM, Power BI",
                "new_websitesignupdate": "2024-06-01T10:30:00Z",
                "new_signupsource": "CRMONCE Website"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let details = gateway
        .get_contact_details_by_email("john@co.com")
        .await?
        .expect("details should be found");

    assert_eq!(details.id, "00000000-0000-0000-0000-000000000001");
    assert_eq!(details.full_name, "John Doe");
    assert_eq!(details.phone.as_deref(), Some("+15551234567"));
    assert_eq!(details.interests.as_deref(), Some("CRM, Power BI"));
    assert_eq!(details.signup_date.as_deref(), Some("2024-06-01T10:30:00Z"));
    assert_eq!(details.job_title, None);
    Ok(())
}

#[tokio::test]
async fn update_contact_patches_only_cleaned_fields() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("PATCH"))
        .and(path(
            "/api/data/v9.2/contacts(00000000-0000-0000-0000-000000000001)",
        ))
        .and(body_partial_json(json!({"address1_city": "Hyderabad"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contactid": "00000000-0000-0000-0000-000000000001",
            "firstname": "John",
            "address1_city": "Hyderabad"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let partial = match json!({"city": " Hyderabad ", "phone": ""}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let updated = gateway
        .update_contact("00000000-0000-0000-0000-000000000001", partial)
        .await?;

    assert_eq!(updated.contactid, "00000000-0000-0000-0000-000000000001");
    Ok(())
}

#[tokio::test]
async fn update_contact_with_empty_id_makes_zero_network_calls() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 0).await;
    let gateway = gateway_for(&server);

    let partial = match json!({"firstName": "X"}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let error = gateway.update_contact("", partial).await.unwrap_err();

    assert_eq!(error.error_code(), "VALIDATION_ERROR");
    assert_eq!(error.field(), Some("id"));
}

#[tokio::test]
async fn remote_odata_error_becomes_remote_validation() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/api/data/v9.2/contacts"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "0x80040203",
                "message": "Invalid argument",
                "details": [
                    {"target": "emailaddress1", "message": "Invalid email"}
                ],
                "innererror": {"message": "Attribute validation failed"}
            }
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let error = gateway
        .create_contact(signup_record("john@co.com"))
        .await
        .unwrap_err();

    assert_eq!(error.error_code(), "REMOTE_VALIDATION_ERROR");
    assert!(error.is_validation());
    let message = error.to_string();
    assert!(message.contains("Invalid argument"));
    assert!(message.contains("emailaddress1: Invalid email"));
    assert!(message.contains("Attribute validation failed"));
}

#[tokio::test]
async fn unstructured_failure_is_a_transport_class_error() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/api/data/v9.2/contacts"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let error = gateway
        .create_contact(signup_record("john@co.com"))
        .await
        .unwrap_err();

    assert_eq!(error.error_code(), "EXTERNAL_API_ERROR");
    assert!(!error.is_validation());
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_connection_reports_both_outcomes() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/WhoAmI"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "UserId": "00000000-0000-0000-0000-0000000000ff",
            "BusinessUnitId": "00000000-0000-0000-0000-0000000000aa",
            "OrganizationId": "00000000-0000-0000-0000-0000000000bb"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    assert!(gateway.test_connection().await);

    // Unreachable endpoint: still a boolean, never an error
    let dead = MockServer::start().await;
    let unreachable = gateway_for(&dead);
    drop(dead);
    assert!(!unreachable.test_connection().await);
}
