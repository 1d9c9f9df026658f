use std::sync::Arc;

use chrono::{TimeZone, Utc};
use cloud_sql_connector::admin_client::AdminClient;
use cloud_sql_connector::connection_name::ConnectionName;
use cloud_sql_connector::credentials::StaticTokenProvider;
use cloud_sql_connector::error::ConnectorError;
use rcgen::{CertificateParams, KeyPair};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn self_signed_cert_pem(not_after: chrono::DateTime<Utc>) -> String {
    let key_pair = KeyPair::generate().expect("key pair generation");
    let mut params = CertificateParams::new(vec!["sql-instance.invalid".to_string()])
        .expect("certificate params");
    params.not_after = not_after.into();
    let cert = params.self_signed(&key_pair).expect("self-signed cert");
    cert.pem()
}

fn test_credentials() -> Arc<StaticTokenProvider> {
    Arc::new(StaticTokenProvider::new(
        "admin-token",
        "login-token",
        Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn get_metadata_returns_ip_addresses_and_server_ca() {
    let server = MockServer::start().await;
    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let ca_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::days(3650));

    Mock::given(method("GET"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst/connectSettings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "region": "us-central1",
            "ipAddresses": [{"type": "PRIMARY", "ipAddress": "10.0.0.1"}],
            "serverCaCert": {"cert": ca_pem},
            "databaseVersion": "POSTGRES_15",
        })))
        .mount(&server)
        .await;

    let client = AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap();
    let metadata = client.get_metadata(&conn_name).await.unwrap();

    assert_eq!(metadata.ip_addresses.get("PRIMARY").unwrap(), "10.0.0.1");
    assert_eq!(metadata.database_version, "POSTGRES_15");
}

#[tokio::test]
async fn get_metadata_rejects_region_mismatch() {
    let server = MockServer::start().await;
    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let ca_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::days(3650));

    Mock::given(method("GET"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst/connectSettings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "region": "europe-west1",
            "ipAddresses": [],
            "serverCaCert": {"cert": ca_pem},
            "databaseVersion": "POSTGRES_15",
        })))
        .mount(&server)
        .await;

    let client = AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap();
    let result = client.get_metadata(&conn_name).await;

    assert!(matches!(result, Err(ConnectorError::RegionMismatch { .. })));
}

#[tokio::test]
async fn get_ephemeral_clamps_expiration_to_login_token_when_iam_auth_enabled() {
    let server = MockServer::start().await;
    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    // certificate outlives the IAM login token, so the returned expiration
    // should be clamped down to the token's (earlier) expiry.
    let cert_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::days(3650));

    Mock::given(method("POST"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst:generateEphemeralCert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ephemeralCert": {"cert": cert_pem},
        })))
        .mount(&server)
        .await;

    let login_expiry = Utc::now() + chrono::Duration::minutes(50);
    let credentials = Arc::new(StaticTokenProvider::new(
        "admin-token",
        "login-token",
        login_expiry,
    ));
    let client = AdminClient::new(credentials, Some(server.uri()), None, None).unwrap();

    let (_cert, expiration) = client
        .get_ephemeral(&conn_name, "pub-key-pem", true)
        .await
        .unwrap();

    assert!((expiration - login_expiry).num_seconds().abs() <= 1);
}

#[tokio::test]
async fn admin_api_error_status_is_reported() {
    let server = MockServer::start().await;
    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();

    Mock::given(method("GET"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst/connectSettings"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;

    let client = AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap();
    let result = client.get_metadata(&conn_name).await;

    match result {
        Err(ConnectorError::AdminApiError { status, message }) => {
            assert_eq!(status, 403);
            assert!(message.contains("Cloud SQL Admin API"));
            assert!(message.contains("permission denied"));
        }
        other => panic!("expected AdminApiError, got {other:?}"),
    }
}
