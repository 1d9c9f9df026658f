use std::sync::Arc;

use chrono::{TimeZone, Utc};
use cloud_sql_connector::admin_client::AdminClient;
use cloud_sql_connector::cache::RefreshAheadCache;
use cloud_sql_connector::connection_info::IpKind;
use cloud_sql_connector::connection_name::ConnectionName;
use cloud_sql_connector::credentials::StaticTokenProvider;
use cloud_sql_connector::error::ConnectorError;
use cloud_sql_connector::key_material::KeyMaterial;
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

async fn mount_happy_path(server: &MockServer, database_version: &str) {
    let ca_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::days(3650));
    let ephemeral_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::hours(1));

    Mock::given(method("GET"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst/connectSettings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "region": "us-central1",
            "ipAddresses": [{"type": "PRIMARY", "ipAddress": "10.0.0.5"}],
            "serverCaCert": {"cert": ca_pem},
            "databaseVersion": database_version,
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst:generateEphemeralCert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ephemeralCert": {"cert": ephemeral_pem},
        })))
        .mount(server)
        .await;
}

fn test_credentials() -> Arc<StaticTokenProvider> {
    Arc::new(StaticTokenProvider::new(
        "admin-token",
        "login-token",
        Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn connect_info_resolves_after_initial_refresh() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "POSTGRES_15").await;

    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let admin_client = Arc::new(
        AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap(),
    );
    let keys = Arc::new(KeyMaterial::generate().unwrap());
    let cache = RefreshAheadCache::new(conn_name, admin_client, keys, false);

    let (info, ip) = cache.connect_info(IpKind::Primary).await.unwrap();
    assert_eq!(ip, "10.0.0.5");
    assert_eq!(info.database_version, "POSTGRES_15");
}

#[tokio::test]
async fn iam_auth_unsupported_on_sqlserver_engine() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "SQLSERVER_2019_STANDARD").await;

    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let admin_client = Arc::new(
        AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap(),
    );
    let keys = Arc::new(KeyMaterial::generate().unwrap());
    let cache = RefreshAheadCache::new(conn_name, admin_client, keys, true);

    let result = cache.connect_info(IpKind::Primary).await;
    match result {
        Err(ConnectorError::IamAuthUnsupported(engine)) => {
            assert_eq!(engine, "SQLSERVER_2019_STANDARD");
        }
        other => panic!("expected IamAuthUnsupported, got {other:?}"),
    }
}

#[tokio::test]
async fn force_refresh_keeps_valid_current_available_while_pending() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "POSTGRES_15").await;

    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let admin_client = Arc::new(
        AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap(),
    );
    let keys = Arc::new(KeyMaterial::generate().unwrap());
    let cache = RefreshAheadCache::new(conn_name, admin_client, keys, false);

    let (first, _) = cache.connect_info(IpKind::Primary).await.unwrap();
    cache.force_refresh().await;
    let (second, _) = cache.connect_info(IpKind::Primary).await.unwrap();

    // The first fetch was still valid (1 hour left), so force_refresh
    // should not have blocked connect_info on a brand new certificate.
    assert_eq!(first.ephemeral_cert_pem, second.ephemeral_cert_pem);
}

#[tokio::test]
async fn missing_ip_type_reports_not_found() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "POSTGRES_15").await;

    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let admin_client = Arc::new(
        AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap(),
    );
    let keys = Arc::new(KeyMaterial::generate().unwrap());
    let cache = RefreshAheadCache::new(conn_name, admin_client, keys, false);

    let result = cache.connect_info(IpKind::Private).await;
    assert!(matches!(result, Err(ConnectorError::IpTypeNotFound(_))));
}
