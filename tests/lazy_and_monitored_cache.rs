use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use cloud_sql_connector::admin_client::AdminClient;
use cloud_sql_connector::cache::{LazyRefreshCache, MonitoredCache};
use cloud_sql_connector::connection_info::IpKind;
use cloud_sql_connector::connection_name::ConnectionName;
use cloud_sql_connector::credentials::StaticTokenProvider;
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

fn test_credentials() -> Arc<StaticTokenProvider> {
    Arc::new(StaticTokenProvider::new(
        "admin-token",
        "login-token",
        Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap(),
    ))
}

#[tokio::test]
async fn lazy_cache_serves_concurrent_callers_from_a_single_refresh() {
    let server = MockServer::start().await;
    let ca_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::days(3650));
    let ephemeral_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::hours(1));
    let hits = Arc::new(AtomicUsize::new(0));

    Mock::given(method("GET"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst/connectSettings"))
        .respond_with(move |_: &wiremock::Request| {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "region": "us-central1",
                "ipAddresses": [{"type": "PRIMARY", "ipAddress": "10.0.0.9"}],
                "serverCaCert": {"cert": ca_pem},
                "databaseVersion": "POSTGRES_15",
            }))
        })
        .mount(&server)
        .await;

    let hits_clone = hits.clone();
    Mock::given(method("POST"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst:generateEphemeralCert"))
        .respond_with(move |_: &wiremock::Request| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ephemeralCert": {"cert": ephemeral_pem},
            }))
        })
        .mount(&server)
        .await;

    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let admin_client = Arc::new(
        AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap(),
    );
    let keys = Arc::new(KeyMaterial::generate().unwrap());
    let cache = Arc::new(LazyRefreshCache::new(conn_name, admin_client, keys, false));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        handles.push(tokio::spawn(
            async move { cache.connect_info(IpKind::Primary).await },
        ));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn monitored_cache_prunes_dropped_socket_handles() {
    let server = MockServer::start().await;
    let ca_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::days(3650));
    let ephemeral_pem = self_signed_cert_pem(Utc::now() + chrono::Duration::hours(1));

    Mock::given(method("GET"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst/connectSettings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "region": "us-central1",
            "ipAddresses": [{"type": "PRIMARY", "ipAddress": "10.0.0.9"}],
            "serverCaCert": {"cert": ca_pem},
            "databaseVersion": "POSTGRES_15",
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sql/v1beta4/projects/proj/instances/inst:generateEphemeralCert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "ephemeralCert": {"cert": ephemeral_pem},
        })))
        .mount(&server)
        .await;

    let conn_name = ConnectionName::parse("proj:us-central1:inst").unwrap();
    let admin_client = Arc::new(
        AdminClient::new(test_credentials(), Some(server.uri()), None, None).unwrap(),
    );
    let keys = Arc::new(KeyMaterial::generate().unwrap());
    let lazy = Arc::new(LazyRefreshCache::new(
        conn_name.clone(),
        admin_client,
        keys,
        false,
    ));
    let monitored = MonitoredCache::new_lazy(conn_name, lazy, None);

    let (_, _, handle_a) = monitored.connect_info(IpKind::Primary).await.unwrap();
    let (_, _, handle_b) = monitored.connect_info(IpKind::Primary).await.unwrap();
    assert_eq!(monitored.open_socket_count().await, 2);

    drop(handle_a);
    assert_eq!(monitored.open_socket_count().await, 1);

    drop(handle_b);
    assert_eq!(monitored.open_socket_count().await, 0);
}
