use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::connection_name::ConnectionName;
use crate::credentials::CredentialProvider;
use crate::error::ConnectorError;

const API_VERSION: &str = "v1beta4";
const DEFAULT_UNIVERSE_DOMAIN: &str = "googleapis.com";

/// A canned hint appended to 403 responses, since the raw admin API message
/// rarely points a caller at the actual fix.
const PERMISSION_DENIED_HINT: &str = "Verify the 'Cloud SQL Admin API' is enabled for this \
     project and that the 'Cloud SQL Client' role has been granted to the caller's credentials.";

fn default_endpoint(universe_domain: &str) -> String {
    format!("https://sqladmin.{universe_domain}")
}

fn user_agent(extra: Option<&str>) -> String {
    let base = format!("cloud-sql-rust-connector/{}", env!("CARGO_PKG_VERSION"));
    match extra {
        Some(d) => format!("{base}+{d}"),
        None => base,
    }
}

/// Metadata describing an instance's reachable IP addresses and server CA,
/// as reported by the admin API's `connectSettings` endpoint.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    pub ip_addresses: HashMap<String, String>,
    pub server_ca_cert: String,
    pub database_version: String,
}

#[derive(Deserialize)]
struct ConnectSettingsResponse {
    region: String,
    #[serde(default)]
    ip_addresses: Vec<IpAddressEntry>,
    #[serde(rename = "dnsName")]
    dns_name: Option<String>,
    #[serde(rename = "serverCaCert")]
    server_ca_cert: ServerCaCert,
    #[serde(rename = "databaseVersion")]
    database_version: String,
}

#[derive(Deserialize)]
struct IpAddressEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "ipAddress")]
    ip_address: String,
}

#[derive(Deserialize)]
struct ServerCaCert {
    cert: String,
}

#[derive(Deserialize)]
struct GenerateEphemeralCertResponse {
    #[serde(rename = "ephemeralCert")]
    ephemeral_cert: EphemeralCert,
}

#[derive(Deserialize)]
struct EphemeralCert {
    cert: String,
}

/// Thin client over the two admin API calls the connector needs: fetching
/// instance metadata and minting an ephemeral client certificate.
pub struct AdminClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Arc<dyn CredentialProvider>,
    quota_project: Option<String>,
    user_agent_suffix: Option<String>,
}

impl AdminClient {
    /// `endpoint`, when set, is used verbatim and overrides `universe_domain`.
    /// Otherwise the endpoint host is derived from `universe_domain`
    /// (`https://sqladmin.{universe_domain}`), defaulting to the public
    /// `googleapis.com` universe. The caller's credentials must belong to the
    /// same universe; this client does not cross-check the two.
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        endpoint: Option<String>,
        quota_project: Option<String>,
        user_agent_suffix: Option<String>,
    ) -> Result<Self, ConnectorError> {
        Self::with_universe_domain(credentials, endpoint, quota_project, user_agent_suffix, None)
    }

    pub fn with_universe_domain(
        credentials: Arc<dyn CredentialProvider>,
        endpoint: Option<String>,
        quota_project: Option<String>,
        user_agent_suffix: Option<String>,
        universe_domain: Option<String>,
    ) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent(user_agent_suffix.as_deref()))
            .build()?;
        let universe_domain = universe_domain.unwrap_or_else(|| DEFAULT_UNIVERSE_DOMAIN.to_string());
        Ok(AdminClient {
            http,
            endpoint: endpoint.unwrap_or_else(|| default_endpoint(&universe_domain)),
            credentials,
            quota_project,
            user_agent_suffix,
        })
    }

    fn auth_headers(&self, token: &str) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        if let Some(project) = &self.quota_project {
            headers.insert("x-goog-user-project", project.parse().unwrap());
        }
        headers.insert(
            "x-goog-api-client",
            user_agent(self.user_agent_suffix.as_deref()).parse().unwrap(),
        );
        headers
    }

    fn admin_api_error(status: reqwest::StatusCode, message: String) -> ConnectorError {
        if status.as_u16() == 403 {
            ConnectorError::AdminApiError {
                status: 403,
                message: format!("{PERMISSION_DENIED_HINT} (original response: {message})"),
            }
        } else {
            ConnectorError::AdminApiError {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// Fetches IP addresses and the server CA certificate for `conn_name`,
    /// failing with `RegionMismatch` if the admin API reports a different
    /// region than the one the caller supplied.
    pub async fn get_metadata(
        &self,
        conn_name: &ConnectionName,
    ) -> Result<InstanceMetadata, ConnectorError> {
        let token = self.credentials.access_token().await?;
        let url = format!(
            "{}/sql/{API_VERSION}/projects/{}/instances/{}/connectSettings",
            self.endpoint, conn_name.project, conn_name.instance_name
        );
        let resp = self
            .http
            .get(&url)
            .headers(self.auth_headers(&token))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let message = resp.text().await.unwrap_or_default();
            return Err(Self::admin_api_error(status, message));
        }
        let body: ConnectSettingsResponse = resp.json().await?;
        if body.region != conn_name.region {
            return Err(ConnectorError::RegionMismatch {
                instance: conn_name.to_string(),
                requested: conn_name.region.clone(),
                actual: body.region,
            });
        }
        let mut ip_addresses: HashMap<String, String> = body
            .ip_addresses
            .into_iter()
            .map(|entry| (entry.kind, entry.ip_address))
            .collect();
        if let Some(dns) = body.dns_name {
            ip_addresses.insert("PSC".to_string(), dns);
        }
        Ok(InstanceMetadata {
            ip_addresses,
            server_ca_cert: body.server_ca_cert.cert,
            database_version: body.database_version,
        })
    }

    /// Requests an ephemeral client certificate signed for `pub_key`. When
    /// `enable_iam_auth` is set, a down-scoped login token is embedded in the
    /// request so the resulting certificate carries an IAM identity; the
    /// returned expiration is the earlier of the certificate's and that
    /// token's expiry, since the connection is only usable while both hold.
    pub async fn get_ephemeral(
        &self,
        conn_name: &ConnectionName,
        pub_key: &str,
        enable_iam_auth: bool,
    ) -> Result<(String, DateTime<Utc>), ConnectorError> {
        let token = self.credentials.access_token().await?;
        let url = format!(
            "{}/sql/{API_VERSION}/projects/{}/instances/{}:generateEphemeralCert",
            self.endpoint, conn_name.project, conn_name.instance_name
        );

        let mut body = serde_json::Map::new();
        body.insert("public_key".to_string(), serde_json::Value::String(pub_key.to_string()));

        let mut login_expiry = None;
        if enable_iam_auth {
            let (access_token, expiry) = self.credentials.downscoped_login_token().await?;
            body.insert(
                "access_token".to_string(),
                serde_json::Value::String(access_token),
            );
            login_expiry = Some(expiry);
        }

        let resp = self
            .http
            .post(&url)
            .headers(self.auth_headers(&token))
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let message = resp.text().await.unwrap_or_default();
            return Err(Self::admin_api_error(status, message));
        }
        let parsed: GenerateEphemeralCertResponse = resp.json().await?;
        let cert_pem = parsed.ephemeral_cert.cert;
        let cert_expiration = parse_cert_expiration(&cert_pem)?;

        let expiration = match login_expiry {
            Some(login_exp) if login_exp < cert_expiration => login_exp,
            _ => cert_expiration,
        };
        Ok((cert_pem, expiration))
    }
}

fn parse_cert_expiration(cert_pem: &str) -> Result<DateTime<Utc>, ConnectorError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| ConnectorError::CertParse(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| ConnectorError::CertParse(e.to_string()))?;
    let not_after = cert.validity().not_after;
    DateTime::from_timestamp(not_after.timestamp(), 0)
        .ok_or_else(|| ConnectorError::CertParse("certificate notAfter out of range".to_string()))
}
