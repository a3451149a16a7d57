//! Common test utilities for integration tests
//!
//! A wiremock identity provider serving a discovery document and a key set,
//! fixture signing keys, and token minting helpers.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokenward::{Options, ValidatorConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";
pub const AUDIENCE: &str = "api://tokenward-tests";

const RSA_PRIMARY_PEM: &[u8] = include_bytes!("../fixtures/rsa_primary.pem");
const RSA_ROTATED_PEM: &[u8] = include_bytes!("../fixtures/rsa_rotated.pem");
const EC_PRIMARY_PEM: &[u8] = include_bytes!("../fixtures/ec_primary.pem");

/// A fixture signing key with its public JWK
#[derive(Clone)]
pub struct TestKey {
    pub kid: &'static str,
    pub algorithm: Algorithm,
    pem: &'static [u8],
    pub jwk: Value,
}

impl TestKey {
    /// Sign `claims` with this key's algorithm and kid
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.to_string());
        self.sign_with_header(header, claims)
    }

    /// Sign with an explicit header; the header algorithm must fit the key
    pub fn sign_with_header(&self, header: Header, claims: &Value) -> String {
        let key = match self.algorithm {
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(self.pem),
            _ => EncodingKey::from_rsa_pem(self.pem),
        }
        .expect("fixture key must parse");
        encode(&header, claims, &key).expect("failed to encode test JWT")
    }
}

pub fn rsa_primary() -> TestKey {
    TestKey {
        kid: "rsa-primary",
        algorithm: Algorithm::RS256,
        pem: RSA_PRIMARY_PEM,
        jwk: json!({
            "kty": "RSA",
            "use": "sig",
            "kid": "rsa-primary",
            "alg": "RS256",
            "n": "iuRfDaak7rivJDHk7sqPw2MvQ5FkLgwPA6xns7t7dI-psUwAFGzmzYgS4Yc3h5sKHQfYFnIf6l15dk8orqEg7cmIOjUo84I5l--6LAs_neFuFExAyy_FPdW6CL45HiwmK0K8O5VDrIBmvVI9bY0hq0Yv3iT1-SiTQmAR5cSweKLOlmUAZqul8Yvr6AXosAJgRWuK83JCe4OnV8H_-XNfJPBg0wve00-uo7B0WHZ7Qg4keztNEdu8f2PFIUVxsM9H9VGxyLspvqfJKHoDWFNytMno4lswpQNAesVvFsSlm6FQ7vDP740MAvwzWxRedPiywOywgxKY8vgx48ankJ1LKQ",
            "e": "AQAB"
        }),
    }
}

pub fn rsa_rotated() -> TestKey {
    TestKey {
        kid: "rsa-rotated",
        algorithm: Algorithm::RS256,
        pem: RSA_ROTATED_PEM,
        jwk: json!({
            "kty": "RSA",
            "use": "sig",
            "kid": "rsa-rotated",
            "n": "uJ6ORJ-9na4Vn2pXHU5LxlvAwP6fdmjKdNHSC4hlThdeD0-sVGd67BsCgjYGu5o-m9u-ZZEHrrt7uVAwdOppkFWkWYSAIfDSG73MAEh_K5lLHr0Lpbci2qSXD9QeZM9MEhPQFEHYwtvNPEHpILD4lbzGI-_hgWwQooh34lcD0VWoYckQLOZSrgP1XJNVJx64aGYKzcUZkB3Tkjv0CdFTEQUEyoiQH_IjTGkfqSWuE94OwwbLL3wov5L-4uYEx1OkitwiE5kNsNZTthTtNpyagiFr1VFVi_Y7_f0ykvs1hpaCgPV-7rXa3F2N_WUHq9fsnUWTmJWAXIn-p8sjaP65nQ",
            "e": "AQAB"
        }),
    }
}

pub fn ec_primary() -> TestKey {
    TestKey {
        kid: "ec-primary",
        algorithm: Algorithm::ES256,
        pem: EC_PRIMARY_PEM,
        jwk: json!({
            "kty": "EC",
            "use": "sig",
            "kid": "ec-primary",
            "alg": "ES256",
            "crv": "P-256",
            "x": "6CCnDHEs5NAztpAPWj97iE9ueTpEKiTvJPmCNmA7UHo",
            "y": "Ln7Szwpva9nnuocZ1xk6ZdU_9oM_9r2frbUZh2iOhRg"
        }),
    }
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs() as i64
}

/// Claims valid for an hour
pub fn valid_claims(iss: &str, aud: &str) -> Value {
    let now = current_timestamp();
    json!({
        "iss": iss,
        "aud": aud,
        "sub": "user-1",
        "tid": TENANT,
        "iat": now,
        "nbf": now,
        "exp": now + 3600,
    })
}

/// Short timeouts and backoff so failure paths finish quickly
pub fn fast_config() -> ValidatorConfig {
    ValidatorConfig::default()
        .with_fetch_timeout(Duration::from_millis(500))
        .with_fetch_deadline(Duration::from_secs(5))
        .with_retries(2, Duration::from_millis(10), Duration::from_millis(50))
        .with_min_refresh_interval(Duration::from_millis(200))
}

/// Wiremock identity provider for one tenant
pub struct MockIdentityProvider {
    pub server: MockServer,
    pub tenant: String,
}

impl MockIdentityProvider {
    /// Start a provider with no endpoints mounted
    pub async fn start() -> Self {
        Self::start_for(TENANT).await
    }

    pub async fn start_for(tenant: &str) -> Self {
        Self {
            server: MockServer::start().await,
            tenant: tenant.to_string(),
        }
    }

    /// Start a provider serving discovery and the given keys
    pub async fn with_keys(keys: &[&TestKey]) -> Self {
        let idp = Self::start().await;
        idp.mount_discovery().await;
        idp.mount_keys(keys).await;
        idp
    }

    pub fn instance(&self) -> String {
        self.server.uri()
    }

    pub fn authority(&self) -> String {
        format!("{}/{}/v2.0", self.server.uri(), self.tenant)
    }

    pub fn discovery_path(&self) -> String {
        format!("/{}/v2.0/.well-known/openid-configuration", self.tenant)
    }

    pub fn jwks_path(&self) -> String {
        format!("/{}/discovery/v2.0/keys", self.tenant)
    }

    pub fn options(&self) -> Options {
        Options::for_tenant(self.instance(), self.tenant.clone()).with_audience(AUDIENCE)
    }

    /// Discovery document whose issuer is the authority itself
    pub async fn mount_discovery(&self) {
        self.mount_discovery_with_issuer(&self.authority()).await;
    }

    pub async fn mount_discovery_with_issuer(&self, issuer: &str) {
        self.mount_discovery_document(&self.discovery_path(), issuer).await;
    }

    /// Discovery document of the v1 authority, `{instance}/{tenant}`
    pub async fn mount_v1_discovery(&self, issuer: &str) {
        let v1_path = format!("/{}/.well-known/openid-configuration", self.tenant);
        self.mount_discovery_document(&v1_path, issuer).await;
    }

    async fn mount_discovery_document(&self, document_path: &str, issuer: &str) {
        let body = json!({
            "issuer": issuer,
            "jwks_uri": format!("{}{}", self.server.uri(), self.jwks_path()),
            "token_endpoint": format!("{}/{}/oauth2/v2.0/token", self.server.uri(), self.tenant),
            "id_token_signing_alg_values_supported": ["RS256"],
        });
        Mock::given(method("GET"))
            .and(path(document_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_keys(&self, keys: &[&TestKey]) {
        self.mount_key_response(key_set(keys), 5).await;
    }

    /// Serve a new key set; takes precedence over earlier mounts
    pub async fn rotate_keys(&self, keys: &[&TestKey]) {
        self.mount_key_response(key_set(keys), 1).await;
    }

    pub async fn mount_key_response(&self, response: ResponseTemplate, priority: u8) {
        Mock::given(method("GET"))
            .and(path(self.jwks_path()))
            .respond_with(response)
            .with_priority(priority)
            .mount(&self.server)
            .await;
    }

    pub async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }

    pub async fn jwks_requests(&self) -> usize {
        self.requests_to(&self.jwks_path()).await
    }

    pub async fn discovery_requests(&self) -> usize {
        self.requests_to(&self.discovery_path()).await
    }
}

/// JWK Set response for the given keys
pub fn key_set(keys: &[&TestKey]) -> ResponseTemplate {
    let keys: Vec<Value> = keys.iter().map(|key| key.jwk.clone()).collect();
    ResponseTemplate::new(200).set_body_json(json!({ "keys": keys }))
}
