//! End-to-end token validation against a mock identity provider
//!
//! Tests cover:
//! - Accepted tokens return the issuer
//! - Claim failures (audience, expiry, issuer, missing claims)
//! - Algorithm confusion and signature tampering
//! - The stateless call shape and Authorization header input

mod common;

use common::{
    AUDIENCE, MockIdentityProvider, TENANT, current_timestamp, ec_primary, fast_config,
    rsa_primary, rsa_rotated, valid_claims,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokenward::{
    ClaimValidationError, Error, ErrorKind, MetadataCache, Options, Validator, validate_token,
};

async fn validator_for(idp: &MockIdentityProvider) -> Validator {
    Validator::configure(&idp.options(), fast_config()).expect("valid configuration")
}

#[tokio::test]
async fn test_valid_token_returns_issuer() {
    // GIVEN: a provider serving the signing key
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    // WHEN: a correctly signed token is validated
    let token = key.sign(&valid_claims(&idp.authority(), AUDIENCE));
    let issuer = validator.validate(&token).await.unwrap();

    // THEN: the issuer is returned
    assert_eq!(issuer, idp.authority());
}

#[tokio::test]
async fn test_second_validation_uses_cache() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;
    let token = key.sign(&valid_claims(&idp.authority(), AUDIENCE));

    validator.validate(&token).await.unwrap();
    validator.validate(&token).await.unwrap();

    assert_eq!(idp.discovery_requests().await, 1);
    assert_eq!(idp.jwks_requests().await, 1);
}

#[tokio::test]
async fn test_ec_key_and_audience_array() {
    let ec = ec_primary();
    let rsa = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&rsa, &ec]).await;
    let validator = validator_for(&idp).await;

    let mut claims = valid_claims(&idp.authority(), AUDIENCE);
    claims["aud"] = json!(["some-other-api", AUDIENCE]);

    assert_eq!(validator.validate(&ec.sign(&claims)).await.unwrap(), idp.authority());
}

#[tokio::test]
async fn test_audience_mismatch() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let token = key.sign(&valid_claims(&idp.authority(), "api://someone-else"));
    let err = validator.validate(&token).await.unwrap_err();

    assert!(matches!(err, Error::Claim(ClaimValidationError::AudienceMismatch)));
    assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn test_any_configured_audience_is_accepted() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let options = idp.options().with_audiences(["a88bb933-client-id"]);
    let validator = Validator::configure(&options, fast_config()).unwrap();

    let token = key.sign(&valid_claims(&idp.authority(), "a88bb933-client-id"));
    assert!(validator.validate(&token).await.is_ok());
}

#[tokio::test]
async fn test_expired_token() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let now = current_timestamp();
    let mut claims = valid_claims(&idp.authority(), AUDIENCE);
    claims["iat"] = json!(now - 7200);
    claims["nbf"] = json!(now - 7200);
    claims["exp"] = json!(now - 3600);

    let err = validator.validate(&key.sign(&claims)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);
    assert!(
        err.www_authenticate()
            .unwrap()
            .contains("The access token has expired.")
    );
}

#[tokio::test]
async fn test_expiry_within_clock_skew_is_accepted() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let mut claims = valid_claims(&idp.authority(), AUDIENCE);
    claims["exp"] = json!(current_timestamp() - 5);

    assert!(validator.validate(&key.sign(&claims)).await.is_ok());
}

#[tokio::test]
async fn test_not_yet_valid_token() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let mut claims = valid_claims(&idp.authority(), AUDIENCE);
    claims["nbf"] = json!(current_timestamp() + 600);

    let err = validator.validate(&key.sign(&claims)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotYetValid);
}

#[tokio::test]
async fn test_missing_exp_is_reported() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let mut claims = valid_claims(&idp.authority(), AUDIENCE);
    claims.as_object_mut().unwrap().remove("exp");

    let err = validator.validate(&key.sign(&claims)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Claim(ClaimValidationError::MissingClaim("exp"))
    ));
}

#[tokio::test]
async fn test_issuer_mismatch() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let token = key.sign(&valid_claims("https://evil.example.com/tenant/v2.0", AUDIENCE));
    let err = validator.validate(&token).await.unwrap_err();

    match err {
        Error::Claim(ClaimValidationError::IssuerMismatch { expected, actual }) => {
            assert_eq!(expected, idp.authority());
            assert_eq!(actual, "https://evil.example.com/tenant/v2.0");
        }
        other => panic!("expected issuer mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_issuer_with_trailing_slash_is_accepted() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let token = key.sign(&valid_claims(&format!("{}/", idp.authority()), AUDIENCE));
    assert!(validator.validate(&token).await.is_ok());
}

#[tokio::test]
async fn test_multi_tenant_template_issuer() {
    // GIVEN: an organizations authority whose discovery issuer is a template
    let key = rsa_primary();
    let idp = MockIdentityProvider::start_for("organizations").await;
    let template = format!("{}/{{tenantid}}/v2.0", idp.instance());
    idp.mount_discovery_with_issuer(&template).await;
    idp.mount_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    // WHEN: a token carries its own tenant in iss and tid
    let tenant_issuer = format!("{}/{TENANT}/v2.0", idp.instance());
    let token = key.sign(&valid_claims(&tenant_issuer, AUDIENCE));

    // THEN: the instantiated template matches
    assert_eq!(validator.validate(&token).await.unwrap(), tenant_issuer);

    // AND: a tid that disagrees with iss does not
    let mut claims = valid_claims(&tenant_issuer, AUDIENCE);
    claims["tid"] = json!("00000000-0000-0000-0000-000000000000");
    let err = validator.validate(&key.sign(&claims)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IssuerMismatch);
}

#[tokio::test]
async fn test_discovery_issuer_on_foreign_host_is_rejected() {
    // GIVEN: a discovery document naming an issuer on another host
    let key = rsa_primary();
    let idp = MockIdentityProvider::start().await;
    idp.mount_discovery_with_issuer("https://attacker.example.net/").await;
    idp.mount_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    // WHEN: a token claims that issuer
    let token = key.sign(&valid_claims("https://attacker.example.net", AUDIENCE));
    let err = validator.validate(&token).await.unwrap_err();

    // THEN: the issuer is not trusted
    assert!(matches!(
        err,
        Error::Claim(ClaimValidationError::IssuerMismatch { ref actual, .. })
            if actual == "https://attacker.example.net"
    ));
}

#[tokio::test]
async fn test_v1_token_on_v2_authority() {
    // GIVEN: a v2.0 authority whose v1 counterpart issues from an alias host
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    idp.mount_v1_discovery(&format!("https://sts.windows.net/{TENANT}/")).await;
    let config = fast_config().with_issuer_aliases(["127.0.0.1", "sts.windows.net"]);
    let validator = Validator::configure(&idp.options(), config.clone()).unwrap();

    // WHEN: a v1 token for the tenant is validated
    let v1_issuer = format!("https://sts.windows.net/{TENANT}/");
    let token = key.sign(&valid_claims(&v1_issuer, AUDIENCE));

    // THEN: it is accepted with its v1 issuer
    assert_eq!(validator.validate(&token).await.unwrap(), v1_issuer);

    // AND: a v1 token for another tenant is not
    let mut claims = valid_claims("https://sts.windows.net/other-tenant/", AUDIENCE);
    claims["tid"] = json!("other-tenant");
    let err = validator.validate(&key.sign(&claims)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IssuerMismatch);

    // AND: v1 tokens can be refused outright
    let strict = Validator::configure(&idp.options(), config.with_v1_tokens(false)).unwrap();
    let err = strict.validate(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IssuerMismatch);
}

#[test]
fn test_fixture_keys_sign() {
    let claims = valid_claims("https://idp.example.com", AUDIENCE);
    for key in [rsa_primary(), rsa_rotated(), ec_primary()] {
        assert_eq!(key.sign(&claims).split('.').count(), 3);
    }
}

#[tokio::test]
async fn test_tampered_payload_fails_signature() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let token = key.sign(&valid_claims(&idp.authority(), AUDIENCE));
    let forged = key.sign(&valid_claims(&idp.authority(), "api://admin"));
    let mut parts: Vec<&str> = token.split('.').collect();
    parts[1] = forged.split('.').nth(1).unwrap();
    let tampered = parts.join(".");

    let err = validator.validate(&tampered).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureVerification);
}

#[tokio::test]
async fn test_token_signed_by_other_key_with_same_kid() {
    let primary = rsa_primary();
    let impostor = rsa_rotated();
    let idp = MockIdentityProvider::with_keys(&[&primary]).await;
    let validator = validator_for(&idp).await;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(primary.kid.to_string());
    let token = impostor.sign_with_header(header, &valid_claims(&idp.authority(), AUDIENCE));

    let err = validator.validate(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureVerification);
}

#[tokio::test]
async fn test_algorithm_confusion_is_rejected() {
    // GIVEN: an RSA key set
    let rsa = rsa_primary();
    let ec = ec_primary();
    let idp = MockIdentityProvider::with_keys(&[&rsa]).await;
    let validator = validator_for(&idp).await;
    let claims = valid_claims(&idp.authority(), AUDIENCE);

    // ES256 header naming the RSA key
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(rsa.kid.to_string());
    let es_token = ec.sign_with_header(header, &claims);

    // PS256 header on a key declared RS256
    let mut header = Header::new(Algorithm::PS256);
    header.kid = Some(rsa.kid.to_string());
    let ps_token = rsa.sign_with_header(header, &claims);

    // HS256 with the public modulus as the secret
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(rsa.kid.to_string());
    let secret = rsa.jwk["n"].as_str().unwrap().as_bytes().to_vec();
    let hs_token = encode(&header, &claims, &EncodingKey::from_secret(&secret)).unwrap();

    // Unsigned token
    let none_token = {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none", "kid": rsa.kid}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.AAAA")
    };

    // THEN: every variant is a signature failure
    for token in [es_token, ps_token, hs_token, none_token] {
        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureVerification, "{err}");
    }
}

#[tokio::test]
async fn test_malformed_tokens() {
    let idp = MockIdentityProvider::with_keys(&[&rsa_primary()]).await;
    let validator = validator_for(&idp).await;

    for token in ["", "not-a-jwt", "a.b", "a.b.c.d", "..", "e30.e30.", "!!.e30.sig"] {
        let err = validator.validate(token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedToken, "{token:?}");
    }

    // Structural failures never reach the provider
    assert_eq!(idp.discovery_requests().await, 0);
}

#[tokio::test]
async fn test_missing_kid_is_unknown_key() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;

    let token = key.sign_with_header(
        Header::new(Algorithm::RS256),
        &valid_claims(&idp.authority(), AUDIENCE),
    );
    let err = validator.validate(&token).await.unwrap_err();
    assert!(matches!(err, Error::UnknownKey { kid: None }));
}

#[tokio::test]
async fn test_authorization_header() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let validator = validator_for(&idp).await;
    let token = key.sign(&valid_claims(&idp.authority(), AUDIENCE));

    for header in [format!("Bearer {token}"), format!("bearer {token}")] {
        assert_eq!(
            validator.validate_authorization_header(&header).await.unwrap(),
            idp.authority()
        );
    }

    let err = validator
        .validate_authorization_header(&token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedToken);
    assert_eq!(
        err.www_authenticate().unwrap(),
        "Bearer error=\"invalid_token\", error_description=\"The access token is not valid.\""
    );
}

#[tokio::test]
async fn test_stateless_validate_token() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let cache = MetadataCache::new(fast_config()).unwrap();
    let token = key.sign(&valid_claims(&idp.authority(), AUDIENCE));

    let issuer = validate_token(&cache, &idp.instance(), TENANT, AUDIENCE, &token)
        .await
        .unwrap();
    assert_eq!(issuer, idp.authority());

    // Same authority, different audience: cached metadata, fresh options
    let err = validate_token(&cache, &idp.instance(), TENANT, "api://other", &token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AudienceMismatch);
    assert_eq!(idp.jwks_requests().await, 1);
}

#[tokio::test]
async fn test_authority_override() {
    let key = rsa_primary();
    let idp = MockIdentityProvider::with_keys(&[&key]).await;
    let options = Options {
        instance: Some("https://login.microsoftonline.com".to_string()),
        tenant_id: Some("ignored".to_string()),
        ..Options::for_authority(format!("{}/", idp.authority())).with_audience(AUDIENCE)
    };
    let validator = Validator::configure(&options, fast_config()).unwrap();

    assert_eq!(validator.authority().as_str(), idp.authority());
    let token = key.sign(&valid_claims(&idp.authority(), AUDIENCE));
    assert!(validator.validate(&token).await.is_ok());
}
