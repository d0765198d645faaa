mod common;

use common::*;
use nila_oidc_rp::jose::{base64url_encode, unsigned_jwt, JoseHeader};
use nila_oidc_rp::model::secret_key;
use nila_oidc_rp::prelude::*;
use nila_oidc_rp::validator::checkers::claim_hash;
use serde_json::json;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NO_SERVER: &str = "http://127.0.0.1:9";

#[tokio::test]
async fn rs256_id_token_verifies_against_cached_key() {
    let client = default_client(NO_SERVER);
    let token = sign_rs256(&id_token_claims(), Some("k1"));

    let claims = client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .expect("token should verify");
    assert_eq!(claims["sub"], "user-42");
}

#[tokio::test]
async fn hs256_id_token_is_keyed_by_client_secret() {
    let client = client(
        issuer(NO_SERVER, JsonWebKeySet::default()),
        metadata()
            .signed_response_alg(TokenUse::IdToken, "HS256")
            .build()
            .unwrap(),
    );

    let token = sign_hs256(&id_token_claims(), CLIENT_SECRET);
    assert!(client.verify_id_token(&token, &ClaimRules::id_token()).await.is_ok());

    let forged = sign_hs256(&id_token_claims(), "some-other-secret");
    let err = client
        .verify_id_token(&forged, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidSignature(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn header_alg_must_match_declared_alg() {
    let client = default_client(NO_SERVER);
    let token = sign_hs256(&id_token_claims(), CLIENT_SECRET);

    let err = client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NilaOidcError::AlgorithmMismatch { ref expected, ref actual } if expected == "RS256" && actual == "HS256"
    ));
}

#[tokio::test]
async fn unsigned_tokens_need_alg_none_and_no_signature() {
    let claims = claim_map(id_token_claims());

    // Declared "none": accepted without a signature check.
    let none_client = client(
        issuer(NO_SERVER, JsonWebKeySet::default()),
        metadata()
            .signed_response_alg(TokenUse::IdToken, "none")
            .build()
            .unwrap(),
    );
    let token = unsigned_jwt(&JoseHeader::new("none"), &claims).unwrap();
    assert!(none_client.verify_id_token(&token, &ClaimRules::id_token()).await.is_ok());

    let with_signature = format!("{token}c2ln");
    let err = none_client
        .verify_id_token(&with_signature, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::MalformedToken(_)));

    // Declared RS256 but the signature segment is empty.
    let rs_client = default_client(NO_SERVER);
    let stripped = unsigned_jwt(&JoseHeader::new("RS256"), &claims).unwrap();
    let err = rs_client
        .verify_id_token(&stripped, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidSignature(_)));
}

#[tokio::test]
async fn missing_sub_fails_for_id_token_but_not_for_userinfo() {
    let client = client(
        issuer(NO_SERVER, JsonWebKeySet::new(vec![public_jwk("k1")])),
        metadata()
            .signed_response_alg(TokenUse::Userinfo, "RS256")
            .build()
            .unwrap(),
    );
    let mut payload = id_token_claims();
    payload.as_object_mut().unwrap().remove("sub");
    let token = sign_rs256(&payload, Some("k1"));

    let err = client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::MissingRequiredClaim(ref claim) if claim == "sub"));

    let claims = client.verify_userinfo(&token).await.expect("userinfo has no required claims");
    assert_eq!(claims["iss"], ISSUER);
}

#[tokio::test]
async fn claims_are_checked_before_keys_are_looked_up() {
    // No key "k9" anywhere and no reachable JWKS: the expiry must fail first.
    let client = default_client(NO_SERVER);
    let expired = with(id_token_claims(), json!({ "exp": now() - 600 }));
    let token = sign_rs256(&expired, Some("k9"));

    let err = client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidClaim { ref claim, .. } if claim == "exp"));
}

#[tokio::test]
async fn nonce_and_hash_bindings_are_enforced() {
    let client = default_client(NO_SERVER);
    let payload = with(
        id_token_claims(),
        json!({ "nonce": "abc", "at_hash": claim_hash("access-token-1", "RS256") }),
    );
    let token = sign_rs256(&payload, Some("k1"));

    let rules = ClaimRules::id_token()
        .nonce(Some("abc"))
        .access_token(Some("access-token-1"));
    assert!(client.verify_id_token(&token, &rules).await.is_ok());

    let wrong_nonce = ClaimRules::id_token().nonce(Some("xyz"));
    let err = client.verify_id_token(&token, &wrong_nonce).await.unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidClaim { ref claim, .. } if claim == "nonce"));

    let wrong_token = ClaimRules::id_token().access_token(Some("access-token-2"));
    let err = client.verify_id_token(&token, &wrong_token).await.unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidClaim { ref claim, .. } if claim == "at_hash"));

    let with_code = ClaimRules::id_token().code(Some("code-1"));
    let err = client.verify_id_token(&token, &with_code).await.unwrap_err();
    assert!(matches!(err, NilaOidcError::MissingRequiredClaim(ref claim) if claim == "c_hash"));
}

#[tokio::test]
async fn s_hash_is_checked_only_when_present() {
    let client = default_client(NO_SERVER);
    let plain = sign_rs256(&id_token_claims(), Some("k1"));
    assert!(client
        .verify_id_token(&plain, &ClaimRules::id_token().state(Some("st")))
        .await
        .is_ok());

    let bound = sign_rs256(
        &with(id_token_claims(), json!({ "s_hash": claim_hash("st", "RS256") })),
        Some("k1"),
    );
    assert!(client
        .verify_id_token(&bound, &ClaimRules::id_token().state(Some("st")))
        .await
        .is_ok());
    let err = client
        .verify_id_token(&bound, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidClaim { ref claim, .. } if claim == "s_hash"));
}

#[tokio::test]
async fn max_age_requires_fresh_auth_time() {
    let client = default_client(NO_SERVER);
    let rules = ClaimRules::id_token().max_age(Some(60));

    let token = sign_rs256(&id_token_claims(), Some("k1"));
    let err = client.verify_id_token(&token, &rules).await.unwrap_err();
    assert!(matches!(err, NilaOidcError::MissingRequiredClaim(ref claim) if claim == "auth_time"));

    let stale = sign_rs256(
        &with(id_token_claims(), json!({ "auth_time": now() - 3600 })),
        Some("k1"),
    );
    let err = client.verify_id_token(&stale, &rules).await.unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidClaim { ref claim, .. } if claim == "auth_time"));

    let fresh = sign_rs256(
        &with(id_token_claims(), json!({ "auth_time": now() - 10 })),
        Some("k1"),
    );
    assert!(client.verify_id_token(&fresh, &rules).await.is_ok());
}

#[tokio::test]
async fn unknown_kid_triggers_exactly_one_refresh() {
    // --- 1. SETUP ---
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [public_jwk("k1"), public_jwk("k2")]
        })))
        .expect(1)
        .mount(&server)
        .await;
    let client = default_client(&server.uri());

    // --- 2. VERIFY ---
    let token = sign_rs256(&id_token_claims(), Some("k2"));
    client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .expect("k2 should be found after the refresh");

    // --- 3. ASSERT ---
    assert_eq!(client.issuer().jwks().keys.len(), 2);
}

#[tokio::test]
async fn kid_still_missing_after_refresh_is_key_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [public_jwk("k1")] })))
        .expect(1)
        .mount(&server)
        .await;
    let client = default_client(&server.uri());

    let token = sign_rs256(&id_token_claims(), Some("k2"));
    let err = client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::KeyNotFound(ref kid) if kid == "k2"));
}

#[tokio::test]
async fn empty_key_set_is_loaded_lazily() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [public_jwk("k1")] })))
        .expect(1)
        .mount(&server)
        .await;
    let client = client(
        Arc::new(Issuer::new(issuer_metadata(&server.uri()))),
        metadata().build().unwrap(),
    );

    let token = sign_rs256(&id_token_claims(), None);
    assert!(client.verify_id_token(&token, &ClaimRules::id_token()).await.is_ok());
    // The second token hits the now-populated cache.
    assert!(client.verify_id_token(&token, &ClaimRules::id_token()).await.is_ok());
}

#[tokio::test]
async fn multi_tenant_issuer_is_resolved_from_tid() {
    let client = client(
        Arc::new(Issuer::with_jwks(
            IssuerMetadata::new("https://login.example.com/{tenantid}/v2.0"),
            JsonWebKeySet::new(vec![public_jwk("k1")]),
        )),
        metadata().build().unwrap(),
    );
    let payload = with(
        id_token_claims(),
        json!({ "iss": "https://login.example.com/tenant-7/v2.0", "tid": "tenant-7" }),
    );
    let token = sign_rs256(&payload, Some("k1"));
    assert!(client.verify_id_token(&token, &ClaimRules::id_token()).await.is_ok());

    let other = with(payload, json!({ "tid": "tenant-8" }));
    let token = sign_rs256(&other, Some("k1"));
    let err = client
        .verify_id_token(&token, &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::InvalidClaim { ref claim, .. } if claim == "iss"));
}

/// Stands in for a JWE implementation: "decrypts" to a fixed plaintext and
/// records the keys it was offered.
struct FakeJwe {
    plaintext: String,
    offered: Mutex<Vec<JsonWebKey>>,
}

impl JoseProvider for FakeJwe {
    fn verify(&self, token: &str, keys: &JsonWebKeySet) -> nila_oidc_rp::error::Result<bool> {
        JsonWebTokenProvider.verify(token, keys)
    }

    fn decrypt(&self, _token: &str, keys: &JsonWebKeySet) -> nila_oidc_rp::error::Result<String> {
        self.offered.lock().unwrap().extend(keys.keys.iter().cloned());
        Ok(self.plaintext.clone())
    }

    fn sign(
        &self,
        header: &JoseHeader,
        claims: &ClaimMap,
        key: &JsonWebKey,
    ) -> nila_oidc_rp::error::Result<String> {
        JsonWebTokenProvider.sign(header, claims, key)
    }
}

fn jwe(alg: &str, enc: &str) -> String {
    let header = base64url_encode(json!({ "alg": alg, "enc": enc }).to_string());
    format!("{header}.ZW5j.aXY.Y2lwaGVy.dGFn")
}

#[tokio::test]
async fn encrypted_id_token_is_decrypted_then_verified() {
    let provider = Arc::new(FakeJwe {
        plaintext: sign_rs256(&id_token_claims(), Some("k1")),
        offered: Mutex::new(Vec::new()),
    });
    let client = Client::builder(
        issuer(NO_SERVER, JsonWebKeySet::new(vec![public_jwk("k1")])),
        metadata()
            .encrypted_response(TokenUse::IdToken, "dir", Some("A128GCM"))
            .build()
            .unwrap(),
    )
    .jose_provider(provider.clone())
    .build()
    .unwrap();

    let claims = client
        .verify_id_token(&jwe("dir", "A128GCM"), &ClaimRules::id_token())
        .await
        .expect("decrypt then verify");
    assert_eq!(claims["sub"], "user-42");

    // "dir" keys the content algorithm from the client secret.
    let offered = provider.offered.lock().unwrap();
    assert_eq!(offered.as_slice(), &[secret_key(CLIENT_SECRET, "A128GCM")]);
    drop(offered);

    let err = client
        .verify_id_token(&jwe("dir", "A256GCM"), &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::AlgorithmMismatch { .. }));
}

#[tokio::test]
async fn default_provider_reports_jwe_as_unsupported() {
    let client = client(
        issuer(NO_SERVER, JsonWebKeySet::default()),
        metadata()
            .encrypted_response(TokenUse::IdToken, "dir", None)
            .build()
            .unwrap(),
    );
    let err = client
        .verify_id_token(&jwe("dir", "A128CBC-HS256"), &ClaimRules::id_token())
        .await
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::UnsupportedAlgorithm(_)));
}
