// src/generator/mod.rs

use crate::client::Client;
use crate::error::{NilaOidcError, Result};
use crate::jose::{base64url_encode, unsigned_jwt, ClaimMap, JoseHeader};
use crate::model::{JsonWebKey, KeyQuery};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::validator::checkers::unix_now;

/// `client_assertion_type` for JWT client authentication (RFC 7523).
pub const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Returns 32 random bytes, base64url-encoded. Suitable for `state`,
/// `nonce` and PKCE code verifiers.
pub fn random() -> String {
    base64url_encode(rand::random::<[u8; 32]>())
}

/// The PKCE S256 `code_challenge` for `verifier` (RFC 7636 section 4.2).
pub fn code_challenge(verifier: &str) -> String {
    base64url_encode(Sha256::digest(verifier.as_bytes()))
}

/// Builds and signs the JWTs the client itself issues: client assertions
/// for the token endpoint and request objects for the authorization endpoint.
#[derive(Debug, Clone, Copy)]
pub struct AssertionGenerator {
    ttl: Duration,
}

impl Default for AssertionGenerator {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(60) }
    }
}

impl AssertionGenerator {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    fn base_claims(&self, client: &Client) -> ClaimMap {
        let client_id = client.metadata().client_id.clone();
        let now = unix_now();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);

        let mut claims = ClaimMap::new();
        claims.insert("iss".into(), Value::String(client_id));
        claims.insert("aud".into(), Value::String(client.issuer().metadata().issuer.clone()));
        claims.insert("iat".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(now.saturating_add(ttl)));
        claims.insert("jti".into(), Value::String(Uuid::new_v4().to_string()));
        claims
    }

    fn assertion_claims(&self, client: &Client) -> ClaimMap {
        let mut claims = self.base_claims(client);
        claims.insert("sub".into(), Value::String(client.metadata().client_id.clone()));
        claims
    }

    /// An HMAC-signed assertion keyed by the client secret.
    ///
    /// Uses `token_endpoint_auth_signing_alg` when it names an HMAC algorithm,
    /// HS256 otherwise.
    pub fn client_secret_jwt(&self, client: &Client) -> Result<String> {
        let alg = client
            .metadata()
            .token_endpoint_auth_signing_alg
            .as_deref()
            .filter(|alg| alg.starts_with("HS"))
            .unwrap_or("HS256");
        let key = client
            .secret_key(alg)
            .map_err(|_| NilaOidcError::MissingClientSecret("client_secret_jwt".to_string()))?;

        let mut header = JoseHeader::new(alg);
        header.typ = Some("JWT".to_string());
        client.jose().sign(&header, &self.assertion_claims(client), &key)
    }

    /// An assertion signed with one of the client's private keys.
    ///
    /// The key is picked by `token_endpoint_auth_key_id` when configured; the
    /// signing algorithm is taken from the chosen key.
    pub fn private_key_jwt(&self, client: &Client) -> Result<String> {
        let metadata = client.metadata();
        let key = private_signing_key(
            client,
            metadata.token_endpoint_auth_signing_alg.as_deref(),
            metadata.token_endpoint_auth_key_id.as_deref(),
        )?;
        let alg = key
            .alg
            .clone()
            .or_else(|| metadata.token_endpoint_auth_signing_alg.clone())
            .ok_or_else(|| {
                NilaOidcError::InvalidConfiguration(
                    "private_key_jwt signing key declares no alg".to_string(),
                )
            })?;

        let mut header = JoseHeader::new(alg);
        header.typ = Some("JWT".to_string());
        header.kid = key.kid.clone();
        client.jose().sign(&header, &self.assertion_claims(client), key)
    }

    /// A JWT-secured authorization request carrying `params`
    /// (`request_object_signing_alg`, `none` when unset).
    pub fn request_object(&self, client: &Client, params: ClaimMap) -> Result<String> {
        let alg = client
            .metadata()
            .request_object_signing_alg
            .clone()
            .unwrap_or_else(|| "none".to_string());

        let mut claims = self.base_claims(client);
        claims.insert(
            "client_id".into(),
            Value::String(client.metadata().client_id.clone()),
        );
        claims.extend(params.into_iter().filter(|(_, v)| !v.is_null()));

        let mut header = JoseHeader::new(alg.as_str());
        header.typ = Some("oauth-authz-req+jwt".to_string());

        if alg == "none" {
            return unsigned_jwt(&header, &claims);
        }
        if alg.starts_with("HS") {
            let key = client.secret_key(&alg)?;
            return client.jose().sign(&header, &claims, &key);
        }
        let key = private_signing_key(client, Some(&alg), None)?;
        header.kid = key.kid.clone();
        client.jose().sign(&header, &claims, key)
    }
}

fn private_signing_key<'c>(
    client: &'c Client,
    alg: Option<&str>,
    kid: Option<&str>,
) -> Result<&'c JsonWebKey> {
    let query = KeyQuery { use_purpose: Some("sig"), alg, kid };
    client
        .jwks()
        .keys
        .iter()
        .filter(|key| key.kty != "oct" && key.param("d").is_some())
        .find(|key| key.matches(&query))
        .ok_or_else(|| match kid {
            Some(kid) => NilaOidcError::KeyNotFound(kid.to_string()),
            None => NilaOidcError::NoMatchingKey(alg.unwrap_or("<any>").to_string()),
        })
}
