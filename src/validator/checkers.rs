// src/validator/checkers.rs

use crate::error::{NilaOidcError, Result};
use crate::jose::{base64url_encode, ClaimMap};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Placeholder in an expected issuer that is replaced by the token's `tid`.
pub const TENANT_PLACEHOLDER: &str = "{tenantid}";

/// A named predicate over one claim value.
///
/// Checkers are bound to their expected value at construction and are
/// stateless afterwards. They only run for claims present in the payload;
/// presence itself is enforced by the required-claim list.
pub trait ClaimChecker: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, value: &Value) -> Result<()>;
}

/// Runs the required-claim check and then every checker whose claim is present.
#[derive(Default)]
pub struct ClaimCheckerManager {
    checkers: Vec<Box<dyn ClaimChecker>>,
}

impl ClaimCheckerManager {
    pub fn new(checkers: Vec<Box<dyn ClaimChecker>>) -> Self {
        Self { checkers }
    }

    pub fn push(&mut self, checker: impl ClaimChecker + 'static) {
        self.checkers.push(Box::new(checker));
    }

    /// Fails with `MissingRequiredClaim` before any checker runs when a
    /// required claim is absent or null.
    pub fn check(&self, claims: &ClaimMap, required: &[&str]) -> Result<()> {
        for name in required {
            match claims.get(*name) {
                Some(value) if !value.is_null() => {}
                _ => {
                    debug!("Missing required claim: {}", name);
                    return Err(NilaOidcError::MissingRequiredClaim(name.to_string()));
                }
            }
        }
        for checker in &self.checkers {
            if let Some(value) = claims.get(checker.name()) {
                checker.check(value)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn timestamp(name: &str, value: &Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| NilaOidcError::invalid_claim(name, "must be an integer timestamp"))
}

fn string<'a>(name: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| NilaOidcError::invalid_claim(name, "must be a string"))
}

/// `iss` must equal one of the allowed issuers.
///
/// An allowed issuer may contain [`TENANT_PLACEHOLDER`]; it is substituted
/// with the payload's `tid` claim before comparing.
pub struct IssuerChecker {
    allowed: Vec<String>,
}

impl IssuerChecker {
    pub fn new(allowed: Vec<String>, tenant_id: Option<&str>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|issuer| match tenant_id {
                Some(tid) if issuer.contains(TENANT_PLACEHOLDER) => {
                    issuer.replace(TENANT_PLACEHOLDER, tid)
                }
                _ => issuer,
            })
            .collect();
        Self { allowed }
    }
}

impl ClaimChecker for IssuerChecker {
    fn name(&self) -> &str {
        "iss"
    }

    fn check(&self, value: &Value) -> Result<()> {
        let iss = string("iss", value)?;
        if self.allowed.iter().any(|allowed| allowed == iss) {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim(
                "iss",
                format!("unexpected issuer {iss}, expected one of {:?}", self.allowed),
            ))
        }
    }
}

/// `aud` must be the client id, or a list containing it.
pub struct AudienceChecker {
    client_id: String,
}

impl AudienceChecker {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into() }
    }
}

impl ClaimChecker for AudienceChecker {
    fn name(&self) -> &str {
        "aud"
    }

    fn check(&self, value: &Value) -> Result<()> {
        let ok = match value {
            Value::String(aud) => *aud == self.client_id,
            Value::Array(list) => list.iter().any(|aud| aud.as_str() == Some(&self.client_id)),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim(
                "aud",
                format!("{} is not an audience of the token", self.client_id),
            ))
        }
    }
}

/// `azp`, when present, must be the client id.
pub struct AuthorizedPartyChecker {
    client_id: String,
}

impl AuthorizedPartyChecker {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into() }
    }
}

impl ClaimChecker for AuthorizedPartyChecker {
    fn name(&self) -> &str {
        "azp"
    }

    fn check(&self, value: &Value) -> Result<()> {
        if string("azp", value)? == self.client_id {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim("azp", "authorized party is not this client"))
        }
    }
}

/// `exp` must be in the future, allowing `tolerance` seconds of skew.
pub struct ExpirationTimeChecker {
    tolerance: i64,
    now: i64,
}

impl ExpirationTimeChecker {
    pub fn new(tolerance: i64) -> Self {
        Self::at(tolerance, unix_now())
    }

    pub fn at(tolerance: i64, now: i64) -> Self {
        Self { tolerance, now }
    }
}

impl ClaimChecker for ExpirationTimeChecker {
    fn name(&self) -> &str {
        "exp"
    }

    fn check(&self, value: &Value) -> Result<()> {
        let exp = timestamp("exp", value)?;
        if exp > self.now - self.tolerance {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim("exp", format!("token expired at {exp}")))
        }
    }
}

/// `iat` must not be in the future beyond `tolerance`.
pub struct IssuedAtChecker {
    tolerance: i64,
    now: i64,
}

impl IssuedAtChecker {
    pub fn new(tolerance: i64) -> Self {
        Self::at(tolerance, unix_now())
    }

    pub fn at(tolerance: i64, now: i64) -> Self {
        Self { tolerance, now }
    }
}

impl ClaimChecker for IssuedAtChecker {
    fn name(&self) -> &str {
        "iat"
    }

    fn check(&self, value: &Value) -> Result<()> {
        let iat = timestamp("iat", value)?;
        if iat <= self.now + self.tolerance {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim("iat", format!("issued in the future ({iat})")))
        }
    }
}

/// `nbf` must not be in the future beyond `tolerance`.
pub struct NotBeforeChecker {
    tolerance: i64,
    now: i64,
}

impl NotBeforeChecker {
    pub fn new(tolerance: i64) -> Self {
        Self::at(tolerance, unix_now())
    }

    pub fn at(tolerance: i64, now: i64) -> Self {
        Self { tolerance, now }
    }
}

impl ClaimChecker for NotBeforeChecker {
    fn name(&self) -> &str {
        "nbf"
    }

    fn check(&self, value: &Value) -> Result<()> {
        let nbf = timestamp("nbf", value)?;
        if nbf <= self.now + self.tolerance {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim("nbf", format!("token not valid before {nbf}")))
        }
    }
}

/// `auth_time` must be within `max_age` seconds (plus `tolerance`) of now.
pub struct AuthTimeChecker {
    max_age: i64,
    tolerance: i64,
    now: i64,
}

impl AuthTimeChecker {
    pub fn new(max_age: u64, tolerance: i64) -> Self {
        Self::at(max_age, tolerance, unix_now())
    }

    pub fn at(max_age: u64, tolerance: i64, now: i64) -> Self {
        Self {
            max_age: i64::try_from(max_age).unwrap_or(i64::MAX),
            tolerance,
            now,
        }
    }
}

impl ClaimChecker for AuthTimeChecker {
    fn name(&self) -> &str {
        "auth_time"
    }

    fn check(&self, value: &Value) -> Result<()> {
        let auth_time = timestamp("auth_time", value)?;
        if self.now - auth_time > self.max_age.saturating_add(self.tolerance) {
            Err(NilaOidcError::invalid_claim(
                "auth_time",
                format!("end-user authenticated too long ago (max_age {})", self.max_age),
            ))
        } else {
            Ok(())
        }
    }
}

/// `nonce` must equal the value stored in the auth session.
pub struct NonceChecker {
    nonce: String,
}

impl NonceChecker {
    pub fn new(nonce: impl Into<String>) -> Self {
        Self { nonce: nonce.into() }
    }
}

impl ClaimChecker for NonceChecker {
    fn name(&self) -> &str {
        "nonce"
    }

    fn check(&self, value: &Value) -> Result<()> {
        if string("nonce", value)? == self.nonce {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim("nonce", "nonce mismatch"))
        }
    }
}

/// Computes the OIDC hash binding of `reference` for a token signed with `alg`.
///
/// The SHA-2 variant is picked from the last three characters of the
/// algorithm name (`384`, `512`, anything else is SHA-256); the left half of
/// the digest is base64url-encoded.
pub fn claim_hash(reference: &str, alg: &str) -> String {
    let suffix = alg.get(alg.len().saturating_sub(3)..).unwrap_or_default();
    let digest: Vec<u8> = match suffix {
        "384" => Sha384::digest(reference.as_bytes()).to_vec(),
        "512" => Sha512::digest(reference.as_bytes()).to_vec(),
        _ => Sha256::digest(reference.as_bytes()).to_vec(),
    };
    base64url_encode(&digest[..digest.len() / 2])
}

/// `at_hash`, `c_hash` or `s_hash` must bind the token to a reference value.
pub struct HashChecker {
    claim: &'static str,
    expected: String,
}

impl HashChecker {
    /// Binds to the access token.
    pub fn access_token(access_token: &str, alg: &str) -> Self {
        Self { claim: "at_hash", expected: claim_hash(access_token, alg) }
    }

    /// Binds to the authorization code.
    pub fn code(code: &str, alg: &str) -> Self {
        Self { claim: "c_hash", expected: claim_hash(code, alg) }
    }

    /// Binds to the `state` parameter.
    pub fn state(state: &str, alg: &str) -> Self {
        Self { claim: "s_hash", expected: claim_hash(state, alg) }
    }
}

impl ClaimChecker for HashChecker {
    fn name(&self) -> &str {
        self.claim
    }

    fn check(&self, value: &Value) -> Result<()> {
        if string(self.claim, value)? == self.expected {
            Ok(())
        } else {
            Err(NilaOidcError::invalid_claim(self.claim, "hash binding mismatch"))
        }
    }
}
