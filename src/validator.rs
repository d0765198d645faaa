// src/validator.rs

pub mod checkers;
pub mod decrypter;

use crate::client::Client;
use crate::config::TokenUse;
use crate::error::{NilaOidcError, Result};
use crate::jose::{ClaimMap, DecodedJwt, JoseHeader};
use crate::model::{JsonWebKeySet, KeyQuery};
use checkers::{
    AudienceChecker, AuthTimeChecker, AuthorizedPartyChecker, ClaimCheckerManager,
    ExpirationTimeChecker, HashChecker, IssuedAtChecker, IssuerChecker, NonceChecker,
    NotBeforeChecker,
};
pub use decrypter::TokenDecrypter;
use serde_json::Value;
use tracing::{debug, instrument};

/// Claims every ID Token must carry.
pub const ID_TOKEN_REQUIRED_CLAIMS: [&str; 5] = ["iss", "sub", "aud", "exp", "iat"];

/// What a token is checked against besides its signature.
///
/// Built per token from the flow context: the session nonce/state, the
/// caller's `max_age`, and the access token / code the token must bind to.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRules<'a> {
    pub token_use: TokenUse,
    pub nonce: Option<&'a str>,
    pub state: Option<&'a str>,
    pub max_age: Option<u64>,
    pub access_token: Option<&'a str>,
    pub code: Option<&'a str>,
}

impl<'a> ClaimRules<'a> {
    pub fn new(token_use: TokenUse) -> Self {
        Self {
            token_use,
            nonce: None,
            state: None,
            max_age: None,
            access_token: None,
            code: None,
        }
    }

    pub fn id_token() -> Self {
        Self::new(TokenUse::IdToken)
    }

    pub fn userinfo() -> Self {
        Self::new(TokenUse::Userinfo)
    }

    pub fn authorization() -> Self {
        Self::new(TokenUse::Authorization)
    }

    pub fn nonce(mut self, nonce: Option<&'a str>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn state(mut self, state: Option<&'a str>) -> Self {
        self.state = state;
        self
    }

    pub fn max_age(mut self, max_age: Option<u64>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn access_token(mut self, access_token: Option<&'a str>) -> Self {
        self.access_token = access_token;
        self
    }

    pub fn code(mut self, code: Option<&'a str>) -> Self {
        self.code = code;
        self
    }
}

/// Verifies signed JWTs returned by the provider for one client.
///
/// The order is fixed: header `alg` binding, then claims, then keys and the
/// signature, so obviously invalid tokens fail without touching key material.
pub struct TokenVerifier<'c> {
    client: &'c Client,
}

impl<'c> TokenVerifier<'c> {
    pub fn new(client: &'c Client) -> Self {
        Self { client }
    }

    /// Verifies `token` against the algorithm the client metadata declares for
    /// `rules.token_use`.
    pub async fn verify(&self, token: &str, rules: &ClaimRules<'_>) -> Result<ClaimMap> {
        let expected_alg = self
            .client
            .metadata()
            .signed_response_alg(rules.token_use)
            .ok_or_else(|| {
                NilaOidcError::MissingConfiguration(format!(
                    "{}_signed_response_alg",
                    rules.token_use.as_str()
                ))
            })?;
        self.verify_with_alg(token, expected_alg, rules).await
    }

    /// Verifies `token`, requiring its header `alg` to be exactly `expected_alg`.
    #[instrument(skip(self, token, rules), fields(token_use = rules.token_use.as_str()), err)]
    pub async fn verify_with_alg(
        &self,
        token: &str,
        expected_alg: &str,
        rules: &ClaimRules<'_>,
    ) -> Result<ClaimMap> {
        let jwt = DecodedJwt::parse(token)?;
        let alg = jwt.header.alg.as_str();

        if alg != expected_alg {
            return Err(NilaOidcError::AlgorithmMismatch {
                expected: expected_alg.to_string(),
                actual: alg.to_string(),
            });
        }
        match (alg == "none", jwt.is_unsigned()) {
            (true, false) => {
                return Err(NilaOidcError::MalformedToken(
                    "alg none token carries a signature".to_string(),
                ))
            }
            (false, true) => {
                return Err(NilaOidcError::InvalidSignature(format!(
                    "token is unsigned but declares alg {alg}"
                )))
            }
            _ => {}
        }

        let (required, manager) = self.claim_checks(&jwt, rules)?;
        manager.check(&jwt.claims, &required)?;

        if alg == "none" {
            debug!("Accepting unsigned token as declared by client metadata");
            return Ok(jwt.claims);
        }

        let keys = self.signing_keys(&jwt.header).await?;
        match self.client.jose().verify(token, &keys) {
            Ok(true) => Ok(jwt.claims),
            Ok(false) => Err(NilaOidcError::InvalidSignature(
                "no candidate key verified the signature".to_string(),
            )),
            Err(e) => Err(NilaOidcError::InvalidSignature(e.to_string())),
        }
    }

    fn claim_checks(
        &self,
        jwt: &DecodedJwt,
        rules: &ClaimRules<'_>,
    ) -> Result<(Vec<&'static str>, ClaimCheckerManager)> {
        let metadata = self.client.metadata();
        let tolerance = self.client.clock_tolerance();
        let alg = jwt.header.alg.as_str();
        let tenant_id = jwt.claims.get("tid").and_then(Value::as_str);

        let mut manager = ClaimCheckerManager::default();
        manager.push(IssuerChecker::new(
            vec![self.client.issuer().metadata().issuer.clone()],
            tenant_id,
        ));
        manager.push(AudienceChecker::new(&metadata.client_id));
        manager.push(AuthorizedPartyChecker::new(&metadata.client_id));
        manager.push(ExpirationTimeChecker::new(tolerance));
        manager.push(IssuedAtChecker::new(tolerance));
        manager.push(NotBeforeChecker::new(tolerance));

        let mut required: Vec<&'static str> = Vec::new();
        if rules.token_use == TokenUse::IdToken {
            required.extend(ID_TOKEN_REQUIRED_CLAIMS);
            if rules.max_age.is_some() || metadata.require_auth_time {
                required.push("auth_time");
            }
        }
        if let Some(max_age) = rules.max_age {
            manager.push(AuthTimeChecker::new(max_age, tolerance));
        }
        if let Some(nonce) = rules.nonce {
            required.push("nonce");
            manager.push(NonceChecker::new(nonce));
        }
        if let Some(access_token) = rules.access_token {
            required.push("at_hash");
            manager.push(HashChecker::access_token(access_token, alg));
        }
        if let Some(code) = rules.code {
            required.push("c_hash");
            manager.push(HashChecker::code(code, alg));
        }
        // s_hash is optional, but once present it must verify.
        if jwt.claims.contains_key("s_hash") {
            let state = rules.state.ok_or_else(|| {
                NilaOidcError::invalid_claim("s_hash", "no state available to verify s_hash")
            })?;
            manager.push(HashChecker::state(state, alg));
        }

        Ok((required, manager))
    }

    /// Candidate verification keys for `header`.
    ///
    /// HMAC tokens are keyed by the client secret. Everything else uses the
    /// issuer's key set; a miss on a `kid` (or a never-loaded set) triggers
    /// exactly one refresh before giving up.
    async fn signing_keys(&self, header: &JoseHeader) -> Result<JsonWebKeySet> {
        let alg = header.alg.as_str();
        if alg.starts_with("HS") {
            return Ok(JsonWebKeySet::new(vec![self.client.secret_key(alg)?]));
        }

        let kid = header.kid.as_deref();
        let query = KeyQuery::signing(alg, kid);
        let issuer = self.client.issuer();

        let cached = issuer.jwks();
        let keys = cached.select(&query);
        if !keys.is_empty() {
            return Ok(keys);
        }
        if kid.is_none() && !cached.is_empty() {
            return Err(NilaOidcError::NoMatchingKey(alg.to_string()));
        }

        debug!(?kid, "No matching key in cached JWKS, refreshing");
        let refreshed = issuer.update_jwks().await?;
        let keys = refreshed.select(&query);
        if keys.is_empty() {
            return Err(match kid {
                Some(kid) => NilaOidcError::KeyNotFound(kid.to_string()),
                None => NilaOidcError::NoMatchingKey(alg.to_string()),
            });
        }
        Ok(keys)
    }
}

impl Client {
    /// Decrypts (when declared) and then verifies `token` per `rules`.
    pub async fn validate_token(&self, token: &str, rules: &ClaimRules<'_>) -> Result<ClaimMap> {
        let plaintext = TokenDecrypter::new(self).decrypt(token, rules.token_use)?;
        TokenVerifier::new(self).verify(&plaintext, rules).await
    }

    /// Decrypts and verifies an ID Token.
    pub async fn verify_id_token(&self, token: &str, rules: &ClaimRules<'_>) -> Result<ClaimMap> {
        self.validate_token(token, &ClaimRules { token_use: TokenUse::IdToken, ..*rules })
            .await
    }

    /// Decrypts and verifies a signed userinfo response.
    pub async fn verify_userinfo(&self, token: &str) -> Result<ClaimMap> {
        self.validate_token(token, &ClaimRules::userinfo()).await
    }

    /// Decrypts and verifies a JWT-secured authorization response.
    pub async fn verify_authorization_response(&self, token: &str) -> Result<ClaimMap> {
        self.validate_token(token, &ClaimRules::authorization()).await
    }
}
