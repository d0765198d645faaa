// src/token_set.rs

use crate::error::{NilaOidcError, Result};
use crate::jose::ClaimMap;
use serde_json::Value;

const KNOWN_FIELDS: [&str; 8] = [
    "code",
    "state",
    "token_type",
    "access_token",
    "id_token",
    "refresh_token",
    "expires_in",
    "code_verifier",
];

/// The result of a callback or a token endpoint grant.
///
/// A `TokenSet` is never edited in place. [`TokenSet::with_id_token`] returns
/// a copy carrying a replacement (decrypted) ID Token, and ID Token claims are
/// only attached once the token has been verified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenSet {
    code: Option<String>,
    state: Option<String>,
    token_type: Option<String>,
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    code_verifier: Option<String>,
    extra: ClaimMap,
    id_token_claims: Option<ClaimMap>,
}

impl TokenSet {
    /// Builds a token set from callback or token response parameters.
    ///
    /// `expires_in` may be a JSON number or a numeric string; anything not in
    /// the well-known field list is kept in [`TokenSet::extra`].
    pub fn from_params(params: ClaimMap) -> Result<Self> {
        let mut set = TokenSet::default();
        for (name, value) in params {
            if value.is_null() {
                continue;
            }
            match name.as_str() {
                "expires_in" => set.expires_in = Some(expires_in(&value)?),
                field if KNOWN_FIELDS.contains(&field) => {
                    let value = string_field(field, value)?;
                    match field {
                        "code" => set.code = Some(value),
                        "state" => set.state = Some(value),
                        "token_type" => set.token_type = Some(value),
                        "access_token" => set.access_token = Some(value),
                        "id_token" => set.id_token = Some(value),
                        "refresh_token" => set.refresh_token = Some(value),
                        _ => set.code_verifier = Some(value),
                    }
                }
                _ => {
                    set.extra.insert(name, value);
                }
            }
        }
        Ok(set)
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Lifetime of the access token in seconds.
    pub fn expires_in(&self) -> Option<i64> {
        self.expires_in
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.code_verifier.as_deref()
    }

    /// A response member outside the well-known token fields, e.g. `scope`.
    pub fn extra(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    /// The verified ID Token claims, `None` until verification succeeded.
    pub fn id_token_claims(&self) -> Option<&ClaimMap> {
        self.id_token_claims.as_ref()
    }

    /// The `sub` of the verified ID Token.
    pub fn subject(&self) -> Option<&str> {
        self.id_token_claims.as_ref()?.get("sub")?.as_str()
    }

    /// A copy of this set with `id_token` replaced. Previously verified claims
    /// are discarded since they belonged to the old token.
    pub fn with_id_token(&self, id_token: impl Into<String>) -> Self {
        Self {
            id_token: Some(id_token.into()),
            id_token_claims: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_verified_claims(mut self, claims: ClaimMap) -> Self {
        self.id_token_claims = Some(claims);
        self
    }
}

fn string_field(name: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(NilaOidcError::MalformedToken(format!(
            "token response member {name} must be a string, got {other}"
        ))),
    }
}

fn expires_in(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| {
        NilaOidcError::MalformedToken("token response member expires_in must be an integer".to_string())
    })
}
