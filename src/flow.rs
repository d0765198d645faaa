// src/flow.rs

use crate::auth_method::{FormParams, TokenEndpointRequest};
use crate::client::Client;
use crate::config::TokenUse;
use crate::error::{NilaOidcError, OAuth2Error, Result};
use crate::generator::{code_challenge, random, AssertionGenerator};
use crate::jose::ClaimMap;
use crate::token_set::TokenSet;
use crate::validator::{ClaimRules, TokenDecrypter, TokenVerifier};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, WWW_AUTHENTICATE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

/// Per-attempt values the caller stores (e.g. in a cookie) between the
/// redirect and the callback. The engine only reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_verifier: Option<String>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session with a fresh random `state`, `nonce` and PKCE verifier.
    pub fn generate() -> Self {
        Self {
            state: Some(random()),
            nonce: Some(random()),
            code_verifier: Some(random()),
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.code_verifier.as_deref()
    }

    /// The authorization request parameters bound to this session:
    /// `state`, `nonce` and the S256 PKCE challenge, for whichever are set.
    pub fn authorization_params(&self) -> ClaimMap {
        let mut params = ClaimMap::new();
        if let Some(state) = &self.state {
            params.insert("state".into(), Value::String(state.clone()));
        }
        if let Some(nonce) = &self.nonce {
            params.insert("nonce".into(), Value::String(nonce.clone()));
        }
        if let Some(verifier) = &self.code_verifier {
            params.insert("code_challenge".into(), Value::String(code_challenge(verifier)));
            params.insert("code_challenge_method".into(), Value::from("S256"));
        }
        params
    }
}

/// Caller context for [`Client::callback`] and [`Client::exchange_code`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CallbackChecks<'a> {
    /// Overrides the first configured redirect URI in the code exchange.
    pub redirect_uri: Option<&'a str>,
    pub session: Option<&'a AuthSession>,
    /// The `max_age` sent in the authorization request, in seconds.
    pub max_age: Option<u64>,
}

impl<'a> CallbackChecks<'a> {
    pub fn with_session(session: &'a AuthSession) -> Self {
        Self {
            session: Some(session),
            ..Default::default()
        }
    }

    fn nonce(&self) -> Option<&'a str> {
        self.session.and_then(AuthSession::nonce)
    }

    fn state(&self) -> Option<&'a str> {
        self.session.and_then(AuthSession::state)
    }
}

/// Extracts an OAuth2 error from response or callback parameters.
pub fn oauth2_error(params: &ClaimMap) -> Option<OAuth2Error> {
    let text = |name: &str| match params.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    Some(OAuth2Error {
        error: text("error")?,
        error_description: text("error_description"),
        error_uri: text("error_uri"),
    })
}

static AUTH_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("static regex"));

/// Reads an OAuth2 error out of a `WWW-Authenticate: Bearer error="..."` header.
fn www_authenticate_error(header: &str) -> Option<OAuth2Error> {
    let params: ClaimMap = AUTH_PARAM
        .captures_iter(header)
        .map(|caps| (caps[1].to_string(), Value::String(caps[2].to_string())))
        .collect();
    oauth2_error(&params)
}

fn query_value(name: &str, value: Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => s,
        Value::Object(_) if name == "claims" => serde_json::to_string(&value)?,
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    })
}

impl Client {
    /// Builds the authorization endpoint URL.
    ///
    /// Defaults (`client_id`, `scope=openid`, the first response type and
    /// redirect URI) are overridden by `params`; null values drop a parameter.
    /// Any `response_type` other than exactly `code` requires a `nonce`.
    pub fn authorization_url(&self, params: ClaimMap) -> Result<Url> {
        let metadata = self.metadata();
        let mut query = ClaimMap::new();
        query.insert("client_id".into(), Value::String(metadata.client_id.clone()));
        query.insert("scope".into(), Value::from("openid"));
        if let Some(response_type) = metadata.response_types.first() {
            query.insert("response_type".into(), Value::String(response_type.clone()));
        }
        if let Some(redirect_uri) = metadata.redirect_uris.first() {
            query.insert("redirect_uri".into(), Value::String(redirect_uri.clone()));
        }
        query.extend(params);

        let pairs = query
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                let value = query_value(&name, value)?;
                Ok((name, value))
            })
            .collect::<Result<Vec<(String, String)>>>()?;

        let value_of = |name: &str| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        if value_of("response_type") != Some("code") && value_of("nonce").map_or(true, str::is_empty) {
            return Err(NilaOidcError::InvalidArgument(
                "nonce is required for implicit and hybrid response types".to_string(),
            ));
        }

        let mut url = self
            .issuer()
            .metadata()
            .authorization_endpoint
            .clone()
            .ok_or_else(|| NilaOidcError::MissingConfiguration("authorization_endpoint".to_string()))?;
        url.query_pairs_mut().extend_pairs(&pairs);
        Ok(url)
    }

    /// A signed (or unsecured) request object carrying `params`.
    pub fn request_object(&self, params: ClaimMap) -> Result<String> {
        AssertionGenerator::new(self.assertion_ttl()).request_object(self, params)
    }

    /// Consumes the authorization response parameters.
    ///
    /// Errors from the provider surface as protocol errors. An ID Token
    /// delivered in the front channel is verified with its `at_hash`/`c_hash`
    /// bindings; a code is then exchanged at the token endpoint.
    #[instrument(skip(self, params, checks), fields(client_id = %self.metadata().client_id), err)]
    pub async fn callback(&self, params: ClaimMap, checks: &CallbackChecks<'_>) -> Result<TokenSet> {
        if let Some(error) = oauth2_error(&params) {
            return Err(NilaOidcError::Protocol(error));
        }
        let mut token_set = TokenSet::from_params(params)?;

        if let Some(expected) = checks.state() {
            if token_set.state() != Some(expected) {
                return Err(NilaOidcError::StateMismatch);
            }
        }

        if token_set.id_token().is_some() {
            let rules = ClaimRules::id_token()
                .nonce(checks.nonce())
                .state(checks.state())
                .max_age(checks.max_age)
                .access_token(token_set.access_token())
                .code(token_set.code());
            token_set = self.verify_token_set(&token_set, &rules).await?;
        }

        if token_set.code().is_some() {
            return self.exchange_code(&token_set, checks).await;
        }
        Ok(token_set)
    }

    /// Exchanges the authorization code in `token_set` for tokens.
    pub async fn exchange_code(
        &self,
        token_set: &TokenSet,
        checks: &CallbackChecks<'_>,
    ) -> Result<TokenSet> {
        let code = token_set
            .code()
            .ok_or_else(|| NilaOidcError::InvalidArgument("no authorization code to exchange".to_string()))?;
        let redirect_uri = checks
            .redirect_uri
            .or_else(|| self.metadata().redirect_uris.first().map(String::as_str))
            .ok_or(NilaOidcError::MissingRedirectUri)?;

        let mut params: FormParams = vec![
            ("grant_type".into(), "authorization_code".into()),
            ("code".into(), code.to_string()),
            ("redirect_uri".into(), redirect_uri.to_string()),
        ];
        let verifier = checks
            .session
            .and_then(AuthSession::code_verifier)
            .or_else(|| token_set.code_verifier());
        if let Some(verifier) = verifier {
            params.push(("code_verifier".into(), verifier.to_string()));
        }

        let tokens = self.grant(params).await?;
        // No code or access token binding applies to the back-channel ID Token.
        let rules = ClaimRules::id_token()
            .nonce(checks.nonce())
            .state(checks.state())
            .max_age(checks.max_age);
        self.verify_token_set(&tokens, &rules).await
    }

    /// Uses a refresh token. `extra` is appended to the grant parameters.
    #[instrument(skip(self, refresh_token, extra), err)]
    pub async fn refresh(&self, refresh_token: &str, extra: FormParams) -> Result<TokenSet> {
        let mut params: FormParams = vec![
            ("grant_type".into(), "refresh_token".into()),
            ("refresh_token".into(), refresh_token.to_string()),
        ];
        params.extend(extra);

        let tokens = self.grant(params).await?;
        self.verify_token_set(&tokens, &ClaimRules::id_token()).await
    }

    /// Sends an authenticated token endpoint request and parses the response.
    #[instrument(skip(self, params), fields(method = %self.metadata().token_endpoint_auth_method), err)]
    pub async fn grant(&self, params: FormParams) -> Result<TokenSet> {
        let metadata = self.metadata();
        let method = self.auth_methods().create(&metadata.token_endpoint_auth_method)?;
        let tls_bound = method.is_tls_bound() || metadata.tls_client_certificate_bound_access_tokens;
        let endpoint = self
            .issuer()
            .metadata()
            .token_endpoint_for(tls_bound)
            .cloned()
            .ok_or_else(|| NilaOidcError::MissingConfiguration("token_endpoint".to_string()))?;

        let request = method.create_request(TokenEndpointRequest::new(endpoint), self, params)?;
        let mut builder = self
            .http_client()
            .post(request.url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.body()?);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Token endpoint responded with {}", status);

        let mut params = match serde_json::from_str::<ClaimMap>(&body) {
            Ok(params) => params,
            Err(_) if !status.is_success() => {
                return Err(NilaOidcError::UnexpectedResponse { status: status.as_u16(), body })
            }
            Err(e) => return Err(e.into()),
        };

        let wrapped = params.get("response").and_then(Value::as_str).map(str::to_string);
        if let Some(response) = wrapped {
            params = self.verify_authorization_response(&response).await?;
        }
        if let Some(error) = oauth2_error(&params) {
            return Err(NilaOidcError::Protocol(error));
        }
        if !status.is_success() {
            return Err(NilaOidcError::UnexpectedResponse { status: status.as_u16(), body });
        }
        TokenSet::from_params(params)
    }

    /// Fetches the userinfo claims for `access_token`.
    ///
    /// Signed and/or encrypted responses are decrypted and verified per the
    /// client's `userinfo_*` metadata. When `expected_sub` is given the
    /// response `sub` must equal it.
    #[instrument(skip(self, access_token), err)]
    pub async fn userinfo(&self, access_token: &str, expected_sub: Option<&str>) -> Result<ClaimMap> {
        let metadata = self.metadata();
        let endpoint = self
            .issuer()
            .metadata()
            .userinfo_endpoint_for(metadata.tls_client_certificate_bound_access_tokens)
            .cloned()
            .ok_or_else(|| NilaOidcError::MissingConfiguration("userinfo_endpoint".to_string()))?;
        let signed = metadata.signed_response_alg(TokenUse::Userinfo).is_some();
        let jwt_expected = signed || metadata.encrypted_response(TokenUse::Userinfo).is_some();

        let response = self
            .http_client()
            .get(endpoint)
            .bearer_auth(access_token)
            .header(ACCEPT, if jwt_expected { "application/jwt" } else { "application/json" })
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let error = serde_json::from_str::<ClaimMap>(&body)
                .ok()
                .and_then(|params| oauth2_error(&params))
                .or_else(|| {
                    headers
                        .get(WWW_AUTHENTICATE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(www_authenticate_error)
                });
            return Err(match error {
                Some(error) => NilaOidcError::Protocol(error),
                None => NilaOidcError::UnexpectedResponse { status: status.as_u16(), body },
            });
        }

        let is_jwt = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/jwt"));

        let claims = if is_jwt {
            let plaintext = TokenDecrypter::new(self).decrypt(body.trim(), TokenUse::Userinfo)?;
            if signed {
                TokenVerifier::new(self).verify(&plaintext, &ClaimRules::userinfo()).await?
            } else {
                serde_json::from_str(&plaintext)?
            }
        } else if jwt_expected {
            return Err(NilaOidcError::MalformedToken(
                "expected an application/jwt userinfo response".to_string(),
            ));
        } else {
            serde_json::from_str(&body)?
        };

        if let Some(expected) = expected_sub {
            let actual = claims.get("sub").and_then(Value::as_str).unwrap_or_default();
            if actual != expected {
                warn!("Userinfo subject does not match the ID Token subject");
                return Err(NilaOidcError::SubjectMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(claims)
    }

    /// Decrypts and verifies the ID Token of `token_set`, if any, returning a
    /// copy that carries the plaintext token and its verified claims.
    async fn verify_token_set(&self, token_set: &TokenSet, rules: &ClaimRules<'_>) -> Result<TokenSet> {
        let Some(id_token) = token_set.id_token() else {
            return Ok(token_set.clone());
        };
        let plaintext = TokenDecrypter::new(self).decrypt(id_token, TokenUse::IdToken)?;
        let claims = TokenVerifier::new(self).verify(&plaintext, rules).await?;
        Ok(token_set.with_id_token(plaintext).with_verified_claims(claims))
    }
}
