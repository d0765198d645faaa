// src/response_mode.rs

use crate::client::Client;
use crate::error::{NilaOidcError, Result};
use crate::jose::ClaimMap;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use tracing::{debug, instrument};
use url::Url;

/// How the provider returned the authorization response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Query,
    Fragment,
    FormPost,
    /// JARM (JWT-secured authorization response) variants.
    QueryJwt,
    FragmentJwt,
    FormPostJwt,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Query => "query",
            ResponseMode::Fragment => "fragment",
            ResponseMode::FormPost => "form_post",
            ResponseMode::QueryJwt => "query.jwt",
            ResponseMode::FragmentJwt => "fragment.jwt",
            ResponseMode::FormPostJwt => "form_post.jwt",
        }
    }

    pub fn is_jwt(&self) -> bool {
        matches!(
            self,
            ResponseMode::QueryJwt | ResponseMode::FragmentJwt | ResponseMode::FormPostJwt
        )
    }

    fn jwt(self) -> Self {
        match self {
            ResponseMode::Query => ResponseMode::QueryJwt,
            ResponseMode::Fragment => ResponseMode::FragmentJwt,
            ResponseMode::FormPost => ResponseMode::FormPostJwt,
            jwt => jwt,
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inbound request the provider redirected (or posted) the user agent to.
///
/// Web frameworks do not forward the URL fragment to the server, so callers
/// handling `fragment` mode rebuild the URI from what the browser page sends.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub method: Method,
    pub uri: Url,
    pub body: Option<String>,
}

impl CallbackRequest {
    pub fn get(uri: Url) -> Self {
        Self { method: Method::GET, uri, body: None }
    }

    /// A `form_post` callback with an `application/x-www-form-urlencoded` body.
    pub fn post(uri: Url, body: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            uri,
            body: Some(body.into()),
        }
    }
}

/// Parses a form-encoded string into a flat parameter map. Repeated names
/// keep their last value.
pub fn parse_form(input: &str) -> Result<ClaimMap> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(input).map_err(|e| NilaOidcError::FormDecode(e.to_string()))?;
    Ok(pairs
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect())
}

/// Infers the response mode of `request` and extracts its raw parameters.
///
/// POST means `form_post`; otherwise a non-empty fragment means `fragment`;
/// otherwise `query`. A `response` parameter marks the JWT variant.
pub fn infer_response_mode(request: &CallbackRequest) -> Result<(ResponseMode, ClaimMap)> {
    let (mode, params) = if request.method == Method::POST {
        (ResponseMode::FormPost, parse_form(request.body.as_deref().unwrap_or_default())?)
    } else {
        match request.uri.fragment().filter(|f| !f.is_empty()) {
            Some(fragment) => (ResponseMode::Fragment, parse_form(fragment)?),
            None => (ResponseMode::Query, parse_form(request.uri.query().unwrap_or_default())?),
        }
    };

    if params.contains_key("response") {
        Ok((mode.jwt(), params))
    } else {
        Ok((mode, params))
    }
}

/// Turns a callback request into the flat parameter map the flow consumes.
pub struct ResponseModeResolver<'c> {
    client: &'c Client,
}

impl<'c> ResponseModeResolver<'c> {
    pub fn new(client: &'c Client) -> Self {
        Self { client }
    }

    /// For JWT response modes the `response` value is decrypted and verified
    /// as an authorization response and its claims replace the raw parameters.
    #[instrument(skip(self, request), fields(method = %request.method), err)]
    pub async fn resolve(&self, request: &CallbackRequest) -> Result<(ResponseMode, ClaimMap)> {
        let (mode, params) = infer_response_mode(request)?;
        debug!(response_mode = mode.as_str(), "Resolved callback response mode");
        if !mode.is_jwt() {
            return Ok((mode, params));
        }

        let response = params
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| NilaOidcError::MalformedToken("response parameter is empty".to_string()))?;
        let claims = self.client.verify_authorization_response(response).await?;
        Ok((mode, claims))
    }
}

impl Client {
    /// Resolves the response mode of `request` and returns its parameters,
    /// ready for [`Client::callback`].
    pub async fn callback_params(&self, request: &CallbackRequest) -> Result<ClaimMap> {
        let (_, params) = ResponseModeResolver::new(self).resolve(request).await?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn post_body_is_form_post() {
        let request = CallbackRequest::post(url("https://rp.example.com/cb"), "response=x");
        let (mode, params) = infer_response_mode(&request).unwrap();
        assert_eq!(mode, ResponseMode::FormPostJwt);
        assert_eq!(params["response"], "x");
    }

    #[test]
    fn fragment_wins_over_query() {
        let request = CallbackRequest::get(url("https://rp.example.com/cb?a=1#response=x"));
        let (mode, _) = infer_response_mode(&request).unwrap();
        assert_eq!(mode, ResponseMode::FragmentJwt);
    }

    #[test]
    fn empty_fragment_falls_back_to_query() {
        let (mode, params) =
            infer_response_mode(&CallbackRequest::get(url("https://rp.example.com/cb?a=1#"))).unwrap();
        assert_eq!(mode, ResponseMode::Query);
        assert_eq!(params["a"], "1");

        let (mode, params) =
            infer_response_mode(&CallbackRequest::get(url("https://rp.example.com/cb"))).unwrap();
        assert_eq!(mode, ResponseMode::Query);
        assert!(params.is_empty());
    }
}
