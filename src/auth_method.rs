// src/auth_method.rs

use crate::client::Client;
use crate::error::{NilaOidcError, Result};
use crate::generator::{AssertionGenerator, JWT_BEARER_ASSERTION_TYPE};
use base64::engine::{general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Form parameters for a token endpoint request, in sending order.
pub type FormParams = Vec<(String, String)>;

/// A token endpoint request being assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEndpointRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub form: FormParams,
}

impl TokenEndpointRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: vec![("accept".to_string(), "application/json".to_string())],
            form: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// The `application/x-www-form-urlencoded` body.
    pub fn body(&self) -> Result<String> {
        serde_urlencoded::to_string(&self.form).map_err(|e| NilaOidcError::FormDecode(e.to_string()))
    }

    fn with_form(mut self, params: FormParams) -> Self {
        self.form.extend(params);
        self
    }

    fn push(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.push((name.to_string(), value.into()));
        self
    }
}

/// A token endpoint client authentication method.
pub trait AuthMethod: Send + Sync {
    /// The registered `token_endpoint_auth_method` name.
    fn supported_method(&self) -> &'static str;

    /// Adds `params` and this method's credentials to `request`.
    fn create_request(
        &self,
        request: TokenEndpointRequest,
        client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest>;

    /// True when authentication happens at the TLS layer, which selects the
    /// issuer's mTLS endpoint aliases.
    fn is_tls_bound(&self) -> bool {
        false
    }
}

fn client_secret<'c>(client: &'c Client, method: &str) -> Result<&'c str> {
    client
        .metadata()
        .client_secret
        .as_deref()
        .ok_or_else(|| NilaOidcError::MissingClientSecret(method.to_string()))
}

/// `none`: public clients; only the client id is sent by the caller's params.
#[derive(Debug, Default)]
pub struct NoneAuth;

impl AuthMethod for NoneAuth {
    fn supported_method(&self) -> &'static str {
        "none"
    }

    fn create_request(
        &self,
        request: TokenEndpointRequest,
        _client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest> {
        Ok(request.with_form(params))
    }
}

/// `client_secret_post`: credentials in the request body.
#[derive(Debug, Default)]
pub struct ClientSecretPost;

impl AuthMethod for ClientSecretPost {
    fn supported_method(&self) -> &'static str {
        "client_secret_post"
    }

    fn create_request(
        &self,
        request: TokenEndpointRequest,
        client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest> {
        let secret = client_secret(client, self.supported_method())?;
        Ok(request
            .with_form(params)
            .push("client_id", client.metadata().client_id.as_str())
            .push("client_secret", secret))
    }
}

/// `client_secret_basic`: credentials in an HTTP Basic header.
#[derive(Debug, Default)]
pub struct ClientSecretBasic;

impl AuthMethod for ClientSecretBasic {
    fn supported_method(&self) -> &'static str {
        "client_secret_basic"
    }

    fn create_request(
        &self,
        mut request: TokenEndpointRequest,
        client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest> {
        let secret = client_secret(client, self.supported_method())?;
        // Raw values, not form-encoded.
        let credentials = format!("{}:{}", client.metadata().client_id, secret);
        request.headers.push((
            "authorization".to_string(),
            format!("Basic {}", STANDARD.encode(credentials)),
        ));
        Ok(request.with_form(params))
    }
}

/// `client_secret_jwt`: an HMAC assertion keyed by the client secret.
#[derive(Debug, Default)]
pub struct ClientSecretJwt;

impl AuthMethod for ClientSecretJwt {
    fn supported_method(&self) -> &'static str {
        "client_secret_jwt"
    }

    fn create_request(
        &self,
        request: TokenEndpointRequest,
        client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest> {
        client_secret(client, self.supported_method())?;
        let assertion = AssertionGenerator::new(client.assertion_ttl()).client_secret_jwt(client)?;
        Ok(request
            .with_form(params)
            .push("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
            .push("client_assertion", assertion))
    }
}

/// `private_key_jwt`: an assertion signed with a client-held private key.
#[derive(Debug, Default)]
pub struct PrivateKeyJwt;

impl AuthMethod for PrivateKeyJwt {
    fn supported_method(&self) -> &'static str {
        "private_key_jwt"
    }

    fn create_request(
        &self,
        request: TokenEndpointRequest,
        client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest> {
        let assertion = AssertionGenerator::new(client.assertion_ttl()).private_key_jwt(client)?;
        Ok(request
            .with_form(params)
            .push("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
            .push("client_assertion", assertion))
    }
}

/// `tls_client_auth` and `self_signed_tls_client_auth` (RFC 8705).
///
/// The client certificate on the connection authenticates the client; this
/// layer only identifies it.
#[derive(Debug)]
pub struct TlsClientAuth {
    method: &'static str,
}

impl TlsClientAuth {
    /// PKI-bound certificates.
    pub fn pki() -> Self {
        Self { method: "tls_client_auth" }
    }

    pub fn self_signed() -> Self {
        Self { method: "self_signed_tls_client_auth" }
    }
}

impl AuthMethod for TlsClientAuth {
    fn supported_method(&self) -> &'static str {
        self.method
    }

    fn create_request(
        &self,
        request: TokenEndpointRequest,
        client: &Client,
        params: FormParams,
    ) -> Result<TokenEndpointRequest> {
        Ok(request
            .with_form(params)
            .push("client_id", client.metadata().client_id.as_str()))
    }

    fn is_tls_bound(&self) -> bool {
        true
    }
}

/// Maps `token_endpoint_auth_method` names to strategies.
///
/// The default factory registers every built-in method; [`register`] adds or
/// replaces one. Asking for an unknown name is a configuration error.
///
/// [`register`]: AuthMethodFactory::register
#[derive(Clone)]
pub struct AuthMethodFactory {
    methods: HashMap<&'static str, Arc<dyn AuthMethod>>,
}

impl Default for AuthMethodFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(Arc::new(NoneAuth));
        factory.register(Arc::new(ClientSecretPost));
        factory.register(Arc::new(ClientSecretBasic));
        factory.register(Arc::new(ClientSecretJwt));
        factory.register(Arc::new(PrivateKeyJwt));
        factory.register(Arc::new(TlsClientAuth::pki()));
        factory.register(Arc::new(TlsClientAuth::self_signed()));
        factory
    }
}

impl fmt::Debug for AuthMethodFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("AuthMethodFactory").field("methods", &names).finish()
    }
}

impl AuthMethodFactory {
    pub fn empty() -> Self {
        Self { methods: HashMap::new() }
    }

    pub fn register(&mut self, method: Arc<dyn AuthMethod>) {
        self.methods.insert(method.supported_method(), method);
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn AuthMethod>> {
        self.methods
            .get(name)
            .cloned()
            .ok_or_else(|| NilaOidcError::UnknownAuthMethod(name.to_string()))
    }
}
