// src/config.rs

use crate::error::NilaOidcError;
use serde::Deserialize;
use url::Url;

/// The artifacts the provider may sign and/or encrypt for this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenUse {
    IdToken,
    Userinfo,
    /// A JWT-secured authorization response (`response` parameter).
    Authorization,
}

impl TokenUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenUse::IdToken => "id_token",
            TokenUse::Userinfo => "userinfo",
            TokenUse::Authorization => "authorization",
        }
    }
}

/// The client's registered metadata.
///
/// Field names follow the OIDC Dynamic Client Registration document, so a
/// registration response can be deserialized directly. Read-only once built.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMetadata {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
    /// Signing algorithm for `client_secret_jwt` / `private_key_jwt` assertions.
    #[serde(default)]
    pub token_endpoint_auth_signing_alg: Option<String>,
    /// Key id of the client key used for `private_key_jwt` assertions.
    #[serde(default)]
    pub token_endpoint_auth_key_id: Option<String>,

    #[serde(default = "default_signing_alg")]
    pub id_token_signed_response_alg: String,
    #[serde(default)]
    pub id_token_encrypted_response_alg: Option<String>,
    #[serde(default)]
    pub id_token_encrypted_response_enc: Option<String>,

    /// When unset, userinfo responses are plain JSON unless they arrive encrypted.
    #[serde(default)]
    pub userinfo_signed_response_alg: Option<String>,
    #[serde(default)]
    pub userinfo_encrypted_response_alg: Option<String>,
    #[serde(default)]
    pub userinfo_encrypted_response_enc: Option<String>,

    #[serde(default = "default_signing_alg")]
    pub authorization_signed_response_alg: String,
    #[serde(default)]
    pub authorization_encrypted_response_alg: Option<String>,
    #[serde(default)]
    pub authorization_encrypted_response_enc: Option<String>,

    #[serde(default)]
    pub request_object_signing_alg: Option<String>,

    #[serde(default)]
    pub require_auth_time: bool,
    #[serde(default)]
    pub tls_client_certificate_bound_access_tokens: bool,
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_auth_method() -> String {
    "client_secret_basic".to_string()
}

fn default_signing_alg() -> String {
    "RS256".to_string()
}

const DEFAULT_ENCRYPTION_ENC: &str = "A128CBC-HS256";

impl ClientMetadata {
    /// The JWS `alg` the provider must use for `token_use`, if signing is declared.
    pub fn signed_response_alg(&self, token_use: TokenUse) -> Option<&str> {
        match token_use {
            TokenUse::IdToken => Some(&self.id_token_signed_response_alg),
            TokenUse::Userinfo => self.userinfo_signed_response_alg.as_deref(),
            TokenUse::Authorization => Some(&self.authorization_signed_response_alg),
        }
    }

    /// The JWE `(alg, enc)` pair declared for `token_use`, if any.
    ///
    /// `enc` defaults to `A128CBC-HS256` when only `alg` is declared.
    pub fn encrypted_response(&self, token_use: TokenUse) -> Option<(&str, &str)> {
        let (alg, enc) = match token_use {
            TokenUse::IdToken => (
                &self.id_token_encrypted_response_alg,
                &self.id_token_encrypted_response_enc,
            ),
            TokenUse::Userinfo => (
                &self.userinfo_encrypted_response_alg,
                &self.userinfo_encrypted_response_enc,
            ),
            TokenUse::Authorization => (
                &self.authorization_encrypted_response_alg,
                &self.authorization_encrypted_response_enc,
            ),
        };
        alg.as_deref()
            .map(|alg| (alg, enc.as_deref().unwrap_or(DEFAULT_ENCRYPTION_ENC)))
    }

    /// Checks the invariants `build()` enforces; also used on deserialized metadata.
    pub fn validate(&self) -> Result<(), NilaOidcError> {
        if self.client_id.is_empty() {
            return Err(NilaOidcError::MissingConfiguration("client_id".to_string()));
        }
        for uri in &self.redirect_uris {
            Url::parse(uri).map_err(|e| NilaOidcError::InvalidUrl(format!("{uri}: {e}")))?;
        }
        let pairs = [
            ("id_token", &self.id_token_encrypted_response_alg, &self.id_token_encrypted_response_enc),
            ("userinfo", &self.userinfo_encrypted_response_alg, &self.userinfo_encrypted_response_enc),
            (
                "authorization",
                &self.authorization_encrypted_response_alg,
                &self.authorization_encrypted_response_enc,
            ),
        ];
        for (name, alg, enc) in pairs {
            if enc.is_some() && alg.is_none() {
                return Err(NilaOidcError::InvalidConfiguration(format!(
                    "{name}_encrypted_response_enc is set without {name}_encrypted_response_alg"
                )));
            }
        }
        Ok(())
    }
}

/// A builder for creating a `ClientMetadata` instance.
///
/// Mirrors the registration document; everything but `client_id` has an
/// OIDC default.
#[derive(Debug, Clone)]
pub struct ClientMetadataBuilder {
    metadata: ClientMetadata,
}

impl Default for ClientMetadataBuilder {
    fn default() -> Self {
        Self {
            metadata: ClientMetadata {
                client_id: String::new(),
                client_secret: None,
                redirect_uris: Vec::new(),
                response_types: default_response_types(),
                token_endpoint_auth_method: default_auth_method(),
                token_endpoint_auth_signing_alg: None,
                token_endpoint_auth_key_id: None,
                id_token_signed_response_alg: default_signing_alg(),
                id_token_encrypted_response_alg: None,
                id_token_encrypted_response_enc: None,
                userinfo_signed_response_alg: None,
                userinfo_encrypted_response_alg: None,
                userinfo_encrypted_response_enc: None,
                authorization_signed_response_alg: default_signing_alg(),
                authorization_encrypted_response_alg: None,
                authorization_encrypted_response_enc: None,
                request_object_signing_alg: None,
                require_auth_time: false,
                tls_client_certificate_bound_access_tokens: false,
            },
        }
    }
}

impl ClientMetadataBuilder {
    /// Creates a new `ClientMetadataBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client ID of the application. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.metadata.client_id = client_id.into();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.metadata.client_secret = Some(secret.into());
        self
    }

    /// Adds a redirect URI. The first one added is the default for flows.
    pub fn redirect_uri(mut self, uri: &str) -> Result<Self, NilaOidcError> {
        Url::parse(uri).map_err(|e| NilaOidcError::InvalidUrl(e.to_string()))?;
        self.metadata.redirect_uris.push(uri.to_string());
        Ok(self)
    }

    /// Sets the response types. The first one is the default for authorization requests.
    pub fn response_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.response_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the token endpoint auth method. Defaults to `client_secret_basic`.
    pub fn token_endpoint_auth_method(mut self, method: impl Into<String>) -> Self {
        self.metadata.token_endpoint_auth_method = method.into();
        self
    }

    pub fn token_endpoint_auth_signing_alg(mut self, alg: impl Into<String>) -> Self {
        self.metadata.token_endpoint_auth_signing_alg = Some(alg.into());
        self
    }

    pub fn token_endpoint_auth_key_id(mut self, kid: impl Into<String>) -> Self {
        self.metadata.token_endpoint_auth_key_id = Some(kid.into());
        self
    }

    /// Sets the declared JWS algorithm for `token_use`.
    pub fn signed_response_alg(mut self, token_use: TokenUse, alg: impl Into<String>) -> Self {
        let alg = alg.into();
        match token_use {
            TokenUse::IdToken => self.metadata.id_token_signed_response_alg = alg,
            TokenUse::Userinfo => self.metadata.userinfo_signed_response_alg = Some(alg),
            TokenUse::Authorization => self.metadata.authorization_signed_response_alg = alg,
        }
        self
    }

    /// Declares that the provider encrypts `token_use` artifacts to this client.
    pub fn encrypted_response(
        mut self,
        token_use: TokenUse,
        alg: impl Into<String>,
        enc: Option<&str>,
    ) -> Self {
        let alg = Some(alg.into());
        let enc = enc.map(str::to_string);
        match token_use {
            TokenUse::IdToken => {
                self.metadata.id_token_encrypted_response_alg = alg;
                self.metadata.id_token_encrypted_response_enc = enc;
            }
            TokenUse::Userinfo => {
                self.metadata.userinfo_encrypted_response_alg = alg;
                self.metadata.userinfo_encrypted_response_enc = enc;
            }
            TokenUse::Authorization => {
                self.metadata.authorization_encrypted_response_alg = alg;
                self.metadata.authorization_encrypted_response_enc = enc;
            }
        }
        self
    }

    pub fn request_object_signing_alg(mut self, alg: impl Into<String>) -> Self {
        self.metadata.request_object_signing_alg = Some(alg.into());
        self
    }

    pub fn require_auth_time(mut self, required: bool) -> Self {
        self.metadata.require_auth_time = required;
        self
    }

    pub fn tls_client_certificate_bound_access_tokens(mut self, bound: bool) -> Self {
        self.metadata.tls_client_certificate_bound_access_tokens = bound;
        self
    }

    /// Consumes the builder and returns a `ClientMetadata` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `client_id` is missing or an `enc` is declared without its `alg`.
    pub fn build(self) -> Result<ClientMetadata, NilaOidcError> {
        self.metadata.validate()?;
        Ok(self.metadata)
    }
}
