// src/client.rs

use crate::auth_method::AuthMethodFactory;
use crate::config::ClientMetadata;
use crate::error::NilaOidcError;
use crate::issuer::Issuer;
use crate::jose::{JoseProvider, JsonWebTokenProvider};
use crate::model::{secret_key, JsonWebKey, JsonWebKeySet};
use std::sync::Arc;
use std::time::Duration;

/// A relying-party client registered with one [`Issuer`].
///
/// This struct should be created once and reused for all flows. Cloning is
/// cheap; the configuration is shared and read-only.
#[derive(Clone)]
pub struct Client {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    metadata: ClientMetadata,
    issuer: Arc<Issuer>,
    // The client's own keys: private signing keys and decryption keys.
    jwks: JsonWebKeySet,
    http_client: reqwest::Client,
    jose: Arc<dyn JoseProvider>,
    auth_methods: AuthMethodFactory,
    clock_tolerance: Duration,
    assertion_ttl: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.inner.metadata.client_id)
            .field("issuer", &self.inner.issuer.metadata().issuer)
            .field("client_secret_set", &self.inner.metadata.client_secret.is_some())
            .finish()
    }
}

impl Client {
    pub fn builder(issuer: Arc<Issuer>, metadata: ClientMetadata) -> ClientBuilder {
        ClientBuilder::new(issuer, metadata)
    }

    pub fn metadata(&self) -> &ClientMetadata {
        &self.inner.metadata
    }

    pub fn issuer(&self) -> &Arc<Issuer> {
        &self.inner.issuer
    }

    /// The client's own key set.
    pub fn jwks(&self) -> &JsonWebKeySet {
        &self.inner.jwks
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.inner.http_client
    }

    pub fn jose(&self) -> &dyn JoseProvider {
        self.inner.jose.as_ref()
    }

    pub fn auth_methods(&self) -> &AuthMethodFactory {
        &self.inner.auth_methods
    }

    /// Allowed clock skew, in seconds, for time-based claims.
    pub fn clock_tolerance(&self) -> i64 {
        i64::try_from(self.inner.clock_tolerance.as_secs()).unwrap_or(i64::MAX)
    }

    /// Lifetime of the client assertions this client signs.
    pub fn assertion_ttl(&self) -> Duration {
        self.inner.assertion_ttl
    }

    /// The symmetric key for `alg`, derived from the client secret.
    pub(crate) fn secret_key(&self, alg: &str) -> Result<JsonWebKey, NilaOidcError> {
        let secret = self
            .inner
            .metadata
            .client_secret
            .as_deref()
            .ok_or_else(|| NilaOidcError::MissingClientSecret(alg.to_string()))?;
        Ok(secret_key(secret, alg))
    }
}

/// Options for constructing a [`Client`].
///
/// Every collaborator has a default: a fresh `reqwest::Client`, the
/// `jsonwebtoken`-backed [`JsonWebTokenProvider`], all built-in auth methods,
/// zero clock tolerance and a 60 second assertion lifetime.
pub struct ClientBuilder {
    issuer: Arc<Issuer>,
    metadata: ClientMetadata,
    jwks: JsonWebKeySet,
    http_client: Option<reqwest::Client>,
    jose: Option<Arc<dyn JoseProvider>>,
    auth_methods: AuthMethodFactory,
    clock_tolerance: Duration,
    assertion_ttl: Duration,
}

impl ClientBuilder {
    pub fn new(issuer: Arc<Issuer>, metadata: ClientMetadata) -> Self {
        Self {
            issuer,
            metadata,
            jwks: JsonWebKeySet::default(),
            http_client: None,
            jose: None,
            auth_methods: AuthMethodFactory::default(),
            clock_tolerance: Duration::ZERO,
            assertion_ttl: Duration::from_secs(60),
        }
    }

    /// The client's own keys (private JWKs for `private_key_jwt`, request
    /// objects and decryption).
    pub fn jwks(mut self, jwks: JsonWebKeySet) -> Self {
        self.jwks = jwks;
        self
    }

    /// Uses `client` for token, userinfo and claim-source requests. Supply one
    /// with a TLS identity for `tls_client_auth`.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn jose_provider(mut self, provider: Arc<dyn JoseProvider>) -> Self {
        self.jose = Some(provider);
        self
    }

    pub fn auth_methods(mut self, factory: AuthMethodFactory) -> Self {
        self.auth_methods = factory;
        self
    }

    pub fn clock_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_tolerance = tolerance;
        self
    }

    pub fn assertion_ttl(mut self, ttl: Duration) -> Self {
        self.assertion_ttl = ttl;
        self
    }

    /// # Errors
    ///
    /// Fails if the metadata is invalid or names an auth method that is not registered.
    pub fn build(self) -> Result<Client, NilaOidcError> {
        self.metadata.validate()?;
        self.auth_methods.create(&self.metadata.token_endpoint_auth_method)?;

        Ok(Client {
            inner: Arc::new(Inner {
                metadata: self.metadata,
                issuer: self.issuer,
                jwks: self.jwks,
                http_client: self.http_client.unwrap_or_default(),
                jose: self.jose.unwrap_or_else(|| Arc::new(JsonWebTokenProvider)),
                auth_methods: self.auth_methods,
                clock_tolerance: self.clock_tolerance,
                assertion_ttl: self.assertion_ttl,
            }),
        })
    }
}
