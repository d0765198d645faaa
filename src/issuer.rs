// src/issuer.rs

use crate::error::{NilaOidcError, Result};
use crate::model::JsonWebKeySet;
use arc_swap::ArcSwap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

/// Alternative endpoints for clients authenticating with mutual TLS (RFC 8705).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MtlsEndpointAliases {
    #[serde(default)]
    pub token_endpoint: Option<Url>,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,
    #[serde(default)]
    pub introspection_endpoint: Option<Url>,
}

/// Represents the data structure of an OIDC provider's discovery document.
/// Found at the `.well-known/openid-configuration` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuerMetadata {
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: Option<Url>,
    #[serde(default)]
    pub token_endpoint: Option<Url>,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub jwks_uri: Option<Url>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
    #[serde(default)]
    pub token_endpoint_auth_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(default)]
    pub request_object_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(default)]
    pub mtls_endpoint_aliases: Option<MtlsEndpointAliases>,
    /// Any other members of the discovery document.
    #[serde(flatten)]
    pub other_fields: HashMap<String, Value>,
}

impl IssuerMetadata {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            ..Default::default()
        }
    }

    /// The token endpoint, preferring the mTLS alias when the request is TLS-bound.
    pub fn token_endpoint_for(&self, tls_bound: bool) -> Option<&Url> {
        self.aliased(tls_bound, |aliases| aliases.token_endpoint.as_ref())
            .or(self.token_endpoint.as_ref())
    }

    /// The userinfo endpoint, preferring the mTLS alias when the request is TLS-bound.
    pub fn userinfo_endpoint_for(&self, tls_bound: bool) -> Option<&Url> {
        self.aliased(tls_bound, |aliases| aliases.userinfo_endpoint.as_ref())
            .or(self.userinfo_endpoint.as_ref())
    }

    fn aliased<'a>(
        &'a self,
        tls_bound: bool,
        pick: impl Fn(&'a MtlsEndpointAliases) -> Option<&'a Url>,
    ) -> Option<&'a Url> {
        if !tls_bound {
            return None;
        }
        self.mtls_endpoint_aliases.as_ref().and_then(pick)
    }
}

/// An OpenID provider: its metadata plus its current signing keys.
///
/// The key set is the only mutable part. [`Issuer::update_jwks`] swaps in a
/// freshly fetched set in one step, so readers see either the old set or the
/// new one, never a mix.
pub struct Issuer {
    metadata: IssuerMetadata,
    jwks: ArcSwap<JsonWebKeySet>,
    http_client: reqwest::Client,
    // Serialises refreshes; readers never take it.
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for Issuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Issuer")
            .field("issuer", &self.metadata.issuer)
            .field("keys", &self.jwks.load().keys.len())
            .finish()
    }
}

impl Issuer {
    /// Creates an issuer with an empty key set; it is fetched on first use.
    pub fn new(metadata: IssuerMetadata) -> Self {
        Self::with_jwks(metadata, JsonWebKeySet::default())
    }

    /// Creates an issuer with a pre-loaded key set.
    pub fn with_jwks(metadata: IssuerMetadata, jwks: JsonWebKeySet) -> Self {
        Self {
            metadata,
            jwks: ArcSwap::from_pointee(jwks),
            http_client: reqwest::Client::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Uses `client` for JWKS fetches.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn metadata(&self) -> &IssuerMetadata {
        &self.metadata
    }

    /// A snapshot of the current key set.
    pub fn jwks(&self) -> Arc<JsonWebKeySet> {
        self.jwks.load_full()
    }

    /// Fetches `jwks_uri` and replaces the key set wholesale. Last fetch wins.
    #[instrument(skip(self), fields(issuer = %self.metadata.issuer), err)]
    pub async fn update_jwks(&self) -> Result<Arc<JsonWebKeySet>> {
        let jwks_uri = self
            .metadata
            .jwks_uri
            .clone()
            .ok_or_else(|| NilaOidcError::MissingConfiguration("jwks_uri".to_string()))?;

        let _guard = self.refresh_lock.lock().await;
        debug!("Fetching JWKS from {}", jwks_uri);

        let response = self.http_client.get(jwks_uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NilaOidcError::UnexpectedResponse {
                status: status.as_u16(),
                body,
            });
        }
        let jwks: JsonWebKeySet = response.json().await?;

        debug!("Successfully fetched {} keys", jwks.keys.len());
        let jwks = Arc::new(jwks);
        self.jwks.store(jwks.clone());
        Ok(jwks)
    }
}
