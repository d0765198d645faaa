// src/error.rs

use base64::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The broad category of a [`NilaOidcError`].
///
/// Callers use this to decide how to react: configuration errors are bugs in
/// the integration, protocol errors come from the provider, validation errors
/// mean a token must not be trusted, transport errors may be worth retrying
/// at a higher level, and decode errors mean the input was structurally broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Protocol,
    Validation,
    Transport,
    Decode,
}

/// An OAuth2 error response returned by the provider (RFC 6749 section 5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Error {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl fmt::Display for OAuth2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(description) = &self.error_description {
            write!(f, " ({description})")?;
        }
        if let Some(uri) = &self.error_uri {
            write!(f, " see {uri}")?;
        }
        Ok(())
    }
}

/// The primary error type for the `nila-oidc-rp` library.
#[derive(Debug, Error)]
pub enum NilaOidcError {
    // --- Configuration ---
    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No client authentication method is registered under this name.
    #[error("Unknown token endpoint auth method: {0}")]
    UnknownAuthMethod(String),

    /// An auth method or symmetric algorithm needs a client secret but none is configured.
    #[error("{0} requires a client secret, but none is configured")]
    MissingClientSecret(String),

    /// No redirect URI was supplied and none is configured on the client.
    #[error("No redirect_uri was provided and none is configured")]
    MissingRedirectUri,

    /// A caller-supplied argument is invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // --- Protocol ---
    /// The provider answered with an OAuth2 `error`.
    #[error("OAuth2 error: {0}")]
    Protocol(OAuth2Error),

    // --- Validation ---
    /// A required claim is missing from the token (or is null).
    #[error("A required claim is missing from the token: {0}")]
    MissingRequiredClaim(String),

    /// A claim checker rejected the claim value.
    #[error("Invalid claim '{claim}': {reason}")]
    InvalidClaim { claim: String, reason: String },

    /// The JWS signature could not be verified against any candidate key.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The token header `alg`/`enc` does not equal the one declared in metadata.
    #[error("Unexpected algorithm: expected {expected}, got {actual}")]
    AlgorithmMismatch { expected: String, actual: String },

    /// A key with the specified 'kid' was not found, even after refreshing the key set.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// No key in the relevant key set is usable for the algorithm.
    #[error("No key matching algorithm {0} is available")]
    NoMatchingKey(String),

    /// The callback `state` differs from the one stored in the session.
    #[error("State mismatch: the callback state does not match the session state")]
    StateMismatch,

    /// The userinfo `sub` differs from the expected subject.
    #[error("Subject mismatch: expected {expected}, got {actual}")]
    SubjectMismatch { expected: String, actual: String },

    /// The JOSE provider could not decrypt the token.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The JOSE provider does not support the requested operation or algorithm.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A cryptographic key (e.g., JWK) is malformed or invalid.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    // --- Transport ---
    /// An error occurred during an HTTP request.
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The provider answered with a non-success status and no OAuth2 error body.
    #[error("Unexpected HTTP response {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    // --- Decode ---
    /// The token is not a well-formed compact JWS/JWE.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// An error occurred while decoding a Base64URL encoded string.
    #[error("Base64URL decoding error: {0}")]
    Base64DecodeError(#[from] DecodeError),

    /// A JSON document (token segment or response body) could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A form-encoded body or query string could not be parsed.
    #[error("Form decoding error: {0}")]
    FormDecode(String),

    /// Errors originating from the `jsonwebtoken` crate.
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl NilaOidcError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        use NilaOidcError::*;
        match self {
            MissingConfiguration(_)
            | InvalidConfiguration(_)
            | InvalidUrl(_)
            | UnknownAuthMethod(_)
            | MissingClientSecret(_)
            | MissingRedirectUri
            | InvalidArgument(_) => ErrorKind::Configuration,
            Protocol(_) => ErrorKind::Protocol,
            MissingRequiredClaim(_)
            | InvalidClaim { .. }
            | InvalidSignature(_)
            | AlgorithmMismatch { .. }
            | KeyNotFound(_)
            | NoMatchingKey(_)
            | StateMismatch
            | SubjectMismatch { .. }
            | DecryptionFailed(_)
            | UnsupportedAlgorithm(_)
            | InvalidKeyFormat(_)
            | JwtError(_) => ErrorKind::Validation,
            HttpError(_) | UnexpectedResponse { .. } => ErrorKind::Transport,
            MalformedToken(_) | Base64DecodeError(_) | Json(_) | FormDecode(_) => ErrorKind::Decode,
        }
    }

    /// Returns the provider's OAuth2 error, if this is a protocol error.
    pub fn oauth2_error(&self) -> Option<&OAuth2Error> {
        match self {
            NilaOidcError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn invalid_claim(claim: &str, reason: impl Into<String>) -> Self {
        NilaOidcError::InvalidClaim {
            claim: claim.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = NilaOidcError> = std::result::Result<T, E>;
