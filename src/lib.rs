// src/lib.rs

pub mod aggregated;
pub mod auth_method;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod generator;
pub mod issuer;
pub mod jose;
pub mod model;
pub mod response_mode;
pub mod token_set;
pub mod validator;

/// The public prelude for the `nila-oidc-rp` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::aggregated::ClaimSourceVerifier;
    pub use crate::auth_method::{AuthMethod, AuthMethodFactory, FormParams, TokenEndpointRequest};
    pub use crate::client::{Client, ClientBuilder};
    pub use crate::config::{ClientMetadata, ClientMetadataBuilder, TokenUse};
    pub use crate::error::{ErrorKind, NilaOidcError, OAuth2Error};
    pub use crate::flow::{AuthSession, CallbackChecks};
    pub use crate::issuer::{Issuer, IssuerMetadata};
    pub use crate::jose::{ClaimMap, JoseProvider, JsonWebTokenProvider};
    pub use crate::model::{JsonWebKey, JsonWebKeySet};
    pub use crate::response_mode::{CallbackRequest, ResponseMode};
    pub use crate::token_set::TokenSet;
    pub use crate::validator::ClaimRules;
}
