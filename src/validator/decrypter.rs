// src/validator/decrypter.rs

use crate::client::Client;
use crate::config::TokenUse;
use crate::error::{NilaOidcError, Result};
use crate::jose::decode_header;
use crate::model::{is_symmetric, JsonWebKeySet, KeyQuery};
use tracing::debug;

/// The optional decrypt stage in front of [`super::TokenVerifier`].
///
/// The provider encrypts *to* the client, so asymmetric keys come from the
/// client's own key set and symmetric keys from its secret.
pub struct TokenDecrypter<'c> {
    client: &'c Client,
}

impl<'c> TokenDecrypter<'c> {
    pub fn new(client: &'c Client) -> Self {
        Self { client }
    }

    /// Returns the plaintext of `token`, or `token` itself when no encryption
    /// is declared for `token_use`.
    pub fn decrypt(&self, token: &str, token_use: TokenUse) -> Result<String> {
        let Some((alg, enc)) = self.client.metadata().encrypted_response(token_use) else {
            return Ok(token.to_string());
        };

        let header = decode_header(token)?;
        if header.alg != alg {
            return Err(NilaOidcError::AlgorithmMismatch {
                expected: alg.to_string(),
                actual: header.alg,
            });
        }
        if header.enc.as_deref() != Some(enc) {
            return Err(NilaOidcError::AlgorithmMismatch {
                expected: enc.to_string(),
                actual: header.enc.unwrap_or_else(|| "<none>".to_string()),
            });
        }

        let keys = if is_symmetric(alg) {
            // Direct encryption keys the content algorithm itself.
            let key_alg = if alg == "dir" { enc } else { alg };
            JsonWebKeySet::new(vec![self.client.secret_key(key_alg)?])
        } else {
            let keys = self
                .client
                .jwks()
                .select(&KeyQuery::encryption(alg, header.kid.as_deref()));
            if keys.is_empty() {
                return Err(match header.kid {
                    Some(kid) => NilaOidcError::KeyNotFound(kid),
                    None => NilaOidcError::NoMatchingKey(alg.to_string()),
                });
            }
            keys
        };

        debug!(token_use = token_use.as_str(), alg, enc, "Decrypting token");
        self.client.jose().decrypt(token, &keys).map_err(|e| match e {
            NilaOidcError::UnsupportedAlgorithm(_) => e,
            other => NilaOidcError::DecryptionFailed(other.to_string()),
        })
    }
}
