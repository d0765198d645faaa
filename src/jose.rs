// src/jose.rs

use crate::error::{NilaOidcError, Result};
use crate::model::{JsonWebKey, JsonWebKeySet};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use jsonwebtoken::{crypto, Algorithm, DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

/// A decoded JWT payload: an ordered map of claim names to JSON values.
pub type ClaimMap = Map<String, Value>;

// Unpadded on encode, tolerant of padding on decode.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn base64url_encode(input: impl AsRef<[u8]>) -> String {
    BASE64URL.encode(input)
}

pub fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    Ok(BASE64URL.decode(input)?)
}

/// The JOSE header of a JWS or JWE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoseHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JoseHeader {
    pub fn new(alg: impl Into<String>) -> Self {
        Self {
            alg: alg.into(),
            ..Default::default()
        }
    }
}

/// Decodes the protected header of a compact JWS or JWE.
pub fn decode_header(token: &str) -> Result<JoseHeader> {
    let segment = token
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NilaOidcError::MalformedToken("missing header segment".to_string()))?;
    Ok(serde_json::from_slice(&base64url_decode(segment)?)?)
}

/// True when the compact serialization has the five segments of a JWE.
pub fn is_encrypted(token: &str) -> bool {
    token.split('.').count() == 5
}

/// A compact JWS split into its parts, with header and payload decoded.
///
/// Nothing here is verified; see `crate::validator` for that.
#[derive(Debug, Clone)]
pub struct DecodedJwt {
    pub header: JoseHeader,
    pub claims: ClaimMap,
    pub signature: String,
}

impl DecodedJwt {
    pub fn parse(token: &str) -> Result<Self> {
        let parts: Vec<&str> = token.split('.').collect();
        match parts.len() {
            3 => {}
            5 => {
                return Err(NilaOidcError::MalformedToken(
                    "token is an encrypted JWE, decrypt it first".to_string(),
                ))
            }
            n => {
                return Err(NilaOidcError::MalformedToken(format!(
                    "expected 3 segments, found {n}"
                )))
            }
        }

        let header: JoseHeader = serde_json::from_slice(&base64url_decode(parts[0])?)?;
        let claims = match serde_json::from_slice::<Value>(&base64url_decode(parts[1])?)? {
            Value::Object(map) => map,
            _ => {
                return Err(NilaOidcError::MalformedToken(
                    "payload is not a JSON object".to_string(),
                ))
            }
        };

        Ok(Self {
            header,
            claims,
            signature: parts[2].to_string(),
        })
    }

    pub fn is_unsigned(&self) -> bool {
        self.signature.is_empty()
    }
}

/// Serializes an unsecured (`alg: none`) JWT.
pub fn unsigned_jwt(header: &JoseHeader, claims: &ClaimMap) -> Result<String> {
    Ok(format!(
        "{}.{}.",
        base64url_encode(serde_json::to_vec(header)?),
        base64url_encode(serde_json::to_vec(claims)?)
    ))
}

/// The cryptographic capability the engine calls into.
///
/// The engine decides *which* keys are acceptable; the provider only does the
/// math. Implementations must never report `true` from `verify` unless one of
/// the supplied keys produced a valid signature.
pub trait JoseProvider: Send + Sync {
    /// Verifies a compact JWS against any of `keys`.
    fn verify(&self, token: &str, keys: &JsonWebKeySet) -> Result<bool>;

    /// Decrypts a compact JWE with one of `keys`, returning the plaintext.
    fn decrypt(&self, token: &str, keys: &JsonWebKeySet) -> Result<String>;

    /// Produces a compact JWS of `claims` signed with `key`.
    fn sign(&self, header: &JoseHeader, claims: &ClaimMap, key: &JsonWebKey) -> Result<String>;
}

/// The default [`JoseProvider`], backed by `jsonwebtoken`.
///
/// Verifies with `oct`, `RSA`, `EC` and `OKP` keys and signs with `oct` and
/// RSA private keys. It does not implement JWE: clients that declare
/// encryption algorithms must be built with a JWE-capable provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWebTokenProvider;

impl JoseProvider for JsonWebTokenProvider {
    fn verify(&self, token: &str, keys: &JsonWebKeySet) -> Result<bool> {
        let (signing_input, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| NilaOidcError::MalformedToken("missing signature segment".to_string()))?;
        let header = decode_header(token)?;
        let alg = algorithm(&header.alg)?;

        for key in &keys.keys {
            let decoding_key = match decoding_key(key) {
                Ok(k) => k,
                Err(e) => {
                    debug!(kid = ?key.kid, "Skipping unusable verification key: {}", e);
                    continue;
                }
            };
            match crypto::verify(signature, signing_input.as_bytes(), &decoding_key, alg) {
                Ok(true) => return Ok(true),
                Ok(false) => debug!(kid = ?key.kid, "Signature did not verify with key"),
                Err(e) => debug!(kid = ?key.kid, "Signature verification error: {}", e),
            }
        }
        Ok(false)
    }

    fn decrypt(&self, token: &str, _keys: &JsonWebKeySet) -> Result<String> {
        let header = decode_header(token)?;
        Err(NilaOidcError::UnsupportedAlgorithm(format!(
            "JWE {}/{} needs a JWE-capable JoseProvider",
            header.alg,
            header.enc.unwrap_or_default()
        )))
    }

    fn sign(&self, header: &JoseHeader, claims: &ClaimMap, key: &JsonWebKey) -> Result<String> {
        let alg = algorithm(&header.alg)?;
        let encoding_key = encoding_key(key)?;
        let signing_input = format!(
            "{}.{}",
            base64url_encode(serde_json::to_vec(header)?),
            base64url_encode(serde_json::to_vec(claims)?)
        );
        let signature = crypto::sign(signing_input.as_bytes(), &encoding_key, alg)?;
        Ok(format!("{signing_input}.{signature}"))
    }
}

fn algorithm(name: &str) -> Result<Algorithm> {
    Algorithm::from_str(name).map_err(|_| NilaOidcError::UnsupportedAlgorithm(name.to_string()))
}

fn required<'a>(key: &'a JsonWebKey, name: &str) -> Result<&'a str> {
    key.param(name).ok_or_else(|| {
        NilaOidcError::InvalidKeyFormat(format!("{} key missing '{}' component", key.kty, name))
    })
}

fn decoding_key(key: &JsonWebKey) -> Result<DecodingKey> {
    match key.kty.as_str() {
        "oct" => Ok(DecodingKey::from_secret(&base64url_decode(required(key, "k")?)?)),
        "RSA" => Ok(DecodingKey::from_rsa_components(required(key, "n")?, required(key, "e")?)?),
        "EC" => Ok(DecodingKey::from_ec_components(required(key, "x")?, required(key, "y")?)?),
        "OKP" => Ok(DecodingKey::from_ed_components(required(key, "x")?)?),
        other => Err(NilaOidcError::InvalidKeyFormat(format!("unsupported kty {other}"))),
    }
}

fn encoding_key(key: &JsonWebKey) -> Result<EncodingKey> {
    match key.kty.as_str() {
        "oct" => Ok(EncodingKey::from_secret(&base64url_decode(required(key, "k")?)?)),
        "RSA" => {
            let component = |name: &str| -> Result<BigUint> {
                Ok(BigUint::from_bytes_be(&base64url_decode(required(key, name)?)?))
            };
            let private_key = RsaPrivateKey::from_components(
                component("n")?,
                component("e")?,
                component("d")?,
                vec![component("p")?, component("q")?],
            )
            .map_err(|e| NilaOidcError::InvalidKeyFormat(format!("invalid RSA private key: {e}")))?;

            // jsonwebtoken has no JWK import for private keys; go through PKCS#1 DER.
            let der = private_key.to_pkcs1_der().map_err(|e| {
                NilaOidcError::InvalidKeyFormat(format!("Failed to convert RSA key to PKCS#1 DER: {e}"))
            })?;
            Ok(EncodingKey::from_rsa_der(der.as_bytes()))
        }
        other => Err(NilaOidcError::UnsupportedAlgorithm(format!(
            "signing with {other} keys is not supported by JsonWebTokenProvider"
        ))),
    }
}
