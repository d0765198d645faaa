// src/model.rs

use crate::jose::base64url_encode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
///
/// Only the members used for key selection are typed; everything else
/// (`n`, `e`, `d`, `x`, `y`, `crv`, `k`, ...) is kept in `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl JsonWebKey {
    /// A symmetric (`oct`) key holding the given raw bytes.
    pub fn symmetric(bytes: &[u8]) -> Self {
        let mut params = Map::new();
        params.insert("k".to_string(), Value::String(base64url_encode(bytes)));
        Self {
            kty: "oct".to_string(),
            use_purpose: None,
            alg: None,
            kid: None,
            params,
        }
    }

    /// Returns a string member from `params`, e.g. `n` or `crv`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// Computes the RFC 7638 SHA-256 thumbprint of the key.
    pub fn thumbprint(&self) -> Option<String> {
        // Required members in lexicographic order, per key type.
        let canonical = match self.kty.as_str() {
            "RSA" => json!({ "e": self.param("e")?, "kty": "RSA", "n": self.param("n")? }),
            "EC" => json!({
                "crv": self.param("crv")?,
                "kty": "EC",
                "x": self.param("x")?,
                "y": self.param("y")?,
            }),
            "OKP" => json!({ "crv": self.param("crv")?, "kty": "OKP", "x": self.param("x")? }),
            "oct" => json!({ "k": self.param("k")?, "kty": "oct" }),
            _ => return None,
        };
        let hash = Sha256::digest(canonical.to_string().as_bytes());
        Some(base64url_encode(&hash))
    }

    /// True when this key satisfies every predicate of `query`.
    pub fn matches(&self, query: &KeyQuery<'_>) -> bool {
        if let (Some(wanted), Some(actual)) = (query.use_purpose, self.use_purpose.as_deref()) {
            if wanted != actual {
                return false;
            }
        }
        if let Some(kid) = query.kid {
            if self.kid.as_deref() != Some(kid) {
                return false;
            }
        }
        if let Some(alg) = query.alg {
            if let Some(key_alg) = self.alg.as_deref() {
                if key_alg != alg {
                    return false;
                }
            }
            if let Some(kty) = key_type_for(alg) {
                if self.kty != kty {
                    return false;
                }
            }
        }
        true
    }
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
///
/// Sets are never edited in place; a refreshed set replaces the old one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    pub fn new(keys: Vec<JsonWebKey>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns a new set holding the keys that satisfy `query`.
    pub fn select(&self, query: &KeyQuery<'_>) -> JsonWebKeySet {
        JsonWebKeySet {
            keys: self.keys.iter().filter(|k| k.matches(query)).cloned().collect(),
        }
    }
}

/// Selection predicates for [`JsonWebKeySet::select`].
///
/// A key matches when its `use` is absent or equal, its `alg` is absent or
/// equal, its `kty` fits the algorithm family, and its `kid` equals the
/// requested one (when a kid is requested).
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyQuery<'a> {
    pub use_purpose: Option<&'a str>,
    pub alg: Option<&'a str>,
    pub kid: Option<&'a str>,
}

impl<'a> KeyQuery<'a> {
    pub fn signing(alg: &'a str, kid: Option<&'a str>) -> Self {
        Self { use_purpose: Some("sig"), alg: Some(alg), kid }
    }

    pub fn encryption(alg: &'a str, kid: Option<&'a str>) -> Self {
        Self { use_purpose: Some("enc"), alg: Some(alg), kid }
    }
}

fn key_type_for(alg: &str) -> Option<&'static str> {
    if alg.starts_with("RS") || alg.starts_with("PS") || alg.starts_with("RSA") {
        Some("RSA")
    } else if alg.starts_with("ES") || alg.starts_with("ECDH") {
        Some("EC")
    } else if alg == "EdDSA" {
        Some("OKP")
    } else if is_symmetric(alg) {
        Some("oct")
    } else {
        None
    }
}

static KEY_WRAP_ALG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^A(128|192|256)(?:GCM)?KW$").expect("static regex"));
static CONTENT_ALG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^A(128|192|256)(?:GCM|CBC-HS(256|384|512))$").expect("static regex"));

/// True when `alg` is keyed from the client secret rather than a JWKS.
pub fn is_symmetric(alg: &str) -> bool {
    alg.starts_with("HS")
        || alg.starts_with("PBES2")
        || alg == "dir"
        || KEY_WRAP_ALG.is_match(alg)
        || CONTENT_ALG.is_match(alg)
}

/// Derives the symmetric key for `alg` from the client secret.
///
/// HMAC and PBES2 use the secret verbatim. AES key wrap and content
/// algorithms need an exact key length, so the key is the shortest SHA-2
/// digest of the secret that covers that length, truncated to it.
pub fn secret_key(secret: &str, alg: &str) -> JsonWebKey {
    let mut key = match derived_key_length(alg) {
        Some(len) => JsonWebKey::symmetric(&secret_digest(secret.as_bytes(), len)[..len]),
        None => JsonWebKey::symmetric(secret.as_bytes()),
    };
    key.alg = Some(alg.to_string());
    key
}

fn secret_digest(secret: &[u8], len: usize) -> Vec<u8> {
    match len {
        0..=32 => Sha256::digest(secret).to_vec(),
        33..=48 => Sha384::digest(secret).to_vec(),
        _ => Sha512::digest(secret).to_vec(),
    }
}

fn derived_key_length(alg: &str) -> Option<usize> {
    if let Some(caps) = KEY_WRAP_ALG.captures(alg) {
        return caps[1].parse::<usize>().ok().map(|bits| bits / 8);
    }
    let caps = CONTENT_ALG.captures(alg)?;
    let bits = caps.get(2).or_else(|| caps.get(1))?.as_str();
    bits.parse::<usize>().ok().map(|bits| bits / 8)
}
