// src/aggregated.rs

use crate::client::Client;
use crate::error::{NilaOidcError, Result};
use crate::jose::{ClaimMap, DecodedJwt};
use crate::validator::{ClaimRules, TokenVerifier};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const CLAIM_NAMES: &str = "_claim_names";
const CLAIM_SOURCES: &str = "_claim_sources";

/// Verifies the JWT of an aggregated or distributed claim source.
#[async_trait]
pub trait ClaimSourceVerifier: Send + Sync {
    async fn verify_claim_source(&self, jwt: &str) -> Result<ClaimMap>;
}

/// Accepts sources signed by this client's own issuer.
#[async_trait]
impl ClaimSourceVerifier for Client {
    async fn verify_claim_source(&self, jwt: &str) -> Result<ClaimMap> {
        let decoded = DecodedJwt::parse(jwt)?;
        if decoded.is_unsigned() || decoded.header.alg == "none" {
            return Err(NilaOidcError::InvalidSignature(
                "claim sources must be signed".to_string(),
            ));
        }
        let issuer = &self.issuer().metadata().issuer;
        if decoded.claims.get("iss").and_then(Value::as_str) != Some(issuer.as_str()) {
            return Err(NilaOidcError::invalid_claim(
                "iss",
                format!("claim source is not issued by {issuer}"),
            ));
        }
        TokenVerifier::new(self)
            .verify_with_alg(jwt, &decoded.header.alg, &ClaimRules::userinfo())
            .await
    }
}

/// Merges every aggregated source (`{"JWT": ...}`) into `claims`.
///
/// Sources that fail verification are skipped and stay listed in
/// `_claim_sources`; the other sources are still merged.
pub async fn unpack_aggregated_claims(
    mut claims: ClaimMap,
    verifier: &dyn ClaimSourceVerifier,
) -> ClaimMap {
    for (name, source) in claim_sources(&claims) {
        let Some(jwt) = source.get("JWT").and_then(Value::as_str) else {
            continue;
        };
        match verifier.verify_claim_source(jwt).await {
            Ok(source_claims) => merge_source(&mut claims, &name, &source_claims),
            Err(e) => warn!(source = %name, "Dropping aggregated claim source: {}", e),
        }
    }
    remove_empty(&mut claims);
    claims
}

/// Fetches every distributed source (`{"endpoint": ...}`) and merges it into
/// `claims`.
///
/// The bearer token is the source's own `access_token`, else the one in
/// `access_tokens` under the source name. Sources whose fetch or verification
/// fails are skipped like in [`unpack_aggregated_claims`].
pub async fn fetch_distributed_claims(
    mut claims: ClaimMap,
    verifier: &dyn ClaimSourceVerifier,
    http_client: &reqwest::Client,
    access_tokens: &HashMap<String, String>,
) -> ClaimMap {
    for (name, source) in claim_sources(&claims) {
        let Some(endpoint) = source.get("endpoint").and_then(Value::as_str) else {
            continue;
        };
        let access_token = source
            .get("access_token")
            .and_then(Value::as_str)
            .or_else(|| access_tokens.get(&name).map(String::as_str));

        let fetched = async {
            let jwt = fetch_source(http_client, endpoint, access_token).await?;
            verifier.verify_claim_source(&jwt).await
        };
        match fetched.await {
            Ok(source_claims) => merge_source(&mut claims, &name, &source_claims),
            Err(e) => warn!(source = %name, endpoint, "Dropping distributed claim source: {}", e),
        }
    }
    remove_empty(&mut claims);
    claims
}

impl Client {
    /// Resolves aggregated and then distributed claims in `claims` (typically
    /// a userinfo response), using this client's issuer to verify sources.
    pub async fn resolve_claim_sources(
        &self,
        claims: ClaimMap,
        access_tokens: &HashMap<String, String>,
    ) -> ClaimMap {
        let claims = unpack_aggregated_claims(claims, self).await;
        fetch_distributed_claims(claims, self, self.http_client(), access_tokens).await
    }
}

async fn fetch_source(
    http_client: &reqwest::Client,
    endpoint: &str,
    access_token: Option<&str>,
) -> Result<String> {
    debug!("Fetching distributed claims from {}", endpoint);
    let mut request = http_client.get(endpoint).header(ACCEPT, "application/jwt");
    if let Some(token) = access_token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(NilaOidcError::UnexpectedResponse { status: status.as_u16(), body });
    }
    Ok(body.trim().to_string())
}

fn claim_sources(claims: &ClaimMap) -> Vec<(String, ClaimMap)> {
    claims
        .get(CLAIM_SOURCES)
        .and_then(Value::as_object)
        .map(|sources| {
            sources
                .iter()
                .filter_map(|(name, source)| Some((name.clone(), source.as_object()?.clone())))
                .collect()
        })
        .unwrap_or_default()
}

/// Copies the claims attributed to `source_name` and removes the source and
/// its names from the bookkeeping members.
fn merge_source(claims: &mut ClaimMap, source_name: &str, source_claims: &ClaimMap) {
    let resolved: Vec<String> = claims
        .get(CLAIM_NAMES)
        .and_then(Value::as_object)
        .map(|names| {
            names
                .iter()
                .filter(|(_, source)| source.as_str() == Some(source_name))
                .map(|(name, _)| name.clone())
                .collect()
        })
        .unwrap_or_default();

    for name in &resolved {
        if let Some(value) = source_claims.get(name) {
            claims.insert(name.clone(), value.clone());
        }
    }
    if let Some(Value::Object(names)) = claims.get_mut(CLAIM_NAMES) {
        for name in &resolved {
            names.remove(name);
        }
    }
    if let Some(Value::Object(sources)) = claims.get_mut(CLAIM_SOURCES) {
        sources.remove(source_name);
    }
}

fn remove_empty(claims: &mut ClaimMap) {
    for member in [CLAIM_NAMES, CLAIM_SOURCES] {
        let empty = claims
            .get(member)
            .and_then(Value::as_object)
            .is_some_and(|map| map.is_empty());
        if empty {
            claims.remove(member);
        }
    }
}
