//! Walks through the authorization code flow.
//!
//! Without arguments it prints an authorization URL and the session to keep.
//! Run it again with the URL the provider redirected to and the session JSON
//! to finish the flow:
//!
//! ```text
//! cargo run --example authorization_code
//! cargo run --example authorization_code -- '<callback url>' '<session json>'
//! ```

use nila_oidc_rp::prelude::*;
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Deserialize)]
struct DemoConfig {
    issuer: IssuerMetadata,
    client: ClientMetadata,
    #[serde(default)]
    clock_tolerance_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    // --- Load Configuration from YAML ---
    let config_path = "demos/rp_config.yaml";
    let config_str = fs::read_to_string(config_path)
        .map_err(|e| format!("Failed to read config file {config_path}: {e}"))?;
    let config: DemoConfig = serde_yaml::from_str(&config_str)
        .map_err(|e| format!("Failed to parse YAML config from {config_path}: {e}"))?;

    // --- Configure the relying party ---
    let issuer = Arc::new(Issuer::new(config.issuer));
    let client = Client::builder(issuer, config.client)
        .clock_tolerance(Duration::from_secs(config.clock_tolerance_seconds))
        .build()?;

    let mut args = std::env::args().skip(1);
    let (Some(callback_url), Some(session_json)) = (args.next(), args.next()) else {
        let session = AuthSession::generate();
        let url = client.authorization_url(session.authorization_params())?;
        println!("Open this URL in a browser:\n  {url}");
        println!("Keep this session:\n  {}", serde_json::to_string(&session)?);
        return Ok(());
    };

    // --- Finish the flow ---
    let session: AuthSession = serde_json::from_str(&session_json)?;
    let request = CallbackRequest::get(Url::parse(&callback_url)?);
    let params = client.callback_params(&request).await?;

    match client.callback(params, &CallbackChecks::with_session(&session)).await {
        Ok(tokens) => {
            println!("Signed in as {}", tokens.subject().unwrap_or("<unknown>"));
            if let Some(access_token) = tokens.access_token() {
                let userinfo = client.userinfo(access_token, tokens.subject()).await?;
                println!("Userinfo: {}", serde_json::to_string_pretty(&userinfo)?);
            }
        }
        Err(e) => match e.oauth2_error() {
            Some(error) => eprintln!("The provider refused the request: {error}"),
            None => eprintln!("Callback failed ({:?}): {e}", e.kind()),
        },
    }
    Ok(())
}
