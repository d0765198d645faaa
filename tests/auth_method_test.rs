mod common;

use common::*;
use nila_oidc_rp::generator::JWT_BEARER_ASSERTION_TYPE;
use nila_oidc_rp::jose::DecodedJwt;
use nila_oidc_rp::model::secret_key;
use nila_oidc_rp::prelude::*;
use std::sync::Arc;
use url::Url;

const NO_SERVER: &str = "http://127.0.0.1:9";

fn token_request() -> TokenEndpointRequest {
    TokenEndpointRequest::new(Url::parse("https://op.example.com/token").unwrap())
}

fn params() -> FormParams {
    vec![("foo".to_string(), "bar".to_string())]
}

fn client_with(metadata: ClientMetadataBuilder) -> Client {
    client(issuer(NO_SERVER, JsonWebKeySet::default()), metadata.build().unwrap())
}

fn method(name: &str) -> Arc<dyn AuthMethod> {
    AuthMethodFactory::default().create(name).unwrap()
}

#[test]
fn client_secret_basic_sets_authorization_header() {
    let client = client_with(ClientMetadataBuilder::new().client_id("foo").client_secret("bar"));

    let request = method("client_secret_basic")
        .create_request(token_request(), &client, params())
        .unwrap();

    assert_eq!(request.header("Authorization"), Some("Basic Zm9vOmJhcg=="));
    assert_eq!(request.body().unwrap(), "foo=bar");
}

#[test]
fn client_secret_basic_sends_raw_credentials() {
    let client = client_with(
        ClientMetadataBuilder::new()
            .client_id("app@example.com")
            .client_secret("p+ss/w="),
    );
    let request = method("client_secret_basic")
        .create_request(token_request(), &client, Vec::new())
        .unwrap();
    // base64("app@example.com:p+ss/w=")
    assert_eq!(
        request.header("authorization"),
        Some("Basic YXBwQGV4YW1wbGUuY29tOnArc3Mvdz0=")
    );
}

#[test]
fn secret_methods_fail_without_a_secret() {
    let client = client_with(ClientMetadataBuilder::new().client_id("foo"));

    for name in ["client_secret_basic", "client_secret_post", "client_secret_jwt"] {
        let err = method(name)
            .create_request(token_request(), &client, params())
            .unwrap_err();
        assert!(matches!(err, NilaOidcError::MissingClientSecret(ref m) if m == name));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}

#[test]
fn client_secret_post_adds_credentials_to_body() {
    let client = client_with(ClientMetadataBuilder::new().client_id("foo").client_secret("bar"));
    let request = method("client_secret_post")
        .create_request(token_request(), &client, params())
        .unwrap();

    assert_eq!(request.body().unwrap(), "foo=bar&client_id=foo&client_secret=bar");
    assert!(request.header("authorization").is_none());
}

#[test]
fn none_and_tls_methods_do_not_carry_secrets() {
    let client = client_with(ClientMetadataBuilder::new().client_id("foo").client_secret("bar"));

    let none = method("none");
    let request = none.create_request(token_request(), &client, params()).unwrap();
    assert_eq!(request.body().unwrap(), "foo=bar");
    assert!(!none.is_tls_bound());

    for name in ["tls_client_auth", "self_signed_tls_client_auth"] {
        let tls = method(name);
        let request = tls.create_request(token_request(), &client, params()).unwrap();
        assert_eq!(request.body().unwrap(), "foo=bar&client_id=foo");
        assert!(tls.is_tls_bound());
        assert_eq!(tls.supported_method(), name);
    }
}

#[test]
fn client_secret_jwt_assertion_shape() {
    let client = client_with(metadata());
    let request = method("client_secret_jwt")
        .create_request(token_request(), &client, params())
        .unwrap();

    assert_eq!(request.form_value("client_assertion_type"), Some(JWT_BEARER_ASSERTION_TYPE));
    let assertion = request.form_value("client_assertion").unwrap();

    let jwt = DecodedJwt::parse(assertion).unwrap();
    assert_eq!(jwt.header.alg, "HS256");
    assert_eq!(jwt.claims["iss"], CLIENT_ID);
    assert_eq!(jwt.claims["sub"], CLIENT_ID);
    assert_eq!(jwt.claims["aud"], ISSUER);
    let iat = jwt.claims["iat"].as_i64().unwrap();
    assert_eq!(jwt.claims["exp"].as_i64().unwrap() - iat, 60);
    assert!(jwt.claims["jti"].as_str().is_some_and(|jti| !jti.is_empty()));

    let keys = JsonWebKeySet::new(vec![secret_key(CLIENT_SECRET, "HS256")]);
    assert!(JsonWebTokenProvider.verify(assertion, &keys).unwrap());
}

#[test]
fn private_key_jwt_signs_with_client_key() {
    let client = Client::builder(
        issuer(NO_SERVER, JsonWebKeySet::default()),
        metadata()
            .token_endpoint_auth_method("private_key_jwt")
            .token_endpoint_auth_key_id("k1")
            .build()
            .unwrap(),
    )
    .jwks(JsonWebKeySet::new(vec![private_jwk("k1")]))
    .build()
    .unwrap();

    let request = method("private_key_jwt")
        .create_request(token_request(), &client, params())
        .unwrap();
    let assertion = request.form_value("client_assertion").unwrap();

    let jwt = DecodedJwt::parse(assertion).unwrap();
    assert_eq!(jwt.header.alg, "RS256");
    assert_eq!(jwt.header.kid.as_deref(), Some("k1"));
    assert_eq!(jwt.claims["sub"], CLIENT_ID);

    let public = JsonWebKeySet::new(vec![public_jwk("k1")]);
    assert!(JsonWebTokenProvider.verify(assertion, &public).unwrap());
}

#[test]
fn private_key_jwt_needs_a_private_key() {
    // Only a public key: nothing to sign with.
    let client = Client::builder(
        issuer(NO_SERVER, JsonWebKeySet::default()),
        metadata().token_endpoint_auth_method("private_key_jwt").build().unwrap(),
    )
    .jwks(JsonWebKeySet::new(vec![public_jwk("k1")]))
    .build()
    .unwrap();

    let err = method("private_key_jwt")
        .create_request(token_request(), &client, params())
        .unwrap_err();
    assert!(matches!(err, NilaOidcError::NoMatchingKey(_)));
}

struct ApiKeyAuth;

impl AuthMethod for ApiKeyAuth {
    fn supported_method(&self) -> &'static str {
        "api_key"
    }

    fn create_request(
        &self,
        mut request: TokenEndpointRequest,
        _client: &Client,
        params: FormParams,
    ) -> nila_oidc_rp::error::Result<TokenEndpointRequest> {
        request.headers.push(("x-api-key".to_string(), "k".to_string()));
        request.form.extend(params);
        Ok(request)
    }
}

#[test]
fn factory_rejects_unknown_methods_and_accepts_registered_ones() {
    let err = AuthMethodFactory::default().create("api_key").err().unwrap();
    assert!(matches!(err, NilaOidcError::UnknownAuthMethod(ref m) if m == "api_key"));

    let metadata = metadata().token_endpoint_auth_method("api_key").build().unwrap();
    let err = Client::builder(issuer(NO_SERVER, JsonWebKeySet::default()), metadata.clone())
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let mut factory = AuthMethodFactory::default();
    factory.register(Arc::new(ApiKeyAuth));
    let client = Client::builder(issuer(NO_SERVER, JsonWebKeySet::default()), metadata)
        .auth_methods(factory)
        .build()
        .expect("registered method should be accepted");
    let request = client
        .auth_methods()
        .create("api_key")
        .unwrap()
        .create_request(token_request(), &client, params())
        .unwrap();
    assert_eq!(request.header("X-Api-Key"), Some("k"));
}
