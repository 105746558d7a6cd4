//! The authentication gate: construction, token acquisition, and middleware.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::error::AuthError;
use super::validator::{JwksValidator, RequestValidator};
use crate::client::{HttpCall, HttpClient};
use crate::config::Config;

/// All origins.
const ALL: &str = "*";

/// Methods advertised on every response that passes through the gate.
const BASIC_METHODS: &str = "DELETE, GET, POST, PUT";

/// Headers advertised on every response that passes through the gate.
const ALLOWED_HEADERS: &str = "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, \
     Authorization, accept, origin, Cache-Control, X-Requested-With";

/// Path of the client-credentials exchange endpoint on the provider.
const TOKEN_PATH: &str = "oauth/token";

/// Well-known JWKS path on the provider.
const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Identity-provider gate, shared read-only across all requests.
///
/// Holds no per-request mutable state, so a single `Arc<Authenticator>` can
/// serve every concurrent request without locking.
pub struct Authenticator {
    /// Issuer domain of the identity provider.
    domain: String,
    /// Audience identifier, derived from the application name.
    identifier: String,
    /// Client ID used for the client-credentials exchange.
    client_id: String,
    /// Client secret used for the client-credentials exchange.
    client_secret: String,
    /// Outbound HTTP capability for the token exchange.
    http: Arc<dyn HttpCall>,
    /// Injected validator capability. When absent, a fresh [`JwksValidator`]
    /// is built for each request.
    validator: Option<Arc<dyn RequestValidator>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("domain", &self.domain)
            .field("identifier", &self.identifier)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Success body of the client-credentials exchange.
#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: String,
}

impl Authenticator {
    /// Build a gate for `app` against the provider in `config`.
    ///
    /// The audience identifier is derived as `"https://" + app`. No network
    /// I/O happens here; the provider is first contacted per request.
    pub fn new(app: &str, config: Config) -> Result<Self, AuthError> {
        if config.id.is_empty() {
            return Err(AuthError::Configuration("client ID is empty".to_string()));
        }
        if config.secret.is_empty() {
            return Err(AuthError::Configuration(
                "client secret is empty".to_string(),
            ));
        }

        let http =
            HttpClient::new(&config.client).map_err(|e| AuthError::Configuration(e.to_string()))?;

        Ok(Self {
            domain: config.client.url,
            identifier: format!("https://{}", app),
            client_id: config.id,
            client_secret: config.secret,
            http: Arc::new(http),
            validator: None,
        })
    }

    /// Build a gate with explicit HTTP-call and validator capabilities.
    ///
    /// Used by tests and by deployments that bring their own transport; the
    /// per-request JWKS validator construction is bypassed in favor of the
    /// given capability.
    pub fn with_capabilities(
        app: &str,
        config: &Config,
        http: Arc<dyn HttpCall>,
        validator: Arc<dyn RequestValidator>,
    ) -> Self {
        Self {
            domain: config.client.url.clone(),
            identifier: format!("https://{}", app),
            client_id: config.id.clone(),
            client_secret: config.secret.clone(),
            http,
            validator: Some(validator),
        }
    }

    /// Audience identifier this gate validates against.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The validator for one request: the injected capability when present,
    /// otherwise a fresh JWKS validator bound to the provider's well-known
    /// key endpoint.
    fn request_validator(&self) -> Arc<dyn RequestValidator> {
        match &self.validator {
            Some(validator) => validator.clone(),
            None => Arc::new(JwksValidator::new(
                format!("{}{}", self.domain, JWKS_PATH),
                self.identifier.clone(),
                format!("{}/", self.domain),
                Algorithm::RS256,
            )),
        }
    }

    /// Exchange this service's client credentials for an access token.
    ///
    /// Exactly one outbound call, no retries, no caching. Dropping the future
    /// (inbound request cancellation) aborts the call. The token is returned
    /// as-is; an empty `access_token` from the provider is passed through.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let payload = json!({
            "audience": self.identifier,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "client_credentials",
        });

        let response = self
            .http
            .post(TOKEN_PATH, &HeaderMap::new(), &payload)
            .await
            .map_err(|e| AuthError::TokenExchange {
                status: None,
                detail: e.to_string(),
            })?;

        match response.status {
            200 => {
                let access: AccessTokenResponse = serde_json::from_slice(&response.body)
                    .map_err(|e| AuthError::Decode(e.to_string()))?;
                Ok(access.access_token)
            }
            status => Err(AuthError::TokenExchange {
                status: Some(status),
                detail: String::from_utf8_lossy(&response.body).into_owned(),
            }),
        }
    }
}

/// Axum middleware that authenticates a request before invoking the
/// protected handler.
///
/// Wire it up with [`axum::middleware::from_fn_with_state`] and a shared
/// `Arc<Authenticator>`. For every request, strictly in order:
///
/// 1. CORS headers are set on the response, whatever the outcome.
/// 2. A request validator is built for the provider's JWKS endpoint.
/// 3. A service access token is acquired via the client-credentials
///    exchange; on failure the response is `504` with a JSON error body.
/// 4. The token is appended to the request as `Authorization: Bearer <token>`,
///    alongside any caller-supplied value.
/// 5. The request is validated post-injection; on failure the response is
///    `401` with a JSON error body.
/// 6. Only then does the protected handler run, with the header-mutated
///    request.
///
/// The handler is never invoked once an error path is taken.
pub async fn authenticate(
    State(gate): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    with_cors_headers(gate_request(gate, request, next).await)
}

async fn gate_request(gate: Arc<Authenticator>, mut request: Request, next: Next) -> Response {
    let validator = gate.request_validator();

    let token = match gate.get_token().await {
        Ok(token) => token,
        Err(e) => {
            warn!("token exchange failed: {}", e);
            return error_response(StatusCode::GATEWAY_TIMEOUT, &e);
        }
    };

    // Append rather than insert: a caller-supplied Authorization value stays
    // first and is what validation reads. Without one, the service token
    // itself is validated.
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(value) => {
            request.headers_mut().append(header::AUTHORIZATION, value);
        }
        Err(e) => {
            let err = AuthError::Decode(format!("token is not a valid header value: {}", e));
            warn!("{}", err);
            return error_response(StatusCode::GATEWAY_TIMEOUT, &err);
        }
    }

    match validator.validate_request(request.headers()).await {
        Ok(claims) => {
            debug!(sub = %claims.sub, "request authenticated");
            next.run(request).await
        }
        Err(e) => {
            warn!("bearer token rejected: {}", e);
            error_response(StatusCode::UNAUTHORIZED, &AuthError::Validation(e))
        }
    }
}

/// JSON error response for a terminal middleware failure.
fn error_response(status: StatusCode, error: &AuthError) -> Response {
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// Set the gate's CORS headers on a response, whatever its status.
fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALL),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(BASIC_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::error::ValidationError;
    use crate::auth::validator::Claims;
    use crate::client::{HttpCallError, HttpResponse};
    use axum::{Router, body::Body, middleware, routing::get};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Fake token endpoint that records every call it receives.
    struct FakeHttp {
        status: u16,
        body: String,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl FakeHttp {
        fn returning(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl HttpCall for FakeHttp {
        async fn post(
            &self,
            path: &str,
            _headers: &HeaderMap,
            body: &Value,
        ) -> Result<HttpResponse, HttpCallError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), body.clone()));
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone().into_bytes(),
            })
        }
    }

    /// Fake transport that fails every call, as a cancelled or dead upstream
    /// would.
    struct FailingHttp;

    #[async_trait::async_trait]
    impl HttpCall for FailingHttp {
        async fn post(
            &self,
            _path: &str,
            _headers: &HeaderMap,
            _body: &Value,
        ) -> Result<HttpResponse, HttpCallError> {
            Err(HttpCallError::Transport("connection reset".to_string()))
        }
    }

    /// Fake transport that never completes.
    struct HangingHttp;

    #[async_trait::async_trait]
    impl HttpCall for HangingHttp {
        async fn post(
            &self,
            _path: &str,
            _headers: &HeaderMap,
            _body: &Value,
        ) -> Result<HttpResponse, HttpCallError> {
            std::future::pending().await
        }
    }

    /// Fake validator with a fixed verdict.
    struct FakeValidator {
        accept: bool,
    }

    #[async_trait::async_trait]
    impl RequestValidator for FakeValidator {
        async fn validate_request(&self, headers: &HeaderMap) -> Result<Claims, ValidationError> {
            // Behave like the real validator: a bearer header must exist.
            let _ = crate::auth::validator::bearer_token(headers)?;
            if self.accept {
                Ok(Claims {
                    sub: "abc@clients".to_string(),
                    azp: Some("abc".to_string()),
                    scope: None,
                    exp: None,
                })
            } else {
                Err(ValidationError::InvalidToken(
                    "signature verification failed".to_string(),
                ))
            }
        }
    }

    fn test_config() -> Config {
        Config::new("abc", "xyz", "https://idp.example.com")
    }

    fn gate_with(http: Arc<dyn HttpCall>, accept: bool) -> Arc<Authenticator> {
        Arc::new(Authenticator::with_capabilities(
            "orders-service",
            &test_config(),
            http,
            Arc::new(FakeValidator { accept }),
        ))
    }

    /// Router with one protected route that counts invocations and records
    /// the Authorization headers it was invoked with.
    fn protected_app(
        gate: Arc<Authenticator>,
        hits: Arc<AtomicUsize>,
        seen_auth: Arc<Mutex<Vec<String>>>,
    ) -> Router {
        Router::new()
            .route(
                "/orders",
                get(move |request: Request| {
                    let hits = hits.clone();
                    let seen_auth = seen_auth.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        for value in request.headers().get_all(header::AUTHORIZATION) {
                            seen_auth
                                .lock()
                                .unwrap()
                                .push(value.to_str().unwrap_or("<binary>").to_string());
                        }
                        "ok"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(gate, authenticate))
    }

    fn get_request(authorization: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/orders");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn assert_cors_headers(response: &Response) {
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "DELETE, GET, POST, PUT"
        );
        assert!(
            headers
                .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
                .unwrap()
                .to_str()
                .unwrap()
                .contains("Authorization")
        );
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_new_derives_identifier() {
        let gate = Authenticator::new("orders-service", test_config()).unwrap();
        assert_eq!(gate.identifier(), "https://orders-service");
    }

    #[test]
    fn test_new_rejects_empty_credentials() {
        let err = Authenticator::new("app", Config::new("", "xyz", "https://idp.example.com"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));

        let err = Authenticator::new("app", Config::new("abc", "", "https://idp.example.com"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));

        let err = Authenticator::new("app", Config::new("abc", "xyz", "")).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_get_token_success() {
        let http = FakeHttp::returning(200, r#"{"access_token":"T"}"#);
        let gate = gate_with(http.clone(), true);

        assert_eq!(gate.get_token().await.unwrap(), "T");
        assert_eq!(http.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_get_token_passes_through_missing_token_field() {
        let http = FakeHttp::returning(200, r#"{}"#);
        let gate = gate_with(http, true);

        // The provider omitting access_token yields an empty string, not an
        // error.
        assert_eq!(gate.get_token().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_get_token_decode_error_on_malformed_body() {
        let http = FakeHttp::returning(200, "not json");
        let gate = gate_with(http, true);

        let err = gate.get_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Decode(_)));
    }

    #[tokio::test]
    async fn test_get_token_surfaces_status_and_body() {
        let http = FakeHttp::returning(503, "upstream down");
        let gate = gate_with(http, true);

        let err = gate.get_token().await.unwrap_err();
        match err {
            AuthError::TokenExchange { status, detail } => {
                assert_eq!(status, Some(503));
                assert_eq!(detail, "upstream down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_failure_responds_504_without_invoking_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(FakeHttp::returning(500, "boom"), true);
        let app = protected_app(gate, hits.clone(), seen);

        let response = app.oneshot(get_request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_cors_headers(&response);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let body = body_text(response).await;
        assert!(body.contains("error"));
        assert!(body.contains("500"));
    }

    #[tokio::test]
    async fn test_transport_failure_responds_504() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(Arc::new(FailingHttp), true);
        let app = protected_app(gate, hits.clone(), seen);

        let response = app.oneshot(get_request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_cors_headers(&response);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_responds_401_without_invoking_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(FakeHttp::returning(200, r#"{"access_token":"T"}"#), false);
        let app = protected_app(gate, hits.clone(), seen);

        let response = app
            .oneshot(get_request(Some("Bearer caller-token")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_cors_headers(&response);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let body = body_text(response).await;
        assert!(body.contains("signature verification failed"));
    }

    #[tokio::test]
    async fn test_success_invokes_handler_once_with_injected_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(FakeHttp::returning(200, r#"{"access_token":"T"}"#), true);
        let app = protected_app(gate, hits.clone(), seen.clone());

        let response = app
            .oneshot(get_request(Some("Bearer caller-token")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors_headers(&response);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The handler sees both the caller's value and the injected service
        // token; the caller's stays first.
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["Bearer caller-token", "Bearer T"]);
    }

    #[tokio::test]
    async fn test_success_without_caller_header_validates_service_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(FakeHttp::returning(200, r#"{"access_token":"T"}"#), true);
        let app = protected_app(gate, hits.clone(), seen.clone());

        let response = app.oneshot(get_request(None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().clone(), vec!["Bearer T"]);
    }

    #[tokio::test]
    async fn test_each_request_triggers_its_own_exchange() {
        let http = FakeHttp::returning(200, r#"{"access_token":"T"}"#);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(http.clone(), true);
        let app = protected_app(gate, hits.clone(), seen);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(get_request(Some("Bearer caller-token")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        // No token reuse across requests: one exchange per request.
        assert_eq!(http.calls().len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_exchange_does_not_hang_the_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(Arc::new(HangingHttp), true);
        let app = protected_app(gate, hits.clone(), seen);

        // The caller abandoning the request drops the middleware future; the
        // gate must not block anything past that point.
        let result =
            tokio::time::timeout(Duration::from_secs(5), app.oneshot(get_request(None))).await;

        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_orders_service_exchange_payload() {
        let http = FakeHttp::returning(200, r#"{"access_token":"T"}"#);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = gate_with(http.clone(), true);
        let app = protected_app(gate, hits, seen);

        let response = app
            .oneshot(get_request(Some("Bearer caller-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let calls = http.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "oauth/token");
        assert_eq!(
            calls[0].1,
            json!({
                "audience": "https://orders-service",
                "client_id": "abc",
                "client_secret": "xyz",
                "grant_type": "client_credentials",
            })
        );
    }
}
