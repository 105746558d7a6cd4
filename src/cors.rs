//! Cross-origin response headers for handlers fronted by the gate.

use axum::http::{HeaderName, Method, header};
use tower_http::cors::{Any, CorsLayer};

/// CORS layer with the gate's fixed allowlist: the `X-Requested-With`,
/// `Content-Type`, and `Authorization` headers, the `DELETE`, `GET`, `POST`,
/// and `PUT` methods, and any origin.
///
/// Stateless and independent of the [`crate::Authenticator`]; compose it
/// before the authentication middleware or on its own.
pub fn layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::DELETE, Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
}
