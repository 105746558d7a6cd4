// Core modules
pub mod auth;
pub mod client;
pub mod config;
pub mod cors;

// Re-export key types and functions
pub use auth::{
    AuthError, Authenticator, Claims, JwksValidator, RequestValidator, ValidationError,
    authenticate,
};
pub use client::{HttpCall, HttpCallError, HttpClient, HttpResponse};
pub use config::{ClientConfig, Config};

use std::sync::Arc;

/// Convenience function to put a router behind the authentication gate.
///
/// Applies the authentication middleware and the CORS layer, so every route
/// in `router` requires a validated bearer token and every response carries
/// the cross-origin headers.
pub fn protect(router: axum::Router, gate: Arc<Authenticator>) -> axum::Router {
    router
        .layer(axum::middleware::from_fn_with_state(gate, authenticate))
        .layer(cors::layer())
}
