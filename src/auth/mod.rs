//! Authentication middleware module.
//!
//! Sits in front of protected handlers and proves *who* is calling before a
//! request reaches them:
//!
//! - **Token acquisition**: a service access token is obtained from the
//!   identity provider via the OAuth2 client-credentials grant, fresh for
//!   every request.
//! - **Token injection**: the acquired token is appended to the request as a
//!   bearer `Authorization` header before validation runs.
//! - **Validation**: the request's bearer token is checked against the
//!   provider's published JWKS for signature, audience, and issuer.
//!
//! Failure short-circuits the request with `504` (acquisition) or `401`
//! (validation) and a JSON error body; the protected handler never runs on a
//! failed request. Authorization decisions beyond audience matching are out
//! of scope.

mod authenticator;
mod error;
pub mod validator;

pub use authenticator::{Authenticator, authenticate};
pub use error::{AuthError, ValidationError};
pub use validator::{Claims, JwksValidator, RequestValidator, bearer_token};
