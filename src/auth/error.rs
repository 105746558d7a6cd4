//! Error taxonomy for the authentication gate.

use std::fmt;

/// Errors raised while validating an inbound bearer token.
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// The request carries no `Authorization` header.
    MissingToken,
    /// The `Authorization` header is present but not a usable bearer value.
    MalformedHeader,
    /// Fetching or parsing the provider's JWKS document failed.
    Jwks(String),
    /// No signing key in the JWKS document matched the token's key ID.
    KeyNotFound(String),
    /// Signature or claims validation failed.
    InvalidToken(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "missing bearer token"),
            Self::MalformedHeader => write!(f, "malformed Authorization header"),
            Self::Jwks(msg) => write!(f, "JWKS error: {}", msg),
            Self::KeyNotFound(kid) => write!(f, "no signing key with kid: {}", kid),
            Self::InvalidToken(msg) => write!(f, "invalid token: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors raised by the authentication gate.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// The gate could not be constructed from the supplied configuration.
    Configuration(String),
    /// The client-credentials exchange with the identity provider failed.
    ///
    /// `status` is present when the provider answered with a non-200 status;
    /// `detail` carries the response body or the transport error.
    TokenExchange {
        status: Option<u16>,
        detail: String,
    },
    /// The provider answered 200 but the body could not be decoded.
    Decode(String),
    /// The inbound bearer token failed validation.
    Validation(ValidationError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {}", msg),
            Self::TokenExchange {
                status: Some(status),
                detail,
            } => write!(f, "token exchange failed with status {}: {}", status, detail),
            Self::TokenExchange {
                status: None,
                detail,
            } => write!(f, "token exchange failed: {}", detail),
            Self::Decode(msg) => write!(f, "could not decode token response: {}", msg),
            Self::Validation(e) => write!(f, "validation failed: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<ValidationError> for AuthError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}
