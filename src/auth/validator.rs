//! JWKS-backed validation of inbound bearer tokens.
//!
//! [`JwksValidator`] is bound to one provider's published key endpoint,
//! expected audience, and expected issuer. It is stateless: every validation
//! fetches the JWKS document anew, so a validator can be built per request
//! without observable difference. Key-rotation staleness is therefore zero at
//! the cost of one fetch per validation.

use async_trait::async_trait;
use base64::Engine;
use http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::error::ValidationError;

/// Timeout for fetching the JWKS document.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Claims carried by a validated access token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Subject the token was issued to.
    pub sub: String,
    /// Authorized party (the client ID the token was issued for).
    #[serde(default)]
    pub azp: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// Expiration time (seconds since the Unix epoch).
    #[serde(default)]
    pub exp: Option<u64>,
}

/// A single JSON Web Key from the provider's JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the JWT header kid
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
    /// X.509 certificate chain
    pub x5c: Option<Vec<String>>,
}

/// A JWKS document containing the provider's signing keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Capability for validating the bearer token on an inbound request.
#[async_trait]
pub trait RequestValidator: Send + Sync {
    /// Validate the request's bearer token and return its claims.
    ///
    /// Reads the first `Authorization` header value present on the request.
    async fn validate_request(&self, headers: &HeaderMap) -> Result<Claims, ValidationError>;
}

/// Validator bound to one provider's JWKS endpoint, audience, and issuer.
pub struct JwksValidator {
    jwks_url: String,
    audience: String,
    issuer: String,
    algorithm: Algorithm,
    client: reqwest::Client,
}

impl JwksValidator {
    /// Create a validator for the given endpoint and expected claims.
    pub fn new(jwks_url: String, audience: String, issuer: String, algorithm: Algorithm) -> Self {
        Self {
            jwks_url,
            audience,
            issuer,
            algorithm,
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the provider's current JWKS document.
    async fn fetch_document(&self) -> Result<JwksDocument, ValidationError> {
        debug!("fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .timeout(JWKS_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ValidationError::Jwks(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ValidationError::Jwks(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ValidationError::Jwks(format!("invalid JWKS document: {}", e)))
    }

    /// Pick the signing key matching `kid`, or the first usable key when the
    /// token header carries no kid.
    fn decoding_key(
        document: &JwksDocument,
        kid: Option<&str>,
    ) -> Result<DecodingKey, ValidationError> {
        for jwk in &document.keys {
            if jwk.kty != "RSA" {
                debug!("skipping non-RSA key: {}", jwk.kty);
                continue;
            }
            if jwk.key_use.as_deref() == Some("enc") {
                debug!("skipping encryption key");
                continue;
            }
            if let Some(kid) = kid
                && jwk.kid.as_deref() != Some(kid)
            {
                continue;
            }

            return Self::jwk_to_decoding_key(jwk);
        }

        Err(ValidationError::KeyNotFound(
            kid.unwrap_or("<none>").to_string(),
        ))
    }

    /// Convert a JWK to a jsonwebtoken [`DecodingKey`].
    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, ValidationError> {
        // Prefer the x5c certificate when present. x5c carries standard
        // base64 (not URL-safe) DER material.
        if let Some(x5c) = &jwk.x5c
            && let Some(cert) = x5c.first()
        {
            let cert_der = base64::engine::general_purpose::STANDARD
                .decode(cert)
                .map_err(|e| ValidationError::Jwks(format!("invalid x5c: {}", e)))?;
            return Ok(DecodingKey::from_rsa_der(&cert_der));
        }

        // Fall back to the n/e RSA components, the common case.
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| ValidationError::Jwks("missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| ValidationError::Jwks("missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| ValidationError::Jwks(format!("invalid RSA components: {}", e)))
    }
}

#[async_trait]
impl RequestValidator for JwksValidator {
    async fn validate_request(&self, headers: &HeaderMap) -> Result<Claims, ValidationError> {
        let token = bearer_token(headers)?;

        // Parse the JWT header first so a garbage token never triggers a
        // JWKS fetch.
        let header = decode_header(token)
            .map_err(|e| ValidationError::InvalidToken(format!("invalid JWT header: {}", e)))?;

        let document = self.fetch_document().await?;
        let decoding_key = Self::decoding_key(&document, header.kid.as_deref())?;

        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| ValidationError::InvalidToken(e.to_string()))?;

        debug!(sub = %token_data.claims.sub, "bearer token validated");

        Ok(token_data.claims)
    }
}

/// Extract the bearer token from the first `Authorization` header value.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ValidationError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(ValidationError::MissingToken)?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ValidationError::MalformedHeader)
}
