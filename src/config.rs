//! Configuration for the authentication gate.
//!
//! Configuration is immutable after construction: it is loaded once at
//! startup and handed to [`crate::Authenticator::new`], which keeps its own
//! copy for the lifetime of the process.

use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Default timeout for calls to the identity provider, in seconds.
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Outbound HTTP client configuration for the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the identity provider, e.g. `https://tenant.auth0.com`.
    pub url: String,

    /// Request timeout in seconds for calls to the provider.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

/// Identity-provider credentials plus the embedded client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// OAuth2 client ID of this service.
    pub id: String,

    /// OAuth2 client secret of this service.
    pub secret: String,

    /// Provider client configuration.
    #[serde(flatten)]
    pub client: ClientConfig,
}

impl Config {
    /// Build a config directly from its parts, with the default timeout.
    pub fn new(id: impl Into<String>, secret: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            client: ClientConfig {
                url: url.into(),
                timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            },
        }
    }
}

/// Resolve the config file path from the environment or the working directory.
pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("AUTHGATE_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    let candidate = PathBuf::from("authgate.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find authgate.json (set AUTHGATE_CONFIG or create ./authgate.json)"
    ))
}

/// Load a [`Config`] from a JSON file.
///
/// `${NAME}` references anywhere in the file are replaced with the value of
/// the corresponding environment variable before parsing, so client secrets
/// can stay out of the file itself. Unset variables are left as-is.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let raw = fs::read_to_string(path)?;
    let expanded = expand_env_vars(&raw);
    let config: Config = serde_json::from_str(&expanded)?;
    Ok(config)
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
