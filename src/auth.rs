//! Caller authentication for the HTTP surface.
//!
//! The gate is stateless: every request carries its credential in the
//! `Authorization: Bearer <token>` header and is checked on its own.
//!
//! | `[auth] mode` | Accepts |
//! |---------------|---------|
//! | `disabled` | everything (local development) |
//! | `tokens` | static tokens from `tokens` / `$tokens_env`, kept as SHA-256 digests |
//! | `jwt` | HS256 JWTs signed with `$jwt_secret_env`, `sub` set and `exp` in the future |

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Who a verified credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
}

enum Scheme {
    Disabled,
    Tokens(HashSet<String>),
    Jwt(Vec<u8>),
}

pub struct AuthGate {
    scheme: Scheme,
}

impl AuthGate {
    pub fn disabled() -> Self {
        Self {
            scheme: Scheme::Disabled,
        }
    }

    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let digests = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| token_digest(&t))
            .collect();
        Self {
            scheme: Scheme::Tokens(digests),
        }
    }

    pub fn with_jwt_secret(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme: Scheme::Jwt(secret.into()),
        }
    }

    /// Build the gate for `[auth]`, reading secrets from the environment.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        match config.mode.as_str() {
            "disabled" => Ok(Self::disabled()),
            "tokens" => {
                let mut tokens = config.tokens.clone();
                if let Ok(from_env) = std::env::var(&config.tokens_env) {
                    tokens.extend(from_env.split(',').map(str::to_string));
                }
                let gate = Self::with_tokens(tokens);
                if let Scheme::Tokens(ref set) = gate.scheme {
                    if set.is_empty() {
                        bail!(
                            "auth.mode = \"tokens\" but no tokens configured (auth.tokens or ${})",
                            config.tokens_env
                        );
                    }
                }
                Ok(gate)
            }
            "jwt" => Ok(Self::with_jwt_secret(jwt_secret(config)?)),
            other => bail!("Unknown auth mode: {}", other),
        }
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, credential: Option<&str>) -> Result<Principal> {
        match &self.scheme {
            Scheme::Disabled => Ok(Principal {
                subject: "anonymous".to_string(),
            }),
            Scheme::Tokens(digests) => {
                let token = bearer(credential)?;
                let digest = token_digest(token);
                if digests.contains(&digest) {
                    Ok(Principal {
                        subject: format!("token:{}", &digest[..12]),
                    })
                } else {
                    Err(Error::Auth("unknown token".into()))
                }
            }
            Scheme::Jwt(secret) => {
                let claims = decode_jwt(secret, bearer(credential)?)?;
                Ok(Principal {
                    subject: claims.sub,
                })
            }
        }
    }

    pub fn authorize(&self, credential: Option<&str>) -> bool {
        self.verify(credential).is_ok()
    }
}

/// Read the JWT signing secret named by `auth.jwt_secret_env`.
pub fn jwt_secret(config: &AuthConfig) -> anyhow::Result<Vec<u8>> {
    let secret = std::env::var(&config.jwt_secret_env)
        .with_context(|| format!("{} environment variable not set", config.jwt_secret_env))?;
    if secret.is_empty() {
        bail!("{} is empty", config.jwt_secret_env);
    }
    Ok(secret.into_bytes())
}

/// Mint an HS256 JWT for `subject`, valid for `ttl_minutes`.
pub fn issue_token(secret: &[u8], subject: &str, ttl_minutes: i64) -> anyhow::Result<String> {
    if subject.is_empty() {
        bail!("token subject must not be empty");
    }
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
        iat: Some(now.timestamp()),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .context("Failed to sign token")
}

/// `docchat token`: print a JWT for `subject`.
pub fn run_token(
    config: &AuthConfig,
    subject: &str,
    ttl_minutes: Option<i64>,
) -> anyhow::Result<()> {
    let ttl = ttl_minutes.unwrap_or(config.token_ttl_minutes);
    if ttl <= 0 {
        bail!("--ttl-minutes must be > 0");
    }
    let token = issue_token(&jwt_secret(config)?, subject, ttl)?;
    println!("{}", token);
    Ok(())
}

fn bearer(credential: Option<&str>) -> Result<&str> {
    let value = credential
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Auth("missing Authorization header".into()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| Error::Auth("expected 'Bearer <token>'".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(Error::Auth("expected 'Bearer <token>'".into()));
    }
    Ok(token.trim())
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn decode_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation.leeway = 0;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).map_err(
        |e| match e.kind() {
            ErrorKind::ExpiredSignature => Error::Auth("token expired".into()),
            _ => Error::Auth(format!("invalid token: {}", e)),
        },
    )?;

    if data.claims.sub.is_empty() {
        return Err(Error::Auth("invalid token: missing subject".into()));
    }
    Ok(data.claims)
}
