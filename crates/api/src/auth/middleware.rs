//! Authentication middleware for Axum
//!
//! Requests carry the identity provider's session token, either as a bearer
//! header or in the `__session` cookie. The token's `sub` claim is the
//! external identity id used by every account lookup.

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::{Config, ConfigError};

/// Cache verified sessions for at most 60 seconds (or until token expiry)
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(60);

/// Bound on cached sessions; the oldest entry is evicted past this size
const MAX_CACHE_ENTRIES: usize = 10_000;

/// Cookie the identity provider's frontend SDK stores the session token in
const SESSION_COOKIE: &str = "__session";

#[derive(Debug, Clone, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: u64,
    #[serde(default)]
    sid: Option<String>,
}

/// Authenticated user extracted from the session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Identity-provider user id (`sub` claim)
    pub external_id: String,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
struct CachedSession {
    user: AuthUser,
    expires_at: Instant,
}

type TokenCache = Arc<RwLock<HashMap<String, CachedSession>>>;

struct SessionKeys {
    decoding: DecodingKey,
    validation: Validation,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    keys: Option<Arc<SessionKeys>>,
    token_cache: TokenCache,
}

impl AuthState {
    /// RS256 with `CLERK_JWT_KEY` when set, else HS256 with `SESSION_JWT_SECRET`.
    /// With neither, every protected request is rejected.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if let Some(pem) = config.clerk_jwt_key.as_deref() {
            let decoding =
                DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|_| ConfigError::Invalid {
                    key: "CLERK_JWT_KEY",
                    value: "<unparseable PEM>".to_string(),
                })?;
            return Ok(Self::with_key(decoding, Algorithm::RS256));
        }
        if let Some(secret) = config.session_jwt_secret.as_deref() {
            tracing::warn!("Using HS256 session secret; set CLERK_JWT_KEY in production");
            return Ok(Self::with_hs256_secret(secret));
        }
        tracing::error!("No session verification key configured; authenticated routes will reject all requests");
        Ok(Self {
            keys: None,
            token_cache: Arc::default(),
        })
    }

    pub fn with_hs256_secret(secret: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    }

    fn with_key(decoding: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.leeway = 5;
        Self {
            keys: Some(Arc::new(SessionKeys {
                decoding,
                validation,
            })),
            token_cache: Arc::default(),
        }
    }

    /// Verify a session token, consulting the cache first
    pub async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let keys = self.keys.as_ref().ok_or(AuthError::NotConfigured)?;
        let cache_key = hex::encode(Sha256::digest(token.as_bytes()));

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.user.clone());
                }
            }
        }

        let claims = decode::<SessionClaims>(token, &keys.decoding, &keys.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Session token rejected");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let user = AuthUser {
            external_id: claims.sub,
            session_id: claims.sid,
        };

        let now_unix = time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        let until_exp = Duration::from_secs(claims.exp.saturating_sub(now_unix));
        let ttl = TOKEN_CACHE_TTL.min(until_exp);

        let mut cache = self.token_cache.write().await;
        if cache.len() >= MAX_CACHE_ENTRIES {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, v)| v.expires_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(
            cache_key,
            CachedSession {
                user: user.clone(),
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(user)
    }
}

/// Extract the session token from the cookie header
fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(str::trim)
                .find_map(|c| c.strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
                .map(String::from)
        })
}

/// Bearer token from the Authorization header, falling back to the session cookie
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    extract_token_from_cookie(request)
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(&request) else {
        tracing::debug!(path = %path, "require_auth: no session token");
        return AuthError::MissingAuth.into_response();
    };

    match auth_state.verify(&token).await {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                external_id = %auth_user.external_id,
                "require_auth: authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Session verification not configured")]
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::NotConfigured => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
