mod jwks;

pub use jwks::{ JwksConfig, JwksVerifier };

use async_trait::async_trait;
use axum::{
    extract::{ Request, State },
    http::{ header::AUTHORIZATION, HeaderMap },
    middleware::Next,
    response::{ IntoResponse, Response },
};
use log::{ info, warn };
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use crate::cli::Args;
use crate::server::error::ApiError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("identity provider key set unavailable: {0}")]
    KeySetUnavailable(String),
}

/// Identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub subject: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

pub type SharedVerifier = Arc<dyn TokenVerifier>;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Rejects the request before it reaches the handler unless it carries a valid
/// bearer token. The verified user is stored in the request extensions.
pub async fn require_bearer(
    State(verifier): State<SharedVerifier>,
    mut request: Request,
    next: Next
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_owned) else {
        warn!("{} {}: missing bearer token", request.method(), request.uri().path());
        return ApiError::from(AuthError::MissingToken).into_response();
    };

    match verifier.verify(&token).await {
        Ok(user) => {
            info!("{} {} authenticated as {}", request.method(), request.uri().path(), user.subject);
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => {
            warn!("{} {}: {}", request.method(), request.uri().path(), e);
            ApiError::from(e).into_response()
        }
    }
}

pub fn initialize_verifier(args: &Args) -> Result<Option<SharedVerifier>, AuthError> {
    let Some(jwks_url) = args.jwks_url.as_ref().filter(|u| !u.trim().is_empty()) else {
        warn!("JWKS_URL not set. Protected endpoints are served WITHOUT authentication.");
        return Ok(None);
    };

    let config = JwksConfig {
        jwks_url: jwks_url.clone(),
        issuer: args.jwt_issuer.clone(),
        audience: args.jwt_audience.clone(),
        cache_duration: Duration::from_secs(args.jwks_cache_secs),
    };
    info!("Bearer tokens will be verified against key set at {}", jwks_url);
    Ok(Some(Arc::new(JwksVerifier::new(config)?)))
}
