use async_trait::async_trait;
use jsonwebtoken::{ decode, decode_header, jwk::{ JwkSet, KeyAlgorithm }, Algorithm, DecodingKey, Validation };
use log::{ debug, error, warn };
use serde::Deserialize;
use std::time::{ Duration, Instant };
use tokio::sync::RwLock;
use crate::auth::{ AuthError, AuthenticatedUser, TokenVerifier };

#[derive(Debug, Clone)]
pub struct JwksConfig {
    pub jwks_url: String,
    /// Checked against `iss` when set.
    pub issuer: Option<String>,
    /// Checked against `aud` when set.
    pub audience: Option<String>,
    pub cache_duration: Duration,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

struct CachedKeys {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Verifies RS/ES/PS/EdDSA-signed JWTs against an identity provider's published key set.
pub struct JwksVerifier {
    config: JwksConfig,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksVerifier {
    pub fn new(config: JwksConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client
            ::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::KeySetUnavailable(e.to_string()))?;
        Ok(Self {
            config,
            http,
            cache: RwLock::new(None),
        })
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        debug!("Fetching JWKS from {}", self.config.jwks_url);
        let response = self.http
            .get(&self.config.jwks_url)
            .send().await
            .map_err(|e| {
                error!("Failed to fetch JWKS: {}", e);
                AuthError::KeySetUnavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!("JWKS endpoint returned {}", status);
            return Err(AuthError::KeySetUnavailable(format!("JWKS endpoint returned {}", status)));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!("Failed to parse JWKS: {}", e);
            AuthError::KeySetUnavailable(format!("Failed to parse JWKS: {}", e))
        })?;
        debug!("Fetched {} keys from JWKS", jwks.keys.len());

        *self.cache.write().await = Some(CachedKeys {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }

    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.config.cache_duration {
                    return Ok(cached.jwks.clone());
                }
            }
        }
        self.fetch_jwks().await
    }

    /// Looks up `kid`, refetching once in case the provider rotated its keys.
    async fn decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;
        if let Some(found) = key_for(&jwks, kid)? {
            return Ok(found);
        }
        debug!("kid {} not in cached key set, refetching", kid);
        let jwks = self.fetch_jwks().await?;
        key_for(&jwks, kid)?.ok_or_else(|| {
            warn!("No matching key found for kid: {}", kid);
            AuthError::InvalidToken
        })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        match &self.config.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => {
                validation.iss = None;
            }
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => {
                validation.validate_aud = false;
            }
        }
        validation
    }
}

fn key_for(jwks: &JwkSet, kid: &str) -> Result<Option<(DecodingKey, Algorithm)>, AuthError> {
    let Some(jwk) = jwks.find(kid) else {
        return Ok(None);
    };
    let algorithm = algorithm_for(jwk.common.key_algorithm)?;
    let key = DecodingKey::from_jwk(jwk).map_err(|e| {
        warn!("Failed to create decoding key: {}", e);
        AuthError::InvalidToken
    })?;
    Ok(Some((key, algorithm)))
}

fn algorithm_for(key_algorithm: Option<KeyAlgorithm>) -> Result<Algorithm, AuthError> {
    match key_algorithm {
        Some(KeyAlgorithm::RS256) | None => Ok(Algorithm::RS256),
        Some(KeyAlgorithm::RS384) => Ok(Algorithm::RS384),
        Some(KeyAlgorithm::RS512) => Ok(Algorithm::RS512),
        Some(KeyAlgorithm::PS256) => Ok(Algorithm::PS256),
        Some(KeyAlgorithm::PS384) => Ok(Algorithm::PS384),
        Some(KeyAlgorithm::PS512) => Ok(Algorithm::PS512),
        Some(KeyAlgorithm::ES256) => Ok(Algorithm::ES256),
        Some(KeyAlgorithm::ES384) => Ok(Algorithm::ES384),
        Some(KeyAlgorithm::EdDSA) => Ok(Algorithm::EdDSA),
        Some(other) => {
            warn!("Unsupported JWK algorithm: {:?}", other);
            Err(AuthError::InvalidToken)
        }
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let header = decode_header(token).map_err(|e| {
            debug!("Failed to decode JWT header: {}", e);
            AuthError::InvalidToken
        })?;
        let kid = header.kid.as_deref().ok_or_else(|| {
            warn!("JWT missing 'kid' header");
            AuthError::InvalidToken
        })?;

        let (key, algorithm) = self.decoding_key(kid).await?;
        if header.alg != algorithm {
            warn!("JWT alg {:?} does not match key algorithm {:?}", header.alg, algorithm);
            return Err(AuthError::InvalidToken);
        }

        let data = decode::<Claims>(token, &key, &self.validation(algorithm)).map_err(|e| {
            debug!("Token validation failed: {}", e);
            AuthError::InvalidToken
        })?;

        Ok(AuthenticatedUser { subject: data.claims.sub })
    }
}

impl std::fmt::Debug for JwksVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksVerifier")
            .field("jwks_url", &self.config.jwks_url)
            .field("issuer", &self.config.issuer)
            .field("audience", &self.config.audience)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> JwksVerifier {
        JwksVerifier::new(JwksConfig {
            jwks_url: "http://127.0.0.1:9/jwks.json".into(),
            issuer: None,
            audience: None,
            cache_duration: Duration::from_secs(60),
        }).unwrap()
    }

    #[test]
    fn algorithm_defaults_to_rs256() {
        assert_eq!(algorithm_for(None).unwrap(), Algorithm::RS256);
        assert_eq!(algorithm_for(Some(KeyAlgorithm::ES256)).unwrap(), Algorithm::ES256);
        assert!(algorithm_for(Some(KeyAlgorithm::HS256)).is_err());
    }

    #[test]
    fn validation_skips_unconfigured_issuer_and_audience() {
        let validation = verifier().validation(Algorithm::RS256);
        assert!(validation.iss.is_none());
        assert!(!validation.validate_aud);
        assert!(validation.validate_exp);
    }

    #[tokio::test]
    async fn garbage_token_is_rejected_before_any_fetch() {
        let err = verifier().verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[test]
    fn key_lookup_misses_unknown_kid() {
        let jwks: JwkSet = serde_json::from_str(r#"{"keys":[]}"#).unwrap();
        assert!(key_for(&jwks, "missing").unwrap().is_none());
    }
}
