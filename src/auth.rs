//! Handshake credential verification.
//!
//! Every persistent connection and every REST call presents a signed token,
//! either in the `sotto_token` cookie or as a bearer header. Token issuance
//! (login, signup) lives in the account service; [`TokenVerifier::issue`] is
//! the seam it uses, and what the tests use to mint credentials.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts, HeaderMap};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::appresult::{AppError, AppResult};

pub const AUTH_COOKIE: &str = "sotto_token";

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: i64,
}

#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Mint a token for `user_id`, valid for `ttl` from now.
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> AppResult<String> {
        let claims = Claims {
            sub: user_id,
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        };
        jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &self.encoding)
            .map_err(|err| AppError::Internal(err.into()))
    }

    /// Extract and verify the credential from request/handshake headers,
    /// returning the subject user id.
    pub fn authenticate(&self, headers: &HeaderMap) -> AppResult<Uuid> {
        let token = credential_from_headers(headers)
            .ok_or_else(|| AppError::Unauthorized("missing credential".to_owned()))?;

        let data = jsonwebtoken::decode::<Claims>(&token, &self.decoding, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => {
                    AppError::Unauthorized("credential expired".to_owned())
                }
                _ => AppError::Unauthorized("invalid credential".to_owned()),
            })?;

        Ok(data.claims.sub)
    }
}

fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        if let Some(token) = auth.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
            return Some(token.to_owned());
        }
    }

    for cookies in headers.get_all(header::COOKIE) {
        let Ok(cookies) = cookies.to_str() else {
            continue;
        };
        for cookie in cookies.split(';') {
            if let Some(token) = cookie.trim().strip_prefix(AUTH_COOKIE) {
                if let Some(token) = token.strip_prefix('=') {
                    return Some(token.to_owned());
                }
            }
        }
    }

    None
}

/// The authenticated caller of a REST request.
pub struct AuthedUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthedUser
where
    TokenVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = TokenVerifier::from_ref(state);
        verifier.authenticate(&parts.headers).map(AuthedUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {AUTH_COOKIE}={token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn cookie_roundtrip() {
        let verifier = TokenVerifier::new("test-secret");
        let user_id = Uuid::now_v7();
        let token = verifier.issue(user_id, Duration::minutes(5)).unwrap();

        let resolved = verifier.authenticate(&headers_with_cookie(&token)).unwrap();
        assert_eq!(resolved, user_id);
    }

    #[test]
    fn bearer_header_accepted() {
        let verifier = TokenVerifier::new("test-secret");
        let user_id = Uuid::now_v7();
        let token = verifier.issue(user_id, Duration::minutes(5)).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(verifier.authenticate(&headers).unwrap(), user_id);
    }

    #[test]
    fn missing_credential_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let err = verifier.authenticate(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn expired_credential_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let token = verifier
            .issue(Uuid::now_v7(), Duration::minutes(-5))
            .unwrap();

        let err = verifier
            .authenticate(&headers_with_cookie(&token))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(reason) if reason.contains("expired")));
    }

    #[test]
    fn garbage_credential_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let err = verifier
            .authenticate(&headers_with_cookie("not-a-token"))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn wrong_secret_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let other = TokenVerifier::new("other-secret");
        let token = other.issue(Uuid::now_v7(), Duration::minutes(5)).unwrap();

        let err = verifier
            .authenticate(&headers_with_cookie(&token))
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
