use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request, HeaderMap},
};
use fadeno_api::Principal;

use crate::{
    auth::{RevocationRegistry, TokenVerifier},
    Error,
};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const SESSION_COOKIE: &str = "session_id";

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub verifier: Arc<TokenVerifier>,
    pub registry: Arc<RevocationRegistry>,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// The caller's authorization context. Extraction never rejects: requests
/// without a usable credential carry an unauthenticated principal and the
/// per-operation gates decide what that may do.
pub struct Auth(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        Ok(Auth(derive_principal(
            &req.headers,
            &state.verifier,
            &state.registry,
        )))
    }
}

/// Builds the principal out of the session cookies: both tokens must
/// verify and the session must not be marked revoked for the presented
/// refresh fingerprint. Anything less yields a guest.
pub fn derive_principal(
    headers: &HeaderMap,
    verifier: &TokenVerifier,
    registry: &RevocationRegistry,
) -> Principal {
    let cookies = parse_cookies(headers);
    let (Some(access), Some(refresh), Some(session)) = (
        cookies.get(ACCESS_COOKIE),
        cookies.get(REFRESH_COOKIE),
        cookies.get(SESSION_COOKIE),
    ) else {
        return Principal::Unauthenticated;
    };

    let Some(claims) = verifier.verify(access) else {
        return Principal::Unauthenticated;
    };
    if !verifier.is_valid(refresh) {
        return Principal::Unauthenticated;
    }
    if registry.is_revoked(session, refresh) {
        tracing::debug!(session = %session, "rejecting revoked session");
        return Principal::Unauthenticated;
    }

    Principal::from_claims(&claims).unwrap_or(Principal::Unauthenticated)
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<&str, &str> {
    let mut out = HashMap::new();
    for value in headers.get_all(http::header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, val)) = pair.trim().split_once('=') {
                out.insert(name, val);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sign_claims, test_claims, TEST_EC_PUBLIC_PEM};
    use axum::http::HeaderValue;
    use fadeno_api::{Permission, UserId, UserState};
    use std::collections::HashMap as Map;

    fn headers(cookies: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let joined = cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_str(&joined).unwrap(),
        );
        headers
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(TEST_EC_PUBLIC_PEM).unwrap()
    }

    #[test]
    fn cookie_parsing() {
        let h = headers(&[("a", "1"), ("b", "2")]);
        let cookies = parse_cookies(&h);
        assert_eq!(cookies.get("a"), Some(&"1"));
        assert_eq!(cookies.get("b"), Some(&"2"));
        assert_eq!(cookies.get("c"), None);
        assert!(parse_cookies(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn valid_session_authenticates() {
        let token = sign_claims(&test_claims(3600));
        let h = headers(&[
            (ACCESS_COOKIE, &token),
            (REFRESH_COOKIE, &token),
            (SESSION_COOKIE, "sess-1"),
        ]);
        let p = derive_principal(&h, &verifier(), &RevocationRegistry::new());
        assert_eq!(p.id(), Some(UserId::stub()));
        assert_eq!(p.state(), Some(UserState::Active));
        assert!(p.can(Permission::CreateComment));
    }

    #[test]
    fn missing_cookies_yield_guest() {
        let token = sign_claims(&test_claims(3600));
        let reg = RevocationRegistry::new();
        let v = verifier();
        assert!(!derive_principal(&HeaderMap::new(), &v, &reg).is_authenticated());
        // no session id
        let h = headers(&[(ACCESS_COOKIE, &token), (REFRESH_COOKIE, &token)]);
        assert!(!derive_principal(&h, &v, &reg).is_authenticated());
    }

    #[test]
    fn expired_access_token_yields_guest() {
        let good = sign_claims(&test_claims(3600));
        let expired = sign_claims(&test_claims(-3600));
        let h = headers(&[
            (ACCESS_COOKIE, &expired),
            (REFRESH_COOKIE, &good),
            (SESSION_COOKIE, "sess-1"),
        ]);
        assert!(!derive_principal(&h, &verifier(), &RevocationRegistry::new()).is_authenticated());
    }

    #[test]
    fn revoked_session_yields_guest_even_with_valid_tokens() {
        let token = sign_claims(&test_claims(3600));
        let reg = RevocationRegistry::new();
        reg.replace(Map::from([("sess-1".to_string(), token.clone())]));
        let h = headers(&[
            (ACCESS_COOKIE, &token),
            (REFRESH_COOKIE, &token),
            (SESSION_COOKIE, "sess-1"),
        ]);
        assert!(!derive_principal(&h, &verifier(), &reg).is_authenticated());

        // a fresh refresh token for the same session authenticates again
        let reissued = sign_claims(&test_claims(7200));
        let h = headers(&[
            (ACCESS_COOKIE, &token),
            (REFRESH_COOKIE, &reissued),
            (SESSION_COOKIE, "sess-1"),
        ]);
        assert!(derive_principal(&h, &verifier(), &reg).is_authenticated());
    }
}
