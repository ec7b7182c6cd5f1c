//! Per-request resolution of a bearer token to an active account.
//!
//! The steps are: parse the `Authorization` header, verify the token,
//! consult the revocation store, load the account, check it is enabled.
//! Whichever step fails, the caller sees the same 401.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::err::Error;
use crate::models::{Account, Role};
use crate::state::AppState;
use crate::token::Claims;

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub account: Account,
    pub claims: Claims,
}

/// A `CurrentUser` whose role is `admin`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<CurrentUser, Error> {
    let token = bearer_token(headers).ok_or_else(|| {
        log::debug!("Request without a bearer token");
        Error::unauthenticated()
    })?;

    let claims = state.tokens.verify(token).map_err(|e| {
        log::warn!("Rejected session token: {}", e);
        Error::unauthenticated()
    })?;

    match state.revocations.is_revoked(&claims.jti).await {
        Ok(false) => {}
        Ok(true) => {
            log::warn!("Rejected revoked session of `{}`", claims.sub);
            return Err(Error::unauthenticated());
        }
        Err(e) => {
            log::error!("Revocation lookup failed: {}", e);
            return Err(Error::unauthenticated());
        }
    }

    let account = match state.store.account_by_username(&claims.sub).await {
        Ok(Some(account)) if account.enabled => account,
        Ok(_) => {
            log::warn!("Session of `{}` belongs to a missing or disabled account", claims.sub);
            return Err(Error::unauthenticated());
        }
        Err(e) => {
            log::error!("Account lookup failed: {}", e);
            return Err(Error::unauthenticated());
        }
    };

    log::debug!("Authenticated `{}`", account.username);
    Ok(CurrentUser { account, claims })
}

fn app_state(parts: &Parts) -> Result<&AppState, Error> {
    parts
        .extensions
        .get::<AppState>()
        .ok_or_else(|| Error::internal("ConfigError", "AppState extension is missing"))
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = app_state(parts)?.clone();
        resolve(&state, &parts.headers).await
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if user.account.role != Role::Admin {
            log::warn!("`{}` tried to use an admin endpoint", user.account.username);
            return Err(Error::forbidden("Permission denied"));
        }
        Ok(AdminUser(user))
    }
}
