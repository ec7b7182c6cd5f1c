use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::{Extension, Form, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;
use crate::auth::RegisterRequest;
use crate::err::Error;
use crate::guard::CurrentUser;
use crate::revocation::revoke_session;
use crate::state::AppState;
use crate::{proceeds, Payload, RefStr};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    access_token: String,
    token_type: RefStr,
    expires_at: DateTime<Utc>,
}

pub async fn register(
    Extension(state): Extension<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Payload<Message> {
    let Json(request) = body?;
    state.auth.register(request).await?;
    proceeds(Message {
        msg: "Registration successful",
    })
}

pub async fn login(
    Extension(state): Extension<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Payload<LoginResponse> {
    let Form(form) = form?;
    let account = state.auth.authenticate(&form.username, &form.password).await?;
    if !account.enabled {
        log::warn!("Disabled account `{}` tried to log in", account.username);
        return Err(Error::forbidden("Account is disabled"));
    }

    let issued = state
        .tokens
        .issue(&account.username, state.tokens.lifetime())?;
    log::info!("`{}` logged in", account.username);
    proceeds(LoginResponse {
        access_token: issued.token,
        token_type: "bearer",
        expires_at: issued.expires_at,
    })
}

pub async fn logout(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
) -> Payload<Message> {
    revoke_session(
        state.revocations.as_ref(),
        &user.claims,
        Utc::now().timestamp(),
    )
    .await?;
    log::info!("`{}` logged out", user.account.username);
    proceeds(Message {
        msg: "Successfully logged out",
    })
}
