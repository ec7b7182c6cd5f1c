use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::guard::AdminUser;
use crate::state::AppState;
use crate::{proceeds, Payload};

#[derive(Debug, Deserialize)]
pub struct SetStatus {
    enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct Status {
    username: String,
    enabled: bool,
}

/// Disabling an account locks out its live sessions too, the guard checks
/// the flag on every request.
pub async fn set_status(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Path(username): Path<String>,
    body: Result<Json<SetStatus>, JsonRejection>,
) -> Payload<Status> {
    let Json(body) = body?;
    let account = state
        .store
        .account_by_username(&username)
        .await?
        .ok_or_else(|| Error::not_found(format!("No user named `{}`", username)))?;
    if account.id == admin.account.id && !body.enabled {
        return Err(Error::validation("Admins cannot disable their own account"));
    }

    state.store.set_enabled(account.id, body.enabled).await?;
    log::info!(
        "`{}` set `{}` enabled={}",
        admin.account.username,
        account.username,
        body.enabled
    );
    proceeds(Status {
        username: account.username,
        enabled: body.enabled,
    })
}
