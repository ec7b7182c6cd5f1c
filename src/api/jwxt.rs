use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::binding::BindingInfo;
use crate::bridge::ExternalProfile;
use crate::err::Error;
use crate::guard::CurrentUser;
use crate::state::AppState;
use crate::{breaks, proceeds, Payload, RefStr};

const MAX_STUDENT_ID: usize = 20;

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    student_id: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct Outcome<T> {
    message: RefStr,
    data: T,
}

#[derive(Debug, Serialize)]
pub struct Unbound {
    message: RefStr,
}

/// Remote-side failures go back as a `200` business answer, anything else
/// keeps its own status.
fn answer<T: Serialize>(result: Result<T, Error>, message: RefStr) -> Payload<Outcome<T>> {
    match result {
        Ok(data) => proceeds(Outcome { message, data }),
        Err(err @ Error::ExternalService { .. }) => breaks(err),
        Err(err) => Err(err),
    }
}

pub async fn bind(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
    body: Result<Json<BindRequest>, JsonRejection>,
) -> Payload<Outcome<ExternalProfile>> {
    let Json(body) = body?;
    let student_id = body.student_id.trim();
    if student_id.is_empty() || student_id.chars().count() > MAX_STUDENT_ID {
        return Err(Error::validation(format!(
            "`student_id` must be between 1 and {} characters",
            MAX_STUDENT_ID
        )));
    }
    if body.password.is_empty() {
        return Err(Error::validation("`password` parameter was empty"));
    }

    let result = state
        .bindings
        .bind(&user.account, student_id, &body.password)
        .await;
    answer(result, "Academic-affairs account bound")
}

pub async fn sync(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
) -> Payload<Outcome<ExternalProfile>> {
    answer(
        state.bindings.sync(&user.account).await,
        "Academic-affairs profile synced",
    )
}

pub async fn info(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
) -> Payload<Outcome<BindingInfo>> {
    answer(state.bindings.info(&user.account).await, "Success")
}

pub async fn unbind(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
) -> Payload<Unbound> {
    state.bindings.unbind(&user.account).await?;
    proceeds(Unbound {
        message: "Academic-affairs account unbound",
    })
}
