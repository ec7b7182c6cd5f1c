use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Message;
use crate::err::Error;
use crate::guard::CurrentUser;
use crate::models::{ProfileUpdate, TestRecord};
use crate::revocation::revoke_session;
use crate::state::AppState;
use crate::{proceeds, Payload};

const MAX_TEST_NAME: usize = 50;
const MAX_RESULT: usize = 250;
const MAX_DETAILS: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ResetPassword {
    old_password: String,
    new_password: String,
}

#[derive(Debug, Serialize)]
pub struct Profile {
    username: String,
    realname: String,
    email: String,
    college: Option<String>,
    major: Option<String>,
    grade: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SetProfile {
    realname: Option<String>,
    email: Option<String>,
    college: Option<String>,
    major: Option<String>,
    grade: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct RecordFilter {
    test_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TestRecords {
    test_records: Vec<TestRecord>,
}

#[derive(Debug, Deserialize)]
pub struct NewTestRecord {
    test_name: String,
    result: String,
    details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedRecord {
    msg: &'static str,
    test_name: String,
    created_at: DateTime<Utc>,
}

/// Only the session that asked for the change is revoked.
pub async fn reset_password(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
    body: Result<Json<ResetPassword>, JsonRejection>,
) -> Payload<Message> {
    let Json(body) = body?;
    state
        .auth
        .change_password(&user.account, &body.old_password, &body.new_password)
        .await?;
    revoke_session(
        state.revocations.as_ref(),
        &user.claims,
        Utc::now().timestamp(),
    )
    .await?;
    proceeds(Message {
        msg: "Password changed, please log in again",
    })
}

pub async fn profile(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
) -> Payload<Profile> {
    let local = state.store.profile(user.account.id).await?;
    let (college, major, grade) = match local {
        Some(p) => (p.college, p.major, p.grade),
        None => (None, None, None),
    };
    proceeds(Profile {
        username: user.account.username,
        realname: user.account.display_name,
        email: user.account.email,
        college,
        major,
        grade,
    })
}

pub async fn set_profile(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
    body: Result<Json<SetProfile>, JsonRejection>,
) -> Payload<Message> {
    let Json(body) = body?;

    let realname = match body.realname {
        Some(name) if name.trim().is_empty() => {
            return Err(Error::validation("`realname` parameter was empty"))
        }
        other => other.map(|name| name.trim().to_string()),
    };
    if let Some(email) = &body.email {
        state.auth.check_email(email)?;
    }
    let update = ProfileUpdate {
        display_name: realname,
        email: body.email,
        college: body.college,
        major: body.major,
        grade: body.grade,
    };
    if !update.is_empty() {
        state.store.update_profile(user.account.id, update).await?;
    }

    log::info!("`{}` updated their profile", user.account.username);
    proceeds(Message {
        msg: "Profile updated",
    })
}

pub async fn test_records(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
    filter: Result<Query<RecordFilter>, QueryRejection>,
) -> Payload<TestRecords> {
    let Query(filter) = filter?;
    let test_records = state
        .store
        .test_records(user.account.id, filter.test_name.as_deref())
        .await?;
    proceeds(TestRecords { test_records })
}

pub async fn add_test_record(
    Extension(state): Extension<AppState>,
    user: CurrentUser,
    body: Result<Json<NewTestRecord>, JsonRejection>,
) -> Payload<CreatedRecord> {
    let Json(body) = body?;
    check_length("test_name", &body.test_name, 1, MAX_TEST_NAME)?;
    check_length("result", &body.result, 1, MAX_RESULT)?;
    if let Some(details) = &body.details {
        check_length("details", details, 0, MAX_DETAILS)?;
    }

    let record = state
        .store
        .add_test_record(user.account.id, body.test_name, body.result, body.details)
        .await?;
    log::info!(
        "`{}` recorded a result for `{}`",
        user.account.username,
        record.test_name
    );
    proceeds(CreatedRecord {
        msg: "Test record added",
        test_name: record.test_name,
        created_at: record.created_at,
    })
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), Error> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(Error::validation(format!(
            "`{}` must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_bounds_are_inclusive() {
        assert!(check_length("result", "a", 1, 3).is_ok());
        assert!(check_length("result", "abc", 1, 3).is_ok());
        assert!(check_length("result", "", 1, 3).is_err());
        assert!(check_length("result", "abcd", 1, 3).is_err());
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        assert!(check_length("test_name", "体测", 1, 2).is_ok());
    }
}
