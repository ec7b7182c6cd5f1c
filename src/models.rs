use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub enabled: bool,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocalProfile {
    pub account_id: Uuid,
    pub college: Option<String>,
    pub major: Option<String>,
    pub grade: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields left as `None` keep their stored value. `display_name` and
/// `email` live on the account, the rest on the local profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub college: Option<String>,
    pub major: Option<String>,
    pub grade: Option<i32>,
}

impl ProfileUpdate {
    pub fn touches_account(&self) -> bool {
        self.display_name.is_some() || self.email.is_some()
    }

    pub fn touches_profile(&self) -> bool {
        self.college.is_some() || self.major.is_some() || self.grade.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_account() && !self.touches_profile()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestRecord {
    #[serde(skip_serializing)]
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub account_id: Uuid,
    pub test_name: String,
    pub result: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Binding {
    pub account_id: Uuid,
    pub student_id: String,
    #[serde(skip_serializing)]
    pub encrypted_password: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only snapshot of what the academic-affairs system reported.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MirroredProfile {
    pub account_id: Uuid,
    pub student_id: String,
    pub student_name: Option<String>,
    pub college: Option<String>,
    pub major: Option<String>,
    pub class_name: Option<String>,
    pub grade: Option<String>,
    pub raw_data: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}
