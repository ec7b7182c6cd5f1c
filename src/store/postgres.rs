use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, MSG_BINDING_CHANGED};
use crate::err::{Error, ALREADY_BOUND, STUDENT_ID_TAKEN};
use crate::models::{
    Account, Binding, LocalProfile, MirroredProfile, NewAccount, ProfileUpdate, TestRecord,
};

const ACCOUNT_COLUMNS: &str =
    "id, username, email, password_hash, role, enabled, display_name, created_at, updated_at";
const SNAPSHOT_COLUMNS: &str =
    "account_id, student_id, student_name, college, major, class_name, grade, raw_data, synced_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    enabled: bool,
    display_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = Error;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            role: row
                .role
                .parse()
                .map_err(|e: String| Error::internal("DatabaseError", e))?,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            enabled: row.enabled,
            display_name: row.display_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Name of the violated unique constraint, if that is what `err` is.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn account_conflict(err: sqlx::Error) -> Error {
    match unique_violation(&err).as_deref() {
        Some("accounts_username_key") => Error::validation("Username already registered"),
        Some("accounts_email_key") => Error::validation("Email already registered"),
        Some(_) => Error::validation("Username or email already registered"),
        None => Error::from(err),
    }
}

fn binding_conflict(err: sqlx::Error) -> Error {
    match unique_violation(&err).as_deref() {
        Some("jwxt_bindings_pkey") => Error::validation(ALREADY_BOUND),
        Some("jwxt_bindings_student_id_key") => Error::validation(STUDENT_ID_TAKEN),
        _ => Error::from(err),
    }
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::internal("MigrationError", e.to_string()))?;
        log::info!("Database migrations applied");
        Ok(())
    }

    async fn account_where(&self, column: &str, value: &str) -> Result<Option<Account>, Error> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE {} = $1 LIMIT 1",
            ACCOUNT_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, Error> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO accounts (id, username, email, password_hash, role, enabled, display_name) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(&account.display_name)
        .fetch_one(&self.pool)
        .await
        .map_err(account_conflict)?;
        Account::try_from(row)
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, Error> {
        self.account_where("username", username).await
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        self.account_where("email", email).await
    }

    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str) -> Result<(), Error> {
        let res = sqlx::query(
            "UPDATE accounts SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(account_id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() < 1 {
            return Err(Error::not_found("User not found"));
        }
        Ok(())
    }

    async fn set_enabled(&self, account_id: Uuid, enabled: bool) -> Result<(), Error> {
        let res = sqlx::query("UPDATE accounts SET enabled = $2, updated_at = now() WHERE id = $1")
            .bind(account_id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() < 1 {
            return Err(Error::not_found("User not found"));
        }
        Ok(())
    }

    async fn profile(&self, account_id: Uuid) -> Result<Option<LocalProfile>, Error> {
        let profile = sqlx::query_as::<_, LocalProfile>(
            "SELECT account_id, college, major, grade, created_at, updated_at \
             FROM user_profiles WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn update_profile(&self, account_id: Uuid, update: ProfileUpdate) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "UPDATE accounts SET display_name = COALESCE($2, display_name), \
             email = COALESCE($3, email), updated_at = now() WHERE id = $1",
        )
        .bind(account_id)
        .bind(&update.display_name)
        .bind(&update.email)
        .execute(&mut *tx)
        .await
        .map_err(account_conflict)?;
        if res.rows_affected() < 1 {
            return Err(Error::not_found("User not found"));
        }

        if update.touches_profile() {
            sqlx::query(
                "INSERT INTO user_profiles (account_id, college, major, grade) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (account_id) DO UPDATE SET \
                 college = COALESCE(EXCLUDED.college, user_profiles.college), \
                 major = COALESCE(EXCLUDED.major, user_profiles.major), \
                 grade = COALESCE(EXCLUDED.grade, user_profiles.grade), \
                 updated_at = now()",
            )
            .bind(account_id)
            .bind(update.college)
            .bind(update.major)
            .bind(update.grade)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn test_records(
        &self,
        account_id: Uuid,
        test_name: Option<&str>,
    ) -> Result<Vec<TestRecord>, Error> {
        let records = sqlx::query_as::<_, TestRecord>(
            "SELECT id, account_id, test_name, result, details, created_at FROM test_records \
             WHERE account_id = $1 AND ($2::VARCHAR IS NULL OR test_name = $2) \
             ORDER BY created_at",
        )
        .bind(account_id)
        .bind(test_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn add_test_record(
        &self,
        account_id: Uuid,
        test_name: String,
        result: String,
        details: Option<String>,
    ) -> Result<TestRecord, Error> {
        let record = sqlx::query_as::<_, TestRecord>(
            "INSERT INTO test_records (id, account_id, test_name, result, details) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, account_id, test_name, result, details, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(test_name)
        .bind(result)
        .bind(details)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn binding(&self, account_id: Uuid) -> Result<Option<Binding>, Error> {
        let binding = sqlx::query_as::<_, Binding>(
            "SELECT * FROM jwxt_bindings WHERE account_id = $1 LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(binding)
    }

    async fn binding_by_student_id(&self, student_id: &str) -> Result<Option<Binding>, Error> {
        let binding = sqlx::query_as::<_, Binding>(
            "SELECT * FROM jwxt_bindings WHERE student_id = $1 LIMIT 1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(binding)
    }

    async fn create_binding(
        &self,
        binding: Binding,
        snapshot: MirroredProfile,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO jwxt_bindings \
             (account_id, student_id, encrypted_password, last_sync_at, sync_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(binding.account_id)
        .bind(&binding.student_id)
        .bind(&binding.encrypted_password)
        .bind(binding.last_sync_at)
        .bind(binding.sync_count)
        .bind(binding.created_at)
        .bind(binding.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(binding_conflict)?;

        insert_snapshot(&mut tx, &snapshot).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_sync(
        &self,
        account_id: Uuid,
        snapshot: MirroredProfile,
        synced_at: DateTime<Utc>,
    ) -> Result<Binding, Error> {
        let mut tx = self.pool.begin().await?;

        let binding = sqlx::query_as::<_, Binding>(
            "UPDATE jwxt_bindings SET last_sync_at = $2, sync_count = sync_count + 1, updated_at = $2 \
             WHERE account_id = $1 AND student_id = $3 RETURNING *",
        )
        .bind(account_id)
        .bind(synced_at)
        .bind(&snapshot.student_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(MSG_BINDING_CHANGED))?;

        insert_snapshot(&mut tx, &snapshot).await?;

        tx.commit().await?;
        Ok(binding)
    }

    async fn delete_binding(&self, account_id: Uuid) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM jwxt_profiles WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM jwxt_bindings WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(res.rows_affected() >= 1)
    }

    async fn latest_snapshot(&self, account_id: Uuid) -> Result<Option<MirroredProfile>, Error> {
        let snapshot = sqlx::query_as::<_, MirroredProfile>(&format!(
            "SELECT {} FROM jwxt_profiles WHERE account_id = $1 \
             ORDER BY synced_at DESC, id DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }
}

async fn insert_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    snapshot: &MirroredProfile,
) -> Result<(), Error> {
    sqlx::query(&format!(
        "INSERT INTO jwxt_profiles ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        SNAPSHOT_COLUMNS
    ))
    .bind(snapshot.account_id)
    .bind(&snapshot.student_id)
    .bind(&snapshot.student_name)
    .bind(&snapshot.college)
    .bind(&snapshot.major)
    .bind(&snapshot.class_name)
    .bind(&snapshot.grade)
    .bind(&snapshot.raw_data)
    .bind(snapshot.synced_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
