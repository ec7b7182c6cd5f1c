//! Persistence boundary. Each method is one atomic unit of work: the
//! multi-row ones (binding creation, sync, unbind) run inside a single
//! transaction so a failure never leaves half of them applied.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub(crate) const MSG_BINDING_CHANGED: &str =
    "The academic-affairs binding changed during sync, please retry";

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::err::Error;
use crate::models::{
    Account, Binding, LocalProfile, MirroredProfile, NewAccount, ProfileUpdate, TestRecord,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Duplicate username or email comes back as `Error::Validation`.
    async fn create_account(&self, account: NewAccount) -> Result<Account, Error>;
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, Error>;
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, Error>;
    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str) -> Result<(), Error>;
    async fn set_enabled(&self, account_id: Uuid, enabled: bool) -> Result<(), Error>;

    async fn profile(&self, account_id: Uuid) -> Result<Option<LocalProfile>, Error>;
    /// Applies the account and profile parts of `update` together. An email
    /// held by another account comes back as `Error::Validation` and nothing
    /// is written.
    async fn update_profile(&self, account_id: Uuid, update: ProfileUpdate) -> Result<(), Error>;

    async fn test_records(
        &self,
        account_id: Uuid,
        test_name: Option<&str>,
    ) -> Result<Vec<TestRecord>, Error>;
    async fn add_test_record(
        &self,
        account_id: Uuid,
        test_name: String,
        result: String,
        details: Option<String>,
    ) -> Result<TestRecord, Error>;

    async fn binding(&self, account_id: Uuid) -> Result<Option<Binding>, Error>;
    async fn binding_by_student_id(&self, student_id: &str) -> Result<Option<Binding>, Error>;
    /// Inserts the binding and its first snapshot together. A concurrent
    /// bind that wins the race surfaces as `ALREADY_BOUND` or
    /// `STUDENT_ID_TAKEN`.
    async fn create_binding(&self, binding: Binding, snapshot: MirroredProfile)
        -> Result<(), Error>;
    /// Appends a snapshot and bumps the sync metadata together. The snapshot
    /// is only recorded while the binding still points at
    /// `snapshot.student_id`; a binding replaced in the meantime is reported
    /// as `Error::NotFound` and left untouched.
    async fn record_sync(
        &self,
        account_id: Uuid,
        snapshot: MirroredProfile,
        synced_at: DateTime<Utc>,
    ) -> Result<Binding, Error>;
    /// Removes the binding and every snapshot it owns. Returns whether a
    /// binding existed.
    async fn delete_binding(&self, account_id: Uuid) -> Result<bool, Error>;
    async fn latest_snapshot(&self, account_id: Uuid) -> Result<Option<MirroredProfile>, Error>;
}
