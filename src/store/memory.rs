use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, MSG_BINDING_CHANGED};
use crate::err::{Error, ALREADY_BOUND, STUDENT_ID_TAKEN};
use crate::models::{
    Account, Binding, LocalProfile, MirroredProfile, NewAccount, ProfileUpdate, TestRecord,
};

/// In-process store for development and tests. Every operation holds the
/// table lock for its whole duration, which gives the same all-or-nothing
/// behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    profiles: HashMap<Uuid, LocalProfile>,
    test_records: Vec<TestRecord>,
    bindings: HashMap<Uuid, Binding>,
    snapshots: Vec<MirroredProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mirrored snapshots held for `account_id`.
    pub async fn snapshot_count(&self, account_id: Uuid) -> usize {
        let tables = self.tables.read().await;
        tables
            .snapshots
            .iter()
            .filter(|s| s.account_id == account_id)
            .count()
    }
}

impl Tables {
    fn taken(&self, username: &str, email: &str, except: Option<Uuid>) -> Option<Error> {
        for account in self.accounts.values() {
            if Some(account.id) == except {
                continue;
            }
            if account.username == username {
                return Some(Error::validation("Username already registered"));
            }
            if account.email == email {
                return Some(Error::validation("Email already registered"));
            }
        }
        None
    }

    fn account_mut(&mut self, account_id: Uuid) -> Result<&mut Account, Error> {
        self.accounts
            .get_mut(&account_id)
            .ok_or_else(|| Error::not_found("User not found"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, Error> {
        let mut tables = self.tables.write().await;
        if let Some(err) = tables.taken(&account.username, &account.email, None) {
            return Err(err);
        }
        let now = Utc::now();
        let created = Account {
            id: Uuid::new_v4(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            enabled: true,
            display_name: account.display_name,
            created_at: now,
            updated_at: now,
        };
        tables.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<Account>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        let account = tables.account_mut(account_id)?;
        account.password_hash = password_hash.to_string();
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn set_enabled(&self, account_id: Uuid, enabled: bool) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        let account = tables.account_mut(account_id)?;
        account.enabled = enabled;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn profile(&self, account_id: Uuid) -> Result<Option<LocalProfile>, Error> {
        let tables = self.tables.read().await;
        Ok(tables.profiles.get(&account_id).cloned())
    }

    async fn update_profile(&self, account_id: Uuid, update: ProfileUpdate) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        tables.account_mut(account_id)?;
        if let Some(email) = &update.email {
            let clash = tables
                .accounts
                .values()
                .any(|a| a.id != account_id && &a.email == email);
            if clash {
                return Err(Error::validation("Email already registered"));
            }
        }

        let now = Utc::now();
        if update.touches_account() {
            let account = tables.account_mut(account_id)?;
            if let Some(display_name) = &update.display_name {
                account.display_name = display_name.clone();
            }
            if let Some(email) = &update.email {
                account.email = email.clone();
            }
            account.updated_at = now;
        }
        if update.touches_profile() {
            let profile = tables
                .profiles
                .entry(account_id)
                .or_insert_with(|| LocalProfile {
                    account_id,
                    college: None,
                    major: None,
                    grade: None,
                    created_at: now,
                    updated_at: now,
                });
            if update.college.is_some() {
                profile.college = update.college;
            }
            if update.major.is_some() {
                profile.major = update.major;
            }
            if update.grade.is_some() {
                profile.grade = update.grade;
            }
            profile.updated_at = now;
        }
        Ok(())
    }

    async fn test_records(
        &self,
        account_id: Uuid,
        test_name: Option<&str>,
    ) -> Result<Vec<TestRecord>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .test_records
            .iter()
            .filter(|r| r.account_id == account_id)
            .filter(|r| test_name.map_or(true, |name| r.test_name == name))
            .cloned()
            .collect())
    }

    async fn add_test_record(
        &self,
        account_id: Uuid,
        test_name: String,
        result: String,
        details: Option<String>,
    ) -> Result<TestRecord, Error> {
        let mut tables = self.tables.write().await;
        tables.account_mut(account_id)?;
        let record = TestRecord {
            id: Uuid::new_v4(),
            account_id,
            test_name,
            result,
            details,
            created_at: Utc::now(),
        };
        tables.test_records.push(record.clone());
        Ok(record)
    }

    async fn binding(&self, account_id: Uuid) -> Result<Option<Binding>, Error> {
        let tables = self.tables.read().await;
        Ok(tables.bindings.get(&account_id).cloned())
    }

    async fn binding_by_student_id(&self, student_id: &str) -> Result<Option<Binding>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .bindings
            .values()
            .find(|b| b.student_id == student_id)
            .cloned())
    }

    async fn create_binding(
        &self,
        binding: Binding,
        snapshot: MirroredProfile,
    ) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        tables.account_mut(binding.account_id)?;
        if tables.bindings.contains_key(&binding.account_id) {
            return Err(Error::validation(ALREADY_BOUND));
        }
        if tables
            .bindings
            .values()
            .any(|b| b.student_id == binding.student_id)
        {
            return Err(Error::validation(STUDENT_ID_TAKEN));
        }
        tables.bindings.insert(binding.account_id, binding);
        tables.snapshots.push(snapshot);
        Ok(())
    }

    async fn record_sync(
        &self,
        account_id: Uuid,
        snapshot: MirroredProfile,
        synced_at: DateTime<Utc>,
    ) -> Result<Binding, Error> {
        let mut tables = self.tables.write().await;
        let binding = tables
            .bindings
            .get_mut(&account_id)
            .filter(|b| b.student_id == snapshot.student_id)
            .ok_or_else(|| Error::not_found(MSG_BINDING_CHANGED))?;
        binding.last_sync_at = Some(synced_at);
        binding.sync_count += 1;
        binding.updated_at = synced_at;
        let updated = binding.clone();
        tables.snapshots.push(snapshot);
        Ok(updated)
    }

    async fn delete_binding(&self, account_id: Uuid) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        if tables.bindings.remove(&account_id).is_none() {
            return Ok(false);
        }
        tables.snapshots.retain(|s| s.account_id != account_id);
        Ok(true)
    }

    async fn latest_snapshot(&self, account_id: Uuid) -> Result<Option<MirroredProfile>, Error> {
        let tables = self.tables.read().await;
        let latest = tables
            .snapshots
            .iter()
            .filter(|s| s.account_id == account_id)
            .fold(None::<&MirroredProfile>, |best, s| match best {
                Some(b) if b.synced_at > s.synced_at => Some(b),
                _ => Some(s),
            });
        Ok(latest.cloned())
    }
}
