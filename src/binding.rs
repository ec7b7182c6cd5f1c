use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::bridge::{AcademicAffairs, ExternalProfile};
use crate::err::{Error, ALREADY_BOUND, STUDENT_ID_TAKEN};
use crate::models::{Account, Binding, MirroredProfile};
use crate::store::Store;
use crate::vault::Vault;

const MSG_NOT_BOUND: &str = "No academic-affairs account is bound, please bind one first";
const MSG_REBIND: &str = "Stored password could not be decrypted, please re-bind the account";

#[derive(Debug, Clone, Serialize)]
pub struct BindingInfo {
    pub student_id: String,
    pub student_name: Option<String>,
    pub college: Option<String>,
    pub major: Option<String>,
    pub class_name: Option<String>,
    pub grade: Option<String>,
    pub sync_time: Option<DateTime<Utc>>,
    pub sync_count: i32,
    pub should_sync: bool,
}

/// Links an account to one academic-affairs identity and keeps a mirrored
/// copy of its profile: `Unbound -> Bound -> Unbound`.
pub struct BindingService {
    store: Arc<dyn Store>,
    vault: Arc<Vault>,
    bridge: Arc<dyn AcademicAffairs>,
    sync_interval: Duration,
}

impl BindingService {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<Vault>,
        bridge: Arc<dyn AcademicAffairs>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            store,
            vault,
            bridge,
            sync_interval,
        }
    }

    pub async fn bind(
        &self,
        account: &Account,
        student_id: &str,
        password: &str,
    ) -> Result<ExternalProfile, Error> {
        if self.store.binding(account.id).await?.is_some() {
            return Err(Error::validation(ALREADY_BOUND));
        }
        if self.store.binding_by_student_id(student_id).await?.is_some() {
            return Err(Error::validation(STUDENT_ID_TAKEN));
        }

        let profile = self.fetch(student_id, password).await?;
        let encrypted_password = self.vault.encrypt(password).map_err(|e| {
            Error::internal("VaultError", format!("could not encrypt password: {}", e))
        })?;

        let now = Utc::now();
        let binding = Binding {
            account_id: account.id,
            student_id: student_id.to_string(),
            encrypted_password,
            last_sync_at: Some(now),
            sync_count: 1,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_binding(binding, snapshot(account, student_id, &profile, now))
            .await?;

        log::info!(
            "User {} bound academic-affairs account {}",
            account.username,
            student_id
        );
        Ok(profile)
    }

    /// The stored password is re-verified on every sync, so a password
    /// changed on the remote side is noticed here.
    pub async fn sync(&self, account: &Account) -> Result<ExternalProfile, Error> {
        let binding = self
            .store
            .binding(account.id)
            .await?
            .ok_or_else(|| Error::not_found(MSG_NOT_BOUND))?;

        let password = self.vault.decrypt(&binding.encrypted_password).map_err(|e| {
            log::error!("Failed to decrypt password of {}: {}", account.username, e);
            Error::external(MSG_REBIND)
        })?;

        let profile = self.fetch(&binding.student_id, &password).await?;
        let now = Utc::now();
        let updated = self
            .store
            .record_sync(
                account.id,
                snapshot(account, &binding.student_id, &profile, now),
                now,
            )
            .await?;

        log::info!(
            "User {} synced academic-affairs account {} (sync #{})",
            account.username,
            updated.student_id,
            updated.sync_count
        );
        Ok(profile)
    }

    pub async fn unbind(&self, account: &Account) -> Result<(), Error> {
        if !self.store.delete_binding(account.id).await? {
            return Err(Error::not_found(MSG_NOT_BOUND));
        }
        log::info!("User {} unbound academic-affairs account", account.username);
        Ok(())
    }

    pub async fn info(&self, account: &Account) -> Result<BindingInfo, Error> {
        let binding = self
            .store
            .binding(account.id)
            .await?
            .ok_or_else(|| Error::not_found(MSG_NOT_BOUND))?;
        let latest = self.store.latest_snapshot(account.id).await?.ok_or_else(|| {
            log::warn!("No mirrored profile found for {}", account.username);
            Error::not_found("No synced academic-affairs profile found, please sync first")
        })?;

        Ok(BindingInfo {
            should_sync: self.is_stale(binding.last_sync_at, Utc::now()),
            student_id: binding.student_id,
            student_name: latest.student_name,
            college: latest.college,
            major: latest.major,
            class_name: latest.class_name,
            grade: latest.grade,
            sync_time: binding.last_sync_at,
            sync_count: binding.sync_count,
        })
    }

    fn is_stale(&self, last_sync_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_sync_at {
            Some(at) => now - at >= self.sync_interval,
            None => true,
        }
    }

    async fn fetch(&self, student_id: &str, password: &str) -> Result<ExternalProfile, Error> {
        let outcome = self.bridge.validate_and_fetch(student_id, password).await;
        match outcome.data {
            Some(profile) if outcome.success => Ok(profile),
            _ => {
                log::warn!(
                    "Academic-affairs verification failed for {}: {}",
                    student_id,
                    outcome.message
                );
                Err(Error::external(format!(
                    "Academic-affairs verification failed: {}",
                    outcome.message
                )))
            }
        }
    }
}

fn snapshot(
    account: &Account,
    student_id: &str,
    profile: &ExternalProfile,
    synced_at: DateTime<Utc>,
) -> MirroredProfile {
    MirroredProfile {
        account_id: account.id,
        student_id: student_id.to_string(),
        student_name: profile.name.clone(),
        college: profile.college.clone(),
        major: profile.major.clone(),
        class_name: profile.class_name.clone(),
        grade: profile.grade.clone(),
        raw_data: profile.raw.clone(),
        synced_at,
    }
}
