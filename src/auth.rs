use std::sync::Arc;

use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand_core::OsRng;
use regex::Regex;
use serde::Deserialize;

use crate::err::Error;
use crate::models::{Account, NewAccount, Role};
use crate::store::Store;

const MIN_PASSWORD_LEN: usize = 6;
const OUTPUT_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub realname: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    rounds: u32,
    allow_admin_registration: bool,
    /// Verified against when the username is unknown, so both failure paths
    /// do the same amount of work.
    dummy_hash: String,
    username_re: Regex,
    email_re: Regex,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn Store>,
        rounds: u32,
        allow_admin_registration: bool,
    ) -> Result<Self, Error> {
        let mut service = Self {
            store,
            rounds,
            allow_admin_registration,
            dummy_hash: String::new(),
            username_re: Regex::new(r"^[A-Za-z0-9_]{1,32}$")
                .map_err(|e| Error::internal("RegexError", e.to_string()))?,
            email_re: Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
                .map_err(|e| Error::internal("RegexError", e.to_string()))?,
        };
        service.dummy_hash = service.hash_password("not-a-real-password")?;
        Ok(service)
    }

    pub fn hash_password(&self, plaintext: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let params = Params {
            rounds: self.rounds,
            output_length: OUTPUT_LEN,
        };
        Ok(Pbkdf2
            .hash_password_customized(plaintext.as_bytes(), None, None, params, &salt)?
            .to_string())
    }

    /// The round count is read back from the stored hash, so hashes made
    /// under an older configuration still verify.
    pub fn verify_password(&self, plaintext: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Pbkdf2.verify_password(plaintext.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                log::error!("Stored password hash is unreadable: {}", e);
                false
            }
        }
    }

    /// Unknown user and wrong password are indistinguishable to the caller.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Account, Error> {
        let account = self.store.account_by_username(username).await?;
        let hash = account
            .as_ref()
            .map(|a| a.password_hash.as_str())
            .unwrap_or(self.dummy_hash.as_str());
        let matches = self.verify_password(password, hash);

        match account {
            Some(account) if matches => Ok(account),
            _ => {
                log::warn!("Rejected credentials for `{}`", username);
                Err(Error::Authentication {
                    message: "Incorrect username or password".to_string(),
                })
            }
        }
    }

    /// Stores a new hash after re-checking the current password. Revoking the
    /// session that asked for the change is the caller's job.
    pub async fn change_password(
        &self,
        account: &Account,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        check_password(new_password)?;
        let current = self.authenticate(&account.username, old_password).await?;
        let hash = self.hash_password(new_password)?;
        self.store.set_password_hash(current.id, &hash).await?;
        log::info!("Password of `{}` changed", account.username);
        Ok(())
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<Account, Error> {
        if !self.username_re.is_match(&request.username) {
            return Err(Error::validation(
                "`username` must be 1-32 letters, digits or underscores",
            ));
        }
        if request.realname.trim().is_empty() {
            return Err(Error::validation("`realname` parameter was empty"));
        }
        self.check_email(&request.email)?;
        check_password(&request.password)?;

        let role = match request.role.as_deref() {
            None => Role::Student,
            Some(raw) => raw.parse::<Role>().map_err(Error::validation)?,
        };
        if role == Role::Admin && !self.allow_admin_registration {
            return Err(Error::forbidden("Admin accounts cannot be self-registered"));
        }

        if self.store.account_by_username(&request.username).await?.is_some() {
            return Err(Error::validation("Username already registered"));
        }
        if self.store.account_by_email(&request.email).await?.is_some() {
            return Err(Error::validation("Email already registered"));
        }

        let account = self
            .store
            .create_account(NewAccount {
                username: request.username,
                email: request.email,
                password_hash: self.hash_password(&request.password)?,
                role,
                display_name: request.realname.trim().to_string(),
            })
            .await?;
        log::info!("Registered `{}` as {}", account.username, account.role);
        Ok(account)
    }

    pub fn check_email(&self, email: &str) -> Result<(), Error> {
        if self.email_re.is_match(email) {
            Ok(())
        } else {
            Err(Error::validation("`email` is not a valid address"))
        }
    }
}

fn check_password(password: &str) -> Result<(), Error> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> AuthService {
        AuthService::new(Arc::new(MemoryStore::new()), 1_000, false).unwrap()
    }

    fn alice() -> RegisterRequest {
        RegisterRequest {
            username: "alice".into(),
            realname: "Alice".into(),
            email: "alice@x.edu".into(),
            password: "secret1".into(),
            role: None,
        }
    }

    #[test]
    fn hashes_are_salted_and_verify() {
        let auth = service();
        let a = auth.hash_password("secret1").unwrap();
        let b = auth.hash_password("secret1").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$pbkdf2-sha256$"));
        assert!(auth.verify_password("secret1", &a));
        assert!(!auth.verify_password("secret2", &a));
        assert!(!auth.verify_password("secret1", "not a phc string"));
    }

    #[tokio::test]
    async fn register_then_authenticate() {
        let auth = service();
        let account = auth.register(alice()).await.unwrap();
        assert_eq!(account.role, Role::Student);
        assert!(account.enabled);

        let found = auth.authenticate("alice", "secret1").await.unwrap();
        assert_eq!(found.id, account.id);
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_fail_alike() {
        let auth = service();
        auth.register(alice()).await.unwrap();

        let wrong = auth.authenticate("alice", "nope-nope").await.unwrap_err();
        let missing = auth.authenticate("mallory", "secret1").await.unwrap_err();
        assert_eq!(wrong.to_string(), missing.to_string());
        assert!(matches!(wrong, Error::Authentication { .. }));
    }

    #[tokio::test]
    async fn duplicates_are_validation_errors() {
        let auth = service();
        auth.register(alice()).await.unwrap();

        let same_name = RegisterRequest {
            email: "other@x.edu".into(),
            ..alice()
        };
        assert!(matches!(auth.register(same_name).await, Err(Error::Validation { .. })));

        let same_email = RegisterRequest {
            username: "alice2".into(),
            ..alice()
        };
        assert!(matches!(auth.register(same_email).await, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn malformed_registrations_are_rejected() {
        let auth = service();
        let cases = [
            RegisterRequest { username: "bad name".into(), ..alice() },
            RegisterRequest { email: "no-at-sign".into(), ..alice() },
            RegisterRequest { password: "12345".into(), ..alice() },
            RegisterRequest { realname: "  ".into(), ..alice() },
            RegisterRequest { role: Some("teacher".into()), ..alice() },
        ];
        for case in cases {
            assert!(matches!(auth.register(case).await, Err(Error::Validation { .. })));
        }
    }

    #[tokio::test]
    async fn admin_self_registration_is_gated() {
        let admin = RegisterRequest {
            role: Some("admin".into()),
            ..alice()
        };
        assert!(matches!(
            service().register(admin.clone()).await,
            Err(Error::Authorization { .. })
        ));

        let open = AuthService::new(Arc::new(MemoryStore::new()), 1_000, true).unwrap();
        assert_eq!(open.register(admin).await.unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn change_password_requires_old_password() {
        let auth = service();
        let account = auth.register(alice()).await.unwrap();

        let denied = auth.change_password(&account, "wrong-old", "secret2").await;
        assert!(matches!(denied, Err(Error::Authentication { .. })));

        auth.change_password(&account, "secret1", "secret2").await.unwrap();
        assert!(auth.authenticate("alice", "secret1").await.is_err());
        assert!(auth.authenticate("alice", "secret2").await.is_ok());
    }
}
