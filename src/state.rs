use std::sync::Arc;

use anyhow::Context;

use crate::auth::AuthService;
use crate::binding::BindingService;
use crate::bridge::JwxtClient;
use crate::config::Config;
use crate::revocation::{MemoryRevocationStore, RedisRevocationStore, RevocationStore};
use crate::store::{MemoryStore, PgStore, Store};
use crate::token::TokenService;
use crate::vault::Vault;

/// Everything a handler needs, shared through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenService>,
    pub revocations: Arc<dyn RevocationStore>,
    pub auth: Arc<AuthService>,
    pub bindings: Arc<BindingService>,
}

impl AppState {
    pub async fn from_config(config: &Config) -> anyhow::Result<AppState> {
        let store: Arc<dyn Store> = if config.uses_memory_store() {
            log::warn!("Using the in-process store, data is lost on restart");
            Arc::new(MemoryStore::new())
        } else {
            let store = PgStore::connect(&config.database_url, config.db_max_connections)
                .await
                .context("could not connect to the database")?;
            store.migrate().await.context("could not run migrations")?;
            Arc::new(store)
        };

        let revocations: Arc<dyn RevocationStore> = match &config.redis_host {
            Some(host) => Arc::new(
                RedisRevocationStore::connect(host, config.redis_port)
                    .await
                    .context("could not connect to redis")?,
            ),
            None => {
                log::warn!("REDIS_HOST is not set, revoked sessions are tracked in process only");
                Arc::new(MemoryRevocationStore::new())
            }
        };

        let vault = Vault::new(&config.jwxt_encryption_key)
            .context("could not initialise the credential vault")?;
        let bridge = JwxtClient::new(
            config.jwxt_base_url.clone(),
            std::time::Duration::from_secs(config.jwxt_api_timeout),
        )
        .context("could not build the academic-affairs client")?;
        let tokens = TokenService::new(
            &config.secret_key,
            &config.algorithm,
            chrono::Duration::minutes(config.expire_minutes),
        )?;
        let auth = AuthService::new(
            store.clone(),
            config.password_hash_rounds,
            config.allow_admin_registration,
        )?;
        let bindings = BindingService::new(
            store.clone(),
            Arc::new(vault),
            Arc::new(bridge),
            chrono::Duration::days(config.jwxt_sync_interval_days),
        );

        Ok(AppState {
            store,
            tokens: Arc::new(tokens),
            revocations,
            auth: Arc::new(auth),
            bindings: Arc::new(bindings),
        })
    }
}
