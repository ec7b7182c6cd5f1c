//! Denylist of session ids that were invalidated before their natural expiry.
//!
//! Entries carry a TTL equal to the remaining lifetime of the token they
//! revoke, so the set never outgrows the population of live tokens.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;

use crate::err::Error;
use crate::token::Claims;

const KEY_PREFIX: &str = "token_blacklist:";

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// A `ttl_seconds <= 0` means the token is already dead; nothing is stored.
    async fn revoke(&self, session_id: &str, ttl_seconds: i64) -> Result<(), Error>;

    /// Absent keys read as "not revoked".
    async fn is_revoked(&self, session_id: &str) -> Result<bool, Error>;
}

/// Revokes the session described by `claims` for whatever lifetime it has left.
pub async fn revoke_session(
    store: &dyn RevocationStore,
    claims: &Claims,
    now: i64,
) -> Result<(), Error> {
    let ttl = claims.remaining(now);
    if ttl > 0 {
        store.revoke(&claims.jti, ttl).await?;
        log::info!(
            "Session ...{} of `{}` revoked for {}s",
            tail(&claims.jti),
            claims.sub,
            ttl
        );
    } else {
        log::info!("Session of `{}` had already expired", claims.sub);
    }
    Ok(())
}

fn tail(s: &str) -> &str {
    let cut = s.len().saturating_sub(5);
    s.get(cut..).unwrap_or(s)
}

pub struct RedisRevocationStore {
    conn: ConnectionManager,
}

impl RedisRevocationStore {
    pub async fn connect(host: &str, port: u16) -> Result<Self, Error> {
        let client = redis::Client::open(format!("redis://{}:{}/", host, port))?;
        let conn = ConnectionManager::new(client).await?;
        log::info!("Connected to revocation cache at {}:{}", host, port);
        Ok(Self { conn })
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, session_id: &str, ttl_seconds: i64) -> Result<(), Error> {
        if ttl_seconds <= 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(format!("{}{}", KEY_PREFIX, session_id))
            .arg("true")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str) -> Result<bool, Error> {
        let mut conn = self.conn.clone();
        let exists = redis::cmd("EXISTS")
            .arg(format!("{}{}", KEY_PREFIX, session_id))
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(exists == 1)
    }
}

/// Single-process denylist. Expired entries are dropped lazily on lookup and
/// swept on every write.
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: DashMap<String, Instant>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, session_id: &str, ttl_seconds: i64) -> Result<(), Error> {
        if ttl_seconds <= 0 {
            return Ok(());
        }
        let now = Instant::now();
        self.sweep(now);
        self.entries.insert(
            session_id.to_string(),
            now + Duration::from_secs(ttl_seconds as u64),
        );
        Ok(())
    }

    async fn is_revoked(&self, session_id: &str) -> Result<bool, Error> {
        let live = match self.entries.get(session_id) {
            Some(expires_at) => *expires_at > Instant::now(),
            None => return Ok(false),
        };
        if !live {
            self.entries.remove(session_id);
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_session_is_not_revoked() {
        let store = MemoryRevocationStore::new();
        assert!(!store.is_revoked("nope").await.unwrap());
    }

    #[tokio::test]
    async fn revoked_session_is_reported_immediately() {
        let store = MemoryRevocationStore::new();
        store.revoke("abc", 60).await.unwrap();
        assert!(store.is_revoked("abc").await.unwrap());
        assert!(!store.is_revoked("abd").await.unwrap());
    }

    #[tokio::test]
    async fn non_positive_ttl_is_a_no_op() {
        let store = MemoryRevocationStore::new();
        store.revoke("zero", 0).await.unwrap();
        store.revoke("negative", -30).await.unwrap();
        assert!(store.is_empty());
        assert!(!store.is_revoked("zero").await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire_with_their_ttl() {
        let store = MemoryRevocationStore::new();
        store.revoke("short", 1).await.unwrap();
        assert!(store.is_revoked("short").await.unwrap());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!store.is_revoked("short").await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn revoke_session_uses_remaining_lifetime() {
        let store = MemoryRevocationStore::new();
        let live = Claims {
            sub: "alice".into(),
            jti: "live".into(),
            iat: 0,
            exp: 1_000,
        };
        let dead = Claims {
            jti: "dead".into(),
            ..live.clone()
        };
        revoke_session(&store, &live, 900).await.unwrap();
        revoke_session(&store, &dead, 1_000).await.unwrap();
        assert!(store.is_revoked("live").await.unwrap());
        assert!(!store.is_revoked("dead").await.unwrap());
    }

    #[test]
    fn tail_keeps_last_five_chars() {
        assert_eq!(tail("abcdefgh"), "defgh");
        assert_eq!(tail("abc"), "abc");
    }
}
