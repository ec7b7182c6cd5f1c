use std::net::SocketAddr;

use clap::Parser;

use crate::bridge::DEFAULT_BASE_URL;

/// Student portal backend.
///
/// Every option can also be supplied through the environment variable named
/// next to it.
#[derive(Debug, Clone, Parser)]
#[command(name = "student-portal", version, about)]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Secret used to sign session tokens.
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Session token signing algorithm (HS256, HS384 or HS512).
    #[arg(long, env = "JWT_ALGORITHM", default_value = "HS256")]
    pub algorithm: String,

    /// Lifetime of a session token in minutes.
    #[arg(long, env = "EXPIRE_MINUTES", default_value_t = 60)]
    pub expire_minutes: i64,

    /// Key protecting stored academic-affairs passwords. Either base64 of 32
    /// bytes or any passphrase to derive a key from.
    #[arg(long, env = "JWXT_ENCRYPTION_KEY", hide_env_values = true)]
    pub jwxt_encryption_key: String,

    /// Endpoint of the academic-affairs system.
    #[arg(long, env = "JWXT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub jwxt_base_url: String,

    /// Timeout of calls to the academic-affairs system, in seconds.
    #[arg(long, env = "JWXT_API_TIMEOUT", default_value_t = 30)]
    pub jwxt_api_timeout: u64,

    /// Days after which a mirrored profile is reported as due for a sync.
    #[arg(long, env = "JWXT_SYNC_INTERVAL_DAYS", default_value_t = 90)]
    pub jwxt_sync_interval_days: i64,

    /// Postgres connection URL, or `memory://` for the in-process store.
    #[arg(long, env = "DATABASE_URL", default_value = "memory://")]
    pub database_url: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Redis host for the revocation store. Without it revocations are kept
    /// in process.
    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// PBKDF2 rounds for new password hashes.
    #[arg(long, env = "PASSWORD_HASH_ROUNDS", default_value_t = 100_000)]
    pub password_hash_rounds: u32,

    /// Let `/api/auth/register` create admin accounts.
    #[arg(long, env = "ALLOW_ADMIN_REGISTRATION")]
    pub allow_admin_registration: bool,

    /// Comma-separated origins allowed to call the API from a browser, `*`
    /// for any.
    #[arg(long, env = "CORS_ALLOW_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_allow_origins: Vec<String>,

    /// Whether browsers may send cookies and `Authorization` cross-origin.
    #[arg(
        long,
        env = "CORS_ALLOW_CREDENTIALS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub cors_allow_credentials: bool,
}

impl Config {
    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory:")
    }
}
