use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::err::Error;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the account the session belongs to.
    pub sub: String,
    /// Session id, the key used for revocation.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Seconds of validity left at `now`, never negative.
    pub fn remaining(&self, now: i64) -> i64 {
        (self.exp - now).max(0)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "token is malformed"),
            TokenError::BadSignature => write!(f, "token signature is invalid"),
            TokenError::Expired => write!(f, "token has expired"),
        }
    }
}

impl std::error::Error for TokenError {}

pub struct TokenService {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl TokenService {
    /// Only the HMAC family is accepted, the signing secret is symmetric.
    pub fn new(secret: &str, algorithm: &str, lifetime: Duration) -> Result<Self, Error> {
        if secret.is_empty() {
            return Err(Error::internal("ConfigError", "signing secret is empty"));
        }
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| Error::internal("ConfigError", format!("unknown algorithm `{}`", algorithm)))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(Error::internal(
                "ConfigError",
                format!("{:?} is not a symmetric signing algorithm", algorithm),
            ));
        }

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<IssuedToken, Error> {
        self.issue_at(subject, ttl, Utc::now().timestamp())
    }

    pub fn issue_at(&self, subject: &str, ttl: Duration, now: i64) -> Result<IssuedToken, Error> {
        let claims = Claims {
            sub: subject.to_string(),
            jti: new_session_id(),
            iat: now,
            exp: now + ttl.num_seconds(),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| Error::internal("TokenError", "expiry out of range"))?;

        Ok(IssuedToken {
            token,
            session_id: claims.jti,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Expiry is a hard edge: a token with `exp <= now` is expired.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["sub".to_string(), "exp".to_string()]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?
            .claims;

        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

fn new_session_id() -> String {
    let bytes: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
