//! Authentication service
//!
//! Registration and login with argon2 password hashing and HS256 access
//! tokens.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use cadence_common::config::JwtConfig;
use cadence_common::types::UserId;
use cadence_common::{Error, Result};
use cadence_storage::db::DatabasePool;
use cadence_storage::models::{CreateUser, User};
use cadence_storage::repository::UserRepository;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Issued access token
#[derive(Debug, Clone, Serialize)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// JWT claims payload
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// User ID (UUID string)
    sub: String,
    /// Expiration, seconds since epoch
    exp: i64,
    /// Issued at, seconds since epoch
    iat: i64,
}

/// Authentication service
pub struct AuthService {
    users: UserRepository,
    jwt: JwtConfig,
}

impl AuthService {
    pub fn new(db_pool: &DatabasePool, jwt: JwtConfig) -> Self {
        Self {
            users: UserRepository::new(db_pool.pool().clone()),
            jwt,
        }
    }

    /// Register a new user and issue an access token
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<(User, AuthToken)> {
        let email = cadence_common::types::EmailAddress::parse(email)
            .ok_or_else(|| Error::Validation("Invalid email address".to_string()))?
            .to_string()
            .to_lowercase();

        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let password_hash = hash_password(password)?;

        let user = self
            .users
            .create(CreateUser {
                email: email.clone(),
                password_hash,
                first_name,
                last_name,
            })
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::Validation("Email is already registered".to_string())
                }
                _ => Error::Database(e.to_string()),
            })?;

        info!(user_id = %user.id, "User registered");

        let token = self.issue_token(user.id)?;
        Ok((user, token))
    }

    /// Verify credentials and issue an access token
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, AuthToken)> {
        let user = self
            .users
            .get_by_email(&email.trim().to_lowercase())
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::Auth("Invalid credentials".to_string()))?;

        if !user.active {
            return Err(Error::Auth("Account is disabled".to_string()));
        }

        if !verify_password(password, &user.password_hash) {
            return Err(Error::Auth("Invalid credentials".to_string()));
        }

        let token = self.issue_token(user.id)?;
        Ok((user, token))
    }

    /// Issue an access token for a user
    pub fn issue_token(&self, user_id: UserId) -> Result<AuthToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.jwt.expires_in_secs as i64);

        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt.secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))?;

        Ok(AuthToken { token, expires_at })
    }

    /// Validate an access token and return the user it identifies
    pub fn verify_token(&self, token: &str) -> Result<UserId> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                Error::Auth("Token expired".to_string())
            }
            _ => Error::Auth("Invalid token".to_string()),
        })?;

        Uuid::parse_str(&data.claims.sub).map_err(|_| Error::Auth("Invalid token".to_string()))
    }
}

/// Hash a password with argon2id and a fresh salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored argon2 hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .ok()
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(!verify_password("anything", "not-a-hash"));
    }
}
