//! SMTP account service
//!
//! Sender identities: connectivity is verified before an account is
//! persisted, and the password is stored only in encrypted form.

use cadence_common::config::SendingConfig;
use cadence_common::types::{EmailAddress, SmtpAccountId, UserId};
use cadence_common::{Error, Result};
use cadence_storage::db::DatabasePool;
use cadence_storage::models::{CreateSmtpAccount, SmtpAccount};
use cadence_storage::repository::SmtpAccountRepository;
use tracing::info;

use crate::crypto::SecretCipher;
use crate::smtp::{self, TransportSpec};

const MIN_DELAY_SECS: i32 = 10;

/// Create command, carrying the plaintext password transiently
#[derive(Clone)]
pub struct CreateSmtpAccountCommand {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub from_name: String,
    pub from_email: String,
    pub daily_limit: Option<i32>,
    pub min_delay_secs: Option<i32>,
    pub max_delay_secs: Option<i32>,
}

impl std::fmt::Debug for CreateSmtpAccountCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateSmtpAccountCommand")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from_email", &self.from_email)
            .finish_non_exhaustive()
    }
}

/// SMTP account service
pub struct SmtpAccountService {
    accounts: SmtpAccountRepository,
    cipher: SecretCipher,
    defaults: SendingConfig,
}

impl SmtpAccountService {
    pub fn new(db_pool: &DatabasePool, cipher: SecretCipher, defaults: SendingConfig) -> Self {
        Self {
            accounts: SmtpAccountRepository::new(db_pool.pool().clone()),
            cipher,
            defaults,
        }
    }

    /// Create an account: validates the fields, verifies the transport
    /// actually connects, then persists with the password encrypted.
    pub async fn create(
        &self,
        user_id: UserId,
        cmd: CreateSmtpAccountCommand,
    ) -> Result<SmtpAccount> {
        if cmd.name.trim().is_empty() {
            return Err(Error::Validation("Account name is required".to_string()));
        }
        if cmd.host.trim().is_empty() {
            return Err(Error::Validation("SMTP host is required".to_string()));
        }
        if EmailAddress::parse(&cmd.from_email).is_none() {
            return Err(Error::Validation("Invalid from email".to_string()));
        }

        let daily_limit = cmd.daily_limit.unwrap_or(self.defaults.default_daily_limit);
        if daily_limit <= 0 {
            return Err(Error::Validation(
                "Daily limit must be positive".to_string(),
            ));
        }

        let min_delay = cmd
            .min_delay_secs
            .unwrap_or(self.defaults.min_delay_between_emails as i32);
        let max_delay = cmd
            .max_delay_secs
            .unwrap_or(self.defaults.max_delay_between_emails as i32);
        if min_delay < MIN_DELAY_SECS || max_delay < MIN_DELAY_SECS {
            return Err(Error::Validation(format!(
                "Delays must be at least {} seconds",
                MIN_DELAY_SECS
            )));
        }
        if min_delay > max_delay {
            return Err(Error::Validation(
                "Minimum delay must not exceed maximum delay".to_string(),
            ));
        }

        let spec = TransportSpec {
            account_id: uuid::Uuid::nil(),
            host: cmd.host.clone(),
            port: cmd.port,
            secure: cmd.secure,
            username: cmd.username.clone(),
            password: cmd.password.clone(),
        };
        smtp::verify_connection(&spec)
            .await
            .map_err(|e| Error::Validation(format!("SMTP verification failed: {}", e)))?;

        let password_enc = self.cipher.encrypt(&cmd.password)?;

        let account = self
            .accounts
            .create(CreateSmtpAccount {
                user_id,
                name: cmd.name,
                host: cmd.host,
                port: cmd.port as i32,
                secure: cmd.secure,
                username: cmd.username,
                password_enc,
                from_name: cmd.from_name,
                from_email: cmd.from_email,
                daily_limit,
                min_delay_secs: min_delay,
                max_delay_secs: max_delay,
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(account_id = %account.id, host = %account.host, "SMTP account created");
        Ok(account)
    }

    /// Attempt a connection with the stored credentials; bumps last-used
    /// on success.
    pub async fn test_connection(&self, user_id: UserId, id: SmtpAccountId) -> Result<()> {
        let account = self.get(user_id, id).await?;
        let password = self.cipher.decrypt(&account.password_enc)?;

        let spec = TransportSpec::from_account(&account, password);
        smtp::verify_connection(&spec).await?;

        self.accounts
            .touch_last_used(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Flip the active flag
    pub async fn toggle_active(&self, user_id: UserId, id: SmtpAccountId) -> Result<SmtpAccount> {
        // ownership check first; toggle is unconditional after that
        self.get(user_id, id).await?;

        self.accounts
            .toggle_active(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound("SMTP account not found".to_string()))
    }

    /// Get an owned account
    pub async fn get(&self, user_id: UserId, id: SmtpAccountId) -> Result<SmtpAccount> {
        self.accounts
            .get_by_user(user_id, id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound("SMTP account not found".to_string()))
    }

    /// List accounts for a user
    pub async fn list(&self, user_id: UserId) -> Result<Vec<SmtpAccount>> {
        self.accounts
            .list_by_user(user_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Delete an account. Forbidden while any non-terminal campaign
    /// references it.
    pub async fn delete(&self, user_id: UserId, id: SmtpAccountId) -> Result<()> {
        self.get(user_id, id).await?;

        let referencing = self
            .accounts
            .count_referencing_campaigns(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if referencing > 0 {
            return Err(Error::Precondition(format!(
                "Account is used by {} active campaign(s)",
                referencing
            )));
        }

        let deleted = self
            .accounts
            .delete(id, user_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !deleted {
            return Err(Error::NotFound("SMTP account not found".to_string()));
        }

        info!(account_id = %id, "SMTP account deleted");
        Ok(())
    }
}
