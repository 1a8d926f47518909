//! SMTP account repository

use cadence_common::types::UserId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateSmtpAccount, SmtpAccount};

/// SMTP account repository
#[derive(Clone)]
pub struct SmtpAccountRepository {
    pool: PgPool,
}

impl SmtpAccountRepository {
    /// Create a new SMTP account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new SMTP account
    pub async fn create(&self, input: CreateSmtpAccount) -> Result<SmtpAccount, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, SmtpAccount>(
            r#"
            INSERT INTO smtp_accounts (
                id, user_id, name, host, port, secure, username, password_enc,
                from_name, from_email, daily_limit, min_delay_secs, max_delay_secs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.host)
        .bind(input.port)
        .bind(input.secure)
        .bind(&input.username)
        .bind(&input.password_enc)
        .bind(&input.from_name)
        .bind(&input.from_email)
        .bind(input.daily_limit)
        .bind(input.min_delay_secs)
        .bind(input.max_delay_secs)
        .fetch_one(&self.pool)
        .await
    }

    /// Get an account by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<SmtpAccount>, sqlx::Error> {
        sqlx::query_as::<_, SmtpAccount>("SELECT * FROM smtp_accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get an account by ID scoped to its owner
    pub async fn get_by_user(
        &self,
        user_id: UserId,
        id: Uuid,
    ) -> Result<Option<SmtpAccount>, sqlx::Error> {
        sqlx::query_as::<_, SmtpAccount>(
            "SELECT * FROM smtp_accounts WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// List accounts for a user
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<SmtpAccount>, sqlx::Error> {
        sqlx::query_as::<_, SmtpAccount>(
            "SELECT * FROM smtp_accounts WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Resolve the active accounts attached to a campaign, in their
    /// round-robin position order
    pub async fn list_active_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<SmtpAccount>, sqlx::Error> {
        sqlx::query_as::<_, SmtpAccount>(
            r#"
            SELECT a.* FROM smtp_accounts a
            JOIN campaign_smtp_accounts ca ON ca.smtp_account_id = a.id
            WHERE ca.campaign_id = $1 AND a.active = TRUE
            ORDER BY ca.position ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Count owned, active accounts among the given ids
    pub async fn count_active_owned(
        &self,
        user_id: UserId,
        ids: &[Uuid],
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM smtp_accounts
            WHERE user_id = $1 AND active = TRUE AND id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Flip the active flag
    pub async fn toggle_active(&self, id: Uuid) -> Result<Option<SmtpAccount>, sqlx::Error> {
        sqlx::query_as::<_, SmtpAccount>(
            r#"
            UPDATE smtp_accounts SET active = NOT active, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Record a successful use of the account
    pub async fn touch_last_used(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE smtp_accounts SET last_used_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count non-terminal campaigns referencing the account.
    ///
    /// Deletion is forbidden while this is non-zero.
    pub async fn count_referencing_campaigns(&self, id: Uuid) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM campaigns c
            JOIN campaign_smtp_accounts ca ON ca.campaign_id = c.id
            WHERE ca.smtp_account_id = $1
              AND c.status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Delete an account (daily quotas and email logs cascade)
    pub async fn delete(&self, id: Uuid, user_id: UserId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM smtp_accounts WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
