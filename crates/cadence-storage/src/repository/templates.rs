//! Template repository

use cadence_common::types::UserId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateTemplate, Template, UpdateTemplate};

/// Template repository
#[derive(Clone)]
pub struct TemplateRepository {
    pool: PgPool,
}

impl TemplateRepository {
    /// Create a new template repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new template
    pub async fn create(&self, input: CreateTemplate) -> Result<Template, sqlx::Error> {
        let id = Uuid::new_v4();
        let variables = serde_json::to_value(&input.variables).unwrap_or_default();

        sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (id, user_id, name, subject, body, variables)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.body)
        .bind(&variables)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a template by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Template>, sqlx::Error> {
        sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a template by ID scoped to its owner
    pub async fn get_by_user(
        &self,
        user_id: UserId,
        id: Uuid,
    ) -> Result<Option<Template>, sqlx::Error> {
        sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List templates for a user
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Template>, sqlx::Error> {
        sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Update a template
    pub async fn update(
        &self,
        id: Uuid,
        user_id: UserId,
        input: UpdateTemplate,
    ) -> Result<Option<Template>, sqlx::Error> {
        let variables = input
            .variables
            .map(|v| serde_json::to_value(v).unwrap_or_default());

        sqlx::query_as::<_, Template>(
            r#"
            UPDATE templates SET
                name = COALESCE($3, name),
                subject = COALESCE($4, subject),
                body = COALESCE($5, body),
                variables = COALESCE($6, variables),
                active = COALESCE($7, active),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.body)
        .bind(&variables)
        .bind(input.active)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete a template; refused by the foreign key while campaigns
    /// reference it
    pub async fn delete(&self, id: Uuid, user_id: UserId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
