//! Template service
//!
//! The declared variable list is advisory and recomputed from the
//! subject and body on every write.

use cadence_common::types::{TemplateId, UserId};
use cadence_common::{Error, Result};
use cadence_storage::db::DatabasePool;
use cadence_storage::models::{CreateTemplate, Template, UpdateTemplate};
use cadence_storage::repository::TemplateRepository;
use tracing::info;

use crate::render::extract_variables;

/// Template service
pub struct TemplateService {
    templates: TemplateRepository,
}

impl TemplateService {
    pub fn new(db_pool: &DatabasePool) -> Self {
        Self {
            templates: TemplateRepository::new(db_pool.pool().clone()),
        }
    }

    /// Create a template
    pub async fn create(
        &self,
        user_id: UserId,
        name: String,
        subject: String,
        body: String,
    ) -> Result<Template> {
        if name.trim().is_empty() {
            return Err(Error::Validation("Template name is required".to_string()));
        }
        if subject.trim().is_empty() {
            return Err(Error::Validation("Subject is required".to_string()));
        }

        let variables = extract_variables(&subject, &body);

        let template = self
            .templates
            .create(CreateTemplate {
                user_id,
                name,
                subject,
                body,
                variables,
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(template_id = %template.id, "Template created");
        Ok(template)
    }

    /// Update a template, recomputing the variable set against the
    /// effective subject and body
    pub async fn update(
        &self,
        user_id: UserId,
        id: TemplateId,
        name: Option<String>,
        subject: Option<String>,
        body: Option<String>,
        active: Option<bool>,
    ) -> Result<Template> {
        let existing = self.get(user_id, id).await?;

        let effective_subject = subject.clone().unwrap_or_else(|| existing.subject.clone());
        let effective_body = body.clone().unwrap_or_else(|| existing.body.clone());
        let variables = extract_variables(&effective_subject, &effective_body);

        self.templates
            .update(
                id,
                user_id,
                UpdateTemplate {
                    name,
                    subject,
                    body,
                    variables: Some(variables),
                    active,
                },
            )
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound("Template not found".to_string()))
    }

    /// Get an owned template
    pub async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Template> {
        self.templates
            .get_by_user(user_id, id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound("Template not found".to_string()))
    }

    /// List templates for a user
    pub async fn list(&self, user_id: UserId) -> Result<Vec<Template>> {
        self.templates
            .list_by_user(user_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Delete a template
    pub async fn delete(&self, user_id: UserId, id: TemplateId) -> Result<()> {
        let deleted = self
            .templates
            .delete(id, user_id)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => Error::Precondition(
                    "Template is referenced by existing campaigns".to_string(),
                ),
                _ => Error::Database(e.to_string()),
            })?;

        if !deleted {
            return Err(Error::NotFound("Template not found".to_string()));
        }
        Ok(())
    }
}
