//! Agreement repository

use accord_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{Agreement, AgreementStatus};
use crate::store::AgreementStore;

#[derive(Clone)]
pub struct AgreementRepository {
    pool: PgPool,
}

impl AgreementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgreementStore for AgreementRepository {
    async fn insert(&self, agreement: &Agreement) -> Result<Agreement> {
        let created = sqlx::query_as::<_, Agreement>(
            r#"
            INSERT INTO agreements (
                id, conversation_id, kind, proposed_by, title,
                description, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, conversation_id, kind, proposed_by, title,
                      description, status, created_at, updated_at
            "#,
        )
        .bind(agreement.id)
        .bind(agreement.conversation_id)
        .bind(agreement.kind)
        .bind(agreement.proposed_by)
        .bind(&agreement.title)
        .bind(&agreement.description)
        .bind(agreement.status)
        .bind(agreement.created_at)
        .bind(agreement.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Agreement>> {
        let agreement = sqlx::query_as::<_, Agreement>(
            r#"
            SELECT id, conversation_id, kind, proposed_by, title,
                   description, status, created_at, updated_at
            FROM agreements
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(agreement)
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Agreement>> {
        let agreements = sqlx::query_as::<_, Agreement>(
            r#"
            SELECT id, conversation_id, kind, proposed_by, title,
                   description, status, created_at, updated_at
            FROM agreements
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(agreements)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: AgreementStatus,
        to: AgreementStatus,
    ) -> Result<Option<Agreement>> {
        // Stale expectation matches zero rows
        let updated = sqlx::query_as::<_, Agreement>(
            r#"
            UPDATE agreements SET
                status = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, conversation_id, kind, proposed_by, title,
                      description, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }
}
