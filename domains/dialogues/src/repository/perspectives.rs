//! Perspective repository

use accord_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::Perspective;
use crate::store::PerspectiveStore;

#[derive(Clone)]
pub struct PerspectiveRepository {
    pool: PgPool,
}

impl PerspectiveRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PerspectiveStore for PerspectiveRepository {
    async fn insert(&self, perspective: &Perspective) -> Result<Perspective> {
        let created = sqlx::query_as::<_, Perspective>(
            r#"
            INSERT INTO perspectives (
                id, conversation_id, user_id, content,
                submitted, submitted_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, conversation_id, user_id, content,
                      submitted, submitted_at, updated_at
            "#,
        )
        .bind(perspective.id)
        .bind(perspective.conversation_id)
        .bind(perspective.user_id)
        .bind(&perspective.content)
        .bind(perspective.submitted)
        .bind(perspective.submitted_at)
        .bind(perspective.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Perspective>> {
        let perspectives = sqlx::query_as::<_, Perspective>(
            r#"
            SELECT id, conversation_id, user_id, content,
                   submitted, submitted_at, updated_at
            FROM perspectives
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(perspectives)
    }

    async fn find_for_user(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Perspective>> {
        let perspective = sqlx::query_as::<_, Perspective>(
            r#"
            SELECT id, conversation_id, user_id, content,
                   submitted, submitted_at, updated_at
            FROM perspectives
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(perspective)
    }

    async fn save_content(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Option<Perspective>> {
        // Submitted perspectives are immutable
        let updated = sqlx::query_as::<_, Perspective>(
            r#"
            UPDATE perspectives SET
                content = $3,
                updated_at = NOW()
            WHERE conversation_id = $1 AND user_id = $2 AND submitted = FALSE
            RETURNING id, conversation_id, user_id, content,
                      submitted, submitted_at, updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn submit(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Perspective>> {
        let submitted = sqlx::query_as::<_, Perspective>(
            r#"
            UPDATE perspectives SET
                submitted = TRUE,
                submitted_at = NOW(),
                updated_at = NOW()
            WHERE conversation_id = $1 AND user_id = $2
              AND submitted = FALSE AND content IS NOT NULL
            RETURNING id, conversation_id, user_id, content,
                      submitted, submitted_at, updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(submitted)
    }
}
