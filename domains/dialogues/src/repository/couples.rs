//! Couple repository

use accord_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::Couple;
use crate::store::CoupleStore;

#[derive(Clone)]
pub struct CoupleRepository {
    pool: PgPool,
}

impl CoupleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CoupleStore for CoupleRepository {
    async fn insert(&self, couple: &Couple) -> Result<Couple> {
        let created = sqlx::query_as::<_, Couple>(
            r#"
            INSERT INTO couples (
                id, creator_user_id, partner_user_id, invite_code,
                status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, creator_user_id, partner_user_id, invite_code,
                      status, created_at
            "#,
        )
        .bind(couple.id)
        .bind(couple.creator_user_id)
        .bind(couple.partner_user_id)
        .bind(&couple.invite_code)
        .bind(couple.status)
        .bind(couple.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Couple>> {
        let couple = sqlx::query_as::<_, Couple>(
            r#"
            SELECT id, creator_user_id, partner_user_id, invite_code,
                   status, created_at
            FROM couples
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(couple)
    }

    async fn find_by_member(&self, user_id: Uuid) -> Result<Option<Couple>> {
        let couple = sqlx::query_as::<_, Couple>(
            r#"
            SELECT id, creator_user_id, partner_user_id, invite_code,
                   status, created_at
            FROM couples
            WHERE creator_user_id = $1 OR partner_user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(couple)
    }

    async fn find_by_invite_code(&self, code: &str) -> Result<Option<Couple>> {
        let couple = sqlx::query_as::<_, Couple>(
            r#"
            SELECT id, creator_user_id, partner_user_id, invite_code,
                   status, created_at
            FROM couples
            WHERE invite_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(couple)
    }

    async fn link_partner(&self, id: Uuid, partner_user_id: Uuid) -> Result<Option<Couple>> {
        // Conditional on no partner: a second linker matches zero rows
        let linked = sqlx::query_as::<_, Couple>(
            r#"
            UPDATE couples SET
                partner_user_id = $2,
                status = 'active'
            WHERE id = $1 AND partner_user_id IS NULL
            RETURNING id, creator_user_id, partner_user_id, invite_code,
                      status, created_at
            "#,
        )
        .bind(id)
        .bind(partner_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(linked)
    }
}
