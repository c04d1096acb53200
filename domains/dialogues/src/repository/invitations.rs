//! Invitation repository

use accord_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{Invitation, InvitationStatus};
use crate::store::InvitationStore;

#[derive(Clone)]
pub struct InvitationRepository {
    pool: PgPool,
}

impl InvitationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InvitationStore for InvitationRepository {
    async fn insert_if_no_pending(&self, invitation: &Invitation) -> Result<Option<Invitation>> {
        // Guarded insert: at most one pending row per (conversation, invitee)
        let created = sqlx::query_as::<_, Invitation>(
            r#"
            INSERT INTO invitations (
                id, conversation_id, invited_user_id, detail_level,
                status, created_at, responded_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE NOT EXISTS (
                SELECT 1 FROM invitations
                WHERE conversation_id = $2
                  AND invited_user_id = $3
                  AND status = 'pending'
            )
            RETURNING id, conversation_id, invited_user_id, detail_level,
                      status, created_at, responded_at
            "#,
        )
        .bind(invitation.id)
        .bind(invitation.conversation_id)
        .bind(invitation.invited_user_id)
        .bind(invitation.detail_level)
        .bind(invitation.status)
        .bind(invitation.created_at)
        .bind(invitation.responded_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Invitation>> {
        let invitation = sqlx::query_as::<_, Invitation>(
            r#"
            SELECT id, conversation_id, invited_user_id, detail_level,
                   status, created_at, responded_at
            FROM invitations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invitation)
    }

    async fn respond(&self, id: Uuid, status: InvitationStatus) -> Result<Option<Invitation>> {
        let updated = sqlx::query_as::<_, Invitation>(
            r#"
            UPDATE invitations SET
                status = $2,
                responded_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING id, conversation_id, invited_user_id, detail_level,
                      status, created_at, responded_at
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }
}
