//! Conversation repository
//!
//! `update_guarded` is the workflow's compare-and-set: the predicate
//! becomes extra WHERE conditions on a single-row UPDATE, so a stale
//! writer matches zero rows and gets `None` back.

use accord_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::Conversation;
use crate::store::{ConversationPatch, ConversationStore, StatusPredicate};

const CONVERSATION_COLUMNS: &str = r#"id, couple_id, created_by, category, track, status,
           visibility, synthesis, accepted_by_creator, accepted_by_partner,
           rejection_feedback, resolution_notes, created_at, resolved_at,
           updated_at"#;

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationStore for ConversationRepository {
    async fn insert(&self, conversation: &Conversation) -> Result<Conversation> {
        let created = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            INSERT INTO conversations (
                id, couple_id, created_by, category, track, status,
                visibility, synthesis, accepted_by_creator, accepted_by_partner,
                rejection_feedback, resolution_notes, created_at, resolved_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {CONVERSATION_COLUMNS}
            "#,
        ))
        .bind(conversation.id)
        .bind(conversation.couple_id)
        .bind(conversation.created_by)
        .bind(&conversation.category)
        .bind(conversation.track)
        .bind(conversation.status)
        .bind(conversation.visibility)
        .bind(&conversation.synthesis)
        .bind(conversation.accepted_by_creator)
        .bind(conversation.accepted_by_partner)
        .bind(&conversation.rejection_feedback)
        .bind(&conversation.resolution_notes)
        .bind(conversation.created_at)
        .bind(conversation.resolved_at)
        .bind(conversation.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conv = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conv)
    }

    async fn list_by_couple(&self, couple_id: Uuid) -> Result<Vec<Conversation>> {
        let convs = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE couple_id = $1
            ORDER BY created_at DESC
            "#,
        ))
        .bind(couple_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(convs)
    }

    async fn update_guarded(
        &self,
        id: Uuid,
        predicate: StatusPredicate,
        patch: ConversationPatch,
    ) -> Result<Option<Conversation>> {
        let status_filter = !predicate.status_in.is_empty();
        let statuses: Vec<String> = predicate
            .status_in
            .iter()
            .map(|s| s.to_string())
            .collect();
        let guard_role = predicate.not_yet_accepted_by.map(|r| r.to_string());

        let set_synthesis = patch.synthesis.is_some();
        let synthesis_value = patch.synthesis.flatten();
        let append = patch.append_synthesis.is_some();
        let append_value = patch.append_synthesis.unwrap_or_default();
        let set_feedback = patch.rejection_feedback.is_some();
        let feedback_value = patch.rejection_feedback.flatten();
        let accept_role = patch.set_accepted.map(|r| r.to_string());

        // Acceptance flags: reset applies before set, both in one pass
        let updated = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            UPDATE conversations SET
                status = COALESCE($7, status),
                visibility = COALESCE($8, visibility),
                couple_id = COALESCE($9, couple_id),
                synthesis = CASE
                    WHEN $10 THEN $11
                    WHEN $12 THEN COALESCE(synthesis, '') || $13
                    ELSE synthesis
                END,
                accepted_by_creator = (accepted_by_creator AND NOT $14)
                    OR COALESCE($15 = 'creator', FALSE),
                accepted_by_partner = (accepted_by_partner AND NOT $14)
                    OR COALESCE($15 = 'partner', FALSE),
                rejection_feedback = CASE WHEN $16 THEN $17 ELSE rejection_feedback END,
                resolution_notes = COALESCE($18, resolution_notes),
                resolved_at = COALESCE($19, resolved_at),
                updated_at = NOW()
            WHERE id = $1
              AND (NOT $2 OR status = ANY($3))
              AND (NOT $4 OR synthesis IS NOT NULL)
              AND (NOT $5 OR rejection_feedback IS NULL)
              AND COALESCE(NOT (
                      ($6 = 'creator' AND accepted_by_creator)
                      OR ($6 = 'partner' AND accepted_by_partner)
                  ), TRUE)
            RETURNING {CONVERSATION_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(status_filter)
        .bind(statuses)
        .bind(predicate.requires_synthesis)
        .bind(predicate.requires_no_feedback)
        .bind(guard_role)
        .bind(patch.status)
        .bind(patch.visibility)
        .bind(patch.couple_id)
        .bind(set_synthesis)
        .bind(synthesis_value)
        .bind(append)
        .bind(append_value)
        .bind(patch.reset_acceptance)
        .bind(accept_role)
        .bind(set_feedback)
        .bind(feedback_value)
        .bind(patch.resolution_notes)
        .bind(patch.resolved_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }
}
