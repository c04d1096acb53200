//! Message repository

use accord_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::Message;
use crate::store::MessageStore;

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageStore for MessageRepository {
    async fn insert(&self, message: &Message) -> Result<Message> {
        let created = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_type, sender_id, content,
                visible_to, sequence, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, conversation_id, sender_type, sender_id, content,
                      visible_to, sequence, created_at
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_type)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.visible_to)
        .bind(message.sequence)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, sender_type, sender_id, content,
                   visible_to, sequence, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, sequence ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn next_sequence(&self, conversation_id: Uuid) -> Result<i32> {
        let row = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(sequence) FROM messages WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.unwrap_or(0) + 1)
    }
}
