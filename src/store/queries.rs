//! Transactional operations on the store (spec §4.5 "Transactional
//! contracts").

use super::models::{Conversation, Message, Request, RequestStatus, Role};
use super::{Store, StoreError};
use chrono::Utc;

impl Store {
    pub async fn create_conversation(
        &self,
        title: Option<&str>,
        metadata_json: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO conversations (title, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(metadata_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_conversation(id).await?.ok_or(StoreError::NotFound)
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// `maxSeq → insert → updateConversation`, all in one transaction
    /// (spec §4.5). `seq` is `max(seq|conversation)+1`.
    pub async fn append_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        request_id: Option<i64>,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let max_seq: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;
        let next_seq = max_seq.unwrap_or(0) + 1;

        let id = sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at, seq, request_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .bind(next_seq)
        .bind(request_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(message)
    }

    pub async fn list_messages(
        &self,
        conversation_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY seq ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        if let Some(limit) = limit {
            let limit = limit.max(0) as usize;
            if rows.len() > limit {
                let drop = rows.len() - limit;
                rows.drain(0..drop);
            }
        }
        Ok(rows)
    }

    /// `SELECT … WHERE conversation_id=? AND input_hash=?` then, on miss,
    /// `INSERT`; the `UNIQUE` constraint guarantees a concurrent insert
    /// that loses the race observes the winner on reselect (spec §4.5).
    pub async fn upsert_request(
        &self,
        conversation_id: i64,
        message_id: i64,
        model: &str,
        params_json: &str,
        input_hash: &str,
    ) -> Result<Request, StoreError> {
        if let Some(existing) = self.get_request_by_hash(conversation_id, input_hash).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let insert_result = sqlx::query(
            "INSERT INTO requests
                (conversation_id, message_id, model, params_json, input_hash,
                 status, tries, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'queued', 0, ?, ?)",
        )
        .bind(conversation_id)
        .bind(message_id)
        .bind(model)
        .bind(params_json)
        .bind(input_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match insert_result {
            Ok(result) => {
                let id = result.last_insert_rowid();
                self.get_request(id).await?.ok_or(StoreError::NotFound)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Lost the race: the winner's row is now visible.
                self.get_request_by_hash(conversation_id, input_hash)
                    .await?
                    .ok_or(StoreError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_request(&self, id: i64) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_request_by_hash(
        &self,
        conversation_id: i64,
        input_hash: &str,
    ) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query_as::<_, Request>(
            "SELECT * FROM requests WHERE conversation_id = ? AND input_hash = ?",
        )
        .bind(conversation_id)
        .bind(input_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_request_by_provider_response_id(
        &self,
        provider_response_id: &str,
    ) -> Result<Option<Request>, StoreError> {
        let row = sqlx::query_as::<_, Request>(
            "SELECT * FROM requests WHERE provider_response_id = ?",
        )
        .bind(provider_response_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Bumps `tries` and, on the first attempt, sets `started_at`.
    pub async fn mark_started(&self, request_id: i64) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE requests
             SET tries = tries + 1,
                 started_at = COALESCE(started_at, ?),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_in_progress(
        &self,
        request_id: i64,
        provider_response_id: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE requests
             SET status = 'in_progress', provider_response_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(provider_response_id)
        .bind(now)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_status_only(
        &self,
        request_id: i64,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query("UPDATE requests SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persists a completed result and appends the linked assistant
    /// message in a single transaction (spec invariant I4).
    pub async fn save_completion(
        &self,
        request_id: i64,
        conversation_id: i64,
        output_text: &str,
        raw_json: Option<&str>,
        usage_json: Option<&str>,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE requests
             SET status = 'completed', output_text = ?, raw_json = ?, usage_json = ?,
                 completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(output_text)
        .bind(raw_json)
        .bind(usage_json)
        .bind(now)
        .bind(now)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        let max_seq: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;
        let next_seq = max_seq.unwrap_or(0) + 1;

        let message_id = sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at, seq, request_id)
             VALUES (?, 'assistant', ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(output_text)
        .bind(now)
        .bind(next_seq)
        .bind(request_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(message)
    }

    pub async fn save_failure(
        &self,
        request_id: i64,
        status: RequestStatus,
        error_json: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE requests
             SET status = ?, error_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_json)
        .bind(now)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn append_message_assigns_dense_seq() {
        let store = Store::open_in_memory().await.unwrap();
        let conversation = store.create_conversation(None, None).await.unwrap();

        let m1 = store
            .append_message(conversation.id, Role::User, "hi", None)
            .await
            .unwrap();
        let m2 = store
            .append_message(conversation.id, Role::Assistant, "hello", None)
            .await
            .unwrap();

        assert_eq!(m1.seq, 1);
        assert_eq!(m2.seq, 2);
    }

    #[tokio::test]
    async fn upsert_request_dedups_by_hash() {
        let store = Store::open_in_memory().await.unwrap();
        let conversation = store.create_conversation(None, None).await.unwrap();
        let message = store
            .append_message(conversation.id, Role::User, "hi", None)
            .await
            .unwrap();

        let r1 = store
            .upsert_request(conversation.id, message.id, "openai:gpt-5", "{}", "hash-a")
            .await
            .unwrap();
        let r2 = store
            .upsert_request(conversation.id, message.id, "openai:gpt-5", "{}", "hash-a")
            .await
            .unwrap();

        assert_eq!(r1.id, r2.id);
    }

    #[tokio::test]
    async fn save_completion_sets_invariants() {
        let store = Store::open_in_memory().await.unwrap();
        let conversation = store.create_conversation(None, None).await.unwrap();
        let message = store
            .append_message(conversation.id, Role::User, "hi", None)
            .await
            .unwrap();
        let request = store
            .upsert_request(conversation.id, message.id, "openai:gpt-5", "{}", "hash-b")
            .await
            .unwrap();

        let assistant_message = store
            .save_completion(request.id, conversation.id, "the answer", None, None)
            .await
            .unwrap();

        let reloaded = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status(), RequestStatus::Completed);
        assert!(reloaded.output_text.is_some());
        assert!(reloaded.completed_at.is_some());
        assert_eq!(assistant_message.request_id, Some(request.id));
    }
}
