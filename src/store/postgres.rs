//! Postgres-backed `Store`. Schema is provisioned lazily on first use, the
//! way `conversational.rs::ensure_schema_if_needed` does it, gated by a
//! `tokio::sync::OnceCell` rather than a migration tool.

use super::Store;
use crate::clock::{Clock, SystemClock};
use crate::domain::{
    Agent, ArtifactData, Conversation, Knowledge, KnowledgeExtraction, Message, Summary,
    SummaryExclusion, User,
};
use crate::error::MemoryError;
use crate::filter::{Filter, Op};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub struct PostgresStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
    clock: Arc<dyn Clock>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
            clock,
        }
    }

    /// Connect lazily to `database_url`, falling back to `None` on failure so
    /// the caller can drop back to an in-memory store. Mirrors
    /// `conversational.rs::build_backend`'s graceful-fallback behavior.
    pub async fn connect(database_url: &str) -> Option<Self> {
        match PgPoolOptions::new().max_connections(5).connect_lazy(database_url) {
            Ok(pool) => {
                info!("memory store backend: postgres");
                Some(Self::new(pool))
            }
            Err(error) => {
                warn!(
                    "failed to initialize postgres store, falling back to in-memory: {}",
                    error
                );
                None
            }
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agents (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        identity TEXT NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS users (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL,
                        updated_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS messages (
                        id TEXT PRIMARY KEY,
                        conversation TEXT NOT NULL,
                        user_id TEXT NOT NULL,
                        agent TEXT NOT NULL,
                        from_name TEXT NOT NULL,
                        content TEXT NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
                        ON messages (conversation, created_at);
                    CREATE INDEX IF NOT EXISTS idx_messages_agent_user_created
                        ON messages (agent, user_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS artifacts (
                        id TEXT PRIMARY KEY,
                        message_id TEXT NOT NULL REFERENCES messages (id) ON DELETE CASCADE,
                        kind TEXT NOT NULL,
                        data BYTEA NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_artifacts_message ON artifacts (message_id);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS summaries (
                        id TEXT PRIMARY KEY,
                        conversation TEXT NOT NULL UNIQUE,
                        agent TEXT NOT NULL,
                        user_id TEXT NOT NULL,
                        keywords TEXT NOT NULL,
                        summary TEXT NOT NULL,
                        conversation_started_at TIMESTAMPTZ NOT NULL,
                        updated_at TIMESTAMPTZ NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_summaries_agent_user_started
                        ON summaries (agent, user_id, conversation_started_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS summary_exclusions (
                        conversation TEXT PRIMARY KEY,
                        created_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS knowledge (
                        id TEXT PRIMARY KEY,
                        agent TEXT NOT NULL,
                        user_id TEXT NOT NULL,
                        subject TEXT NOT NULL,
                        predicate TEXT NOT NULL,
                        object TEXT NOT NULL,
                        source TEXT NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL,
                        expires_at TIMESTAMPTZ NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_knowledge_agent_user ON knowledge (agent, user_id);
                    CREATE INDEX IF NOT EXISTS idx_knowledge_expires_at ON knowledge (expires_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS knowledge_extractions (
                        conversation TEXT PRIMARY KEY,
                        updated_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    /// Attaches the persisted artifacts for each message, ordered by
    /// creation time. One query per message; the Store's own tests and the
    /// in-memory backend share this same per-message hydration shape.
    async fn hydrate_messages(&self, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        for message in &mut messages {
            let rows = sqlx::query("SELECT * FROM artifacts WHERE message_id = $1 ORDER BY created_at ASC")
                .bind(&message.id)
                .fetch_all(&self.pool)
                .await
                .map_err(MemoryError::Database)?;
            message.artifacts = rows.iter().map(row_to_artifact).collect::<Result<Vec<_>>>()?;
        }
        Ok(messages)
    }
}

fn op_sql(op: Op) -> Result<&'static str> {
    match op {
        Op::Eq => Ok("="),
        Op::Neq => Ok("!="),
        Op::Gt => Ok(">"),
        Op::Lt => Ok("<"),
        Op::Gte => Ok(">="),
        Op::Lte => Ok("<="),
        Op::In => Ok("IN"),
    }
}

/// The Filter DSL speaks domain attribute names (`user`, `agent`, ...); the
/// schema renames a couple of those to dodge reserved words and row-struct
/// collisions (`user` -> `user_id`). Translate before interpolating into SQL.
fn sql_column(attribute: &str) -> &str {
    match attribute {
        "user" => "user_id",
        "message" => "message_id",
        other => other,
    }
}

/// Append `WHERE <conjunction>`, `ORDER BY`, `LIMIT` to `builder` for `filter`,
/// parameterizing every value. Mirrors `filterToQueryParams` in
/// `internal/store/sqlite/filter.go`: unknown operations are rejected rather
/// than silently ignored.
fn push_filter<'a>(builder: &mut QueryBuilder<'a, sqlx::Postgres>, filter: &'a Filter) -> Result<()> {
    if !filter.attributes.is_empty() {
        builder.push(" WHERE ");
        for (i, attr) in filter.attributes.iter().enumerate() {
            if i > 0 {
                builder.push(" AND ");
            }
            let sql_op = op_sql(attr.op)?;
            builder.push(sql_column(&attr.attribute));
            builder.push(" ");
            builder.push(sql_op);
            builder.push(" ");
            match attr.op {
                Op::In => {
                    let Some(values) = attr.value.as_array() else {
                        return Err(MemoryError::InvalidRequest(
                            "`in` filter requires an array value".to_string(),
                        ));
                    };
                    builder.push("(");
                    let mut separated = builder.separated(", ");
                    for value in values {
                        separated.push_bind(value.as_str().unwrap_or_default().to_string());
                    }
                    builder.push(")");
                }
                _ => {
                    builder.push_bind(attr.value.as_str().unwrap_or_default().to_string());
                }
            }
        }
    }

    if let Some(order_by) = &filter.order_by {
        builder.push(" ORDER BY ");
        builder.push(sql_column(&order_by.attribute));
        builder.push(if order_by.ascending { " ASC" } else { " DESC" });
    }

    if filter.limit > 0 {
        builder.push(" LIMIT ");
        builder.push_bind(filter.limit);
    }

    Ok(())
}

/// Builds a `Message` with an empty `artifacts` field; callers hydrate it
/// from the `artifacts` table afterward (see `PostgresStore::hydrate`).
fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        conversation: row.try_get("conversation")?,
        user: row.try_get("user_id")?,
        agent: row.try_get("agent")?,
        from: row.try_get("from_name")?,
        content: row.try_get("content")?,
        artifacts: Vec::new(),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_artifact(row: &sqlx::postgres::PgRow) -> Result<ArtifactData> {
    Ok(ArtifactData {
        id: row.try_get("id")?,
        message: row.try_get("message_id")?,
        kind: row.try_get("kind")?,
        data: row.try_get("data")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_summary(row: &sqlx::postgres::PgRow) -> Result<Summary> {
    let keywords_str: String = row.try_get("keywords")?;
    Ok(Summary {
        id: row.try_get("id")?,
        conversation: row.try_get("conversation")?,
        agent: row.try_get("agent")?,
        user: row.try_get("user_id")?,
        keywords: Summary::keywords_from_string(&keywords_str),
        summary: row.try_get("summary")?,
        conversation_started_at: row.try_get("conversation_started_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_knowledge(row: &sqlx::postgres::PgRow) -> Result<Knowledge> {
    Ok(Knowledge {
        id: row.try_get("id")?,
        agent: row.try_get("agent")?,
        user: row.try_get("user_id")?,
        subject: row.try_get("subject")?,
        predicate: row.try_get("predicate")?,
        object: row.try_get("object")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_message(&self, message: Message) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation, user_id, agent, from_name, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation)
        .bind(&message.user)
        .bind(&message.agent)
        .bind(&message.from)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;

        for artifact in message.artifacts {
            self.save_artifact(artifact).await?;
        }
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        let Some(message) = row.as_ref().map(row_to_message).transpose()? else {
            return Ok(None);
        };
        Ok(self.hydrate_messages(vec![message]).await?.pop())
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn list_messages(&self, filter: &Filter) -> Result<Vec<Message>> {
        self.ensure_schema().await?;
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT * FROM messages");
        push_filter(&mut builder, filter)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>>>()?;
        self.hydrate_messages(messages).await
    }

    /// Deletes the conversation's messages; the `artifacts` foreign key's
    /// `ON DELETE CASCADE` removes their artifacts in the same statement.
    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM messages WHERE conversation = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn save_artifact(&self, artifact: ArtifactData) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, message_id, kind, data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET kind = EXCLUDED.kind, data = EXCLUDED.data
            "#,
        )
        .bind(&artifact.id)
        .bind(&artifact.message)
        .bind(&artifact.kind)
        .bind(&artifact.data)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn get_artifact(&self, id: &str) -> Result<Option<ArtifactData>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.as_ref().map(row_to_artifact).transpose()
    }

    async fn delete_artifact(&self, id: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM artifacts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn list_artifacts(&self, filter: &Filter) -> Result<Vec<ArtifactData>> {
        self.ensure_schema().await?;
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT * FROM artifacts");
        push_filter(&mut builder, filter)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        rows.iter().map(row_to_artifact).collect()
    }

    async fn list_conversations(&self, filter: &Filter) -> Result<Vec<String>> {
        self.ensure_schema().await?;
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT DISTINCT conversation FROM messages");
        push_filter(&mut builder, filter)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("conversation").map_err(MemoryError::Database))
            .collect()
    }

    async fn save_summary(&self, mut summary: Summary) -> Result<()> {
        self.ensure_schema().await?;
        summary.updated_at = self.clock.now();
        sqlx::query(
            r#"
            INSERT INTO summaries (id, conversation, agent, user_id, keywords, summary, conversation_started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (conversation) DO UPDATE SET
                id = EXCLUDED.id,
                keywords = EXCLUDED.keywords,
                summary = EXCLUDED.summary,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.conversation)
        .bind(&summary.agent)
        .bind(&summary.user)
        .bind(summary.keywords_to_string())
        .bind(&summary.summary)
        .bind(summary.conversation_started_at)
        .bind(summary.updated_at)
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM summaries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.as_ref().map(row_to_summary).transpose()
    }

    async fn delete_summary(&self, id: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM summaries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn list_summaries(&self, filter: &Filter) -> Result<Vec<Summary>> {
        self.ensure_schema().await?;
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT * FROM summaries");
        push_filter(&mut builder, filter)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        rows.iter().map(row_to_summary).collect()
    }

    async fn exclude_conversation_from_summary(&self, conversation: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO summary_exclusions (conversation, created_at)
            VALUES ($1, $2)
            ON CONFLICT (conversation) DO NOTHING
            "#,
        )
        .bind(conversation)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn delete_summary_exclusion(&self, conversation: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM summary_exclusions WHERE conversation = $1")
            .bind(conversation)
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn list_summary_exclusions(&self) -> Result<Vec<SummaryExclusion>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM summary_exclusions")
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        rows.iter()
            .map(|row| {
                Ok(SummaryExclusion {
                    conversation: row.try_get("conversation")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn save_knowledge(&self, knowledge: Knowledge) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO knowledge (id, agent, user_id, subject, predicate, object, source, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                subject = EXCLUDED.subject,
                predicate = EXCLUDED.predicate,
                object = EXCLUDED.object,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&knowledge.id)
        .bind(&knowledge.agent)
        .bind(&knowledge.user)
        .bind(&knowledge.subject)
        .bind(&knowledge.predicate)
        .bind(&knowledge.object)
        .bind(&knowledge.source)
        .bind(knowledge.created_at)
        .bind(knowledge.expires_at)
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn get_knowledge(&self, id: &str) -> Result<Option<Knowledge>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM knowledge WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.as_ref().map(row_to_knowledge).transpose()
    }

    async fn delete_knowledge(&self, id: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM knowledge WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn list_knowledge(&self, filter: &Filter) -> Result<Vec<Knowledge>> {
        self.ensure_schema().await?;
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT * FROM knowledge");
        push_filter(&mut builder, filter)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        rows.iter().map(row_to_knowledge).collect()
    }

    async fn save_agent(&self, agent: Agent) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, identity) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, identity = EXCLUDED.identity
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.identity)
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.map(|row| {
            Ok(Agent {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                identity: row.try_get("identity")?,
            })
        })
        .transpose()
    }

    async fn save_user(&self, user: User) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.map(|row| {
            Ok(User {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn migrate(&self) -> Result<()> {
        self.ensure_schema().await
    }

    async fn get_latest_conversation(&self, agent: &str, user: &str) -> Result<(String, DateTime<Utc>)> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"
            SELECT conversation, MAX(created_at) AS latest_message
            FROM messages
            WHERE agent = $1 AND user_id = $2
            GROUP BY conversation
            ORDER BY latest_message DESC
            LIMIT 1
            "#,
        )
        .bind(agent)
        .bind(user)
        .fetch_optional(&self.pool)
        .await
        .map_err(MemoryError::Database)?;

        match row {
            Some(row) => {
                let conversation: String = row.try_get("conversation")?;
                let latest_message: DateTime<Utc> = row.try_get("latest_message")?;
                Ok((conversation, latest_message))
            }
            None => Ok((String::new(), DateTime::<Utc>::UNIX_EPOCH)),
        }
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.ensure_schema().await?;
        let rows = sqlx::query("SELECT * FROM messages WHERE conversation = $1 ORDER BY created_at ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>>>()?;
        let messages = self.hydrate_messages(messages).await?;
        let first = &messages[0];
        Ok(Some(Conversation {
            id: id.to_string(),
            agent: first.agent.clone(),
            user: first.user.clone(),
            created_at: first.created_at,
            messages,
        }))
    }

    /// Implements the three-branch eligibility predicate (old-and-big-enough,
    /// force-threshold-since-last-summary, or never-summarized-and-past-force)
    /// as a single query, the way `internal/store/sqlite/summary.go`'s
    /// `GetConversationsToSummarize` builds it with CTEs -- translated to
    /// Postgres placeholders and without that query's ungrouped-subquery bug.
    async fn get_conversations_to_summarize(
        &self,
        min_messages: i64,
        min_age: chrono::Duration,
        force_after: i64,
    ) -> Result<Vec<String>> {
        self.ensure_schema().await?;
        let min_age_seconds = min_age.num_seconds();
        let rows = sqlx::query(
            r#"
            WITH conversation_stats AS (
                SELECT
                    m.conversation,
                    COUNT(*) AS total_messages,
                    MAX(m.created_at) AS latest_message
                FROM messages m
                LEFT JOIN summary_exclusions e ON e.conversation = m.conversation
                WHERE e.conversation IS NULL
                GROUP BY m.conversation
            ),
            target_conversations AS (
                SELECT
                    cs.conversation,
                    cs.total_messages,
                    cs.latest_message,
                    s.updated_at AS summary_updated_at,
                    (SELECT COUNT(*) FROM messages mm
                        WHERE mm.conversation = cs.conversation
                        AND (s.updated_at IS NULL OR mm.created_at > s.updated_at)
                    ) AS messages_since_summary
                FROM conversation_stats cs
                LEFT JOIN summaries s ON s.conversation = cs.conversation
            )
            SELECT conversation FROM target_conversations
            WHERE (summary_updated_at IS NULL OR latest_message > summary_updated_at)
            AND (
                (latest_message <= NOW() - make_interval(secs => $1) AND total_messages >= $2)
                OR messages_since_summary >= $3
                OR (summary_updated_at IS NULL AND total_messages >= $3)
            )
            ORDER BY conversation
            "#,
        )
        .bind(min_age_seconds as f64)
        .bind(min_messages)
        .bind(force_after)
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Database)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("conversation").map_err(MemoryError::Database))
            .collect()
    }

    async fn get_conversations_to_extract_knowledge(&self) -> Result<Vec<String>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            r#"
            SELECT m.conversation
            FROM messages m
            LEFT JOIN knowledge_extractions k ON k.conversation = m.conversation
            GROUP BY m.conversation, k.updated_at
            HAVING k.updated_at IS NULL OR k.updated_at < MAX(m.created_at)
            ORDER BY m.conversation
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Database)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("conversation").map_err(MemoryError::Database))
            .collect()
    }

    async fn set_conversation_as_knowledge_extracted(&self, conversation: &str) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(
            r#"
            INSERT INTO knowledge_extractions (conversation, updated_at)
            VALUES ($1, $2)
            ON CONFLICT (conversation) DO UPDATE SET updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(conversation)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(MemoryError::Database)?;
        Ok(())
    }

    async fn get_knowledge_extraction(&self, conversation: &str) -> Result<Option<KnowledgeExtraction>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM knowledge_extractions WHERE conversation = $1")
            .bind(conversation)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.map(|row| {
            Ok(KnowledgeExtraction {
                conversation: row.try_get("conversation")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn expire_knowledge(&self) -> Result<u64> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM knowledge WHERE expires_at < $1")
            .bind(self.clock.now())
            .execute(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        Ok(result.rows_affected())
    }

    async fn get_summary_by_conversation(&self, conversation: &str) -> Result<Option<Summary>> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT * FROM summaries WHERE conversation = $1")
            .bind(conversation)
            .fetch_optional(&self.pool)
            .await
            .map_err(MemoryError::Database)?;
        row.as_ref().map(row_to_summary).transpose()
    }

    async fn get_recent_conversations(
        &self,
        agent: &str,
        user: &str,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(
            r#"
            SELECT conversation, MAX(created_at) AS latest_message
            FROM messages
            WHERE agent = $1 AND user_id = $2
            GROUP BY conversation
            HAVING ($3::timestamptz IS NULL OR MAX(created_at) >= $3)
               AND ($4::timestamptz IS NULL OR MAX(created_at) <= $4)
            ORDER BY latest_message DESC
            "#,
        )
        .bind(agent)
        .bind(user)
        .bind(after)
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(MemoryError::Database)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("conversation").map_err(MemoryError::Database))
            .collect()
    }
}
