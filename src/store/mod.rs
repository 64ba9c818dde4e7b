//! Persistence layer. Two layered contracts on one trait: low-level generic
//! CRUD + list (keyed by the `Filter` DSL) and high-level queries that encode
//! scheduling policy (`get_conversations_to_summarize` and friends).
//!
//! Grounded in `internal/store/low_level.go` and `internal/store/high_level.go`.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use crate::domain::{
    Agent, ArtifactData, Conversation, Knowledge, KnowledgeExtraction, Message, Summary,
    SummaryExclusion, User,
};
use crate::filter::Filter;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    // ---- low-level CRUD + list ----

    async fn save_message(&self, message: Message) -> Result<()>;
    async fn get_message(&self, id: &str) -> Result<Option<Message>>;
    /// Deletes the message and cascades to its artifacts.
    async fn delete_message(&self, id: &str) -> Result<()>;
    async fn list_messages(&self, filter: &Filter) -> Result<Vec<Message>>;

    /// Deletes the message and cascades to its artifacts.
    async fn delete_conversation(&self, id: &str) -> Result<()>;
    async fn list_conversations(&self, filter: &Filter) -> Result<Vec<String>>;

    async fn save_artifact(&self, artifact: ArtifactData) -> Result<()>;
    async fn get_artifact(&self, id: &str) -> Result<Option<ArtifactData>>;
    async fn delete_artifact(&self, id: &str) -> Result<()>;
    async fn list_artifacts(&self, filter: &Filter) -> Result<Vec<ArtifactData>>;

    async fn save_summary(&self, summary: Summary) -> Result<()>;
    async fn get_summary(&self, id: &str) -> Result<Option<Summary>>;
    async fn delete_summary(&self, id: &str) -> Result<()>;
    async fn list_summaries(&self, filter: &Filter) -> Result<Vec<Summary>>;

    async fn exclude_conversation_from_summary(&self, conversation: &str) -> Result<()>;
    async fn delete_summary_exclusion(&self, conversation: &str) -> Result<()>;
    async fn list_summary_exclusions(&self) -> Result<Vec<SummaryExclusion>>;

    async fn save_knowledge(&self, knowledge: Knowledge) -> Result<()>;
    async fn get_knowledge(&self, id: &str) -> Result<Option<Knowledge>>;
    async fn delete_knowledge(&self, id: &str) -> Result<()>;
    async fn list_knowledge(&self, filter: &Filter) -> Result<Vec<Knowledge>>;

    async fn save_agent(&self, agent: Agent) -> Result<()>;
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;

    async fn save_user(&self, user: User) -> Result<()>;
    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    // ---- high-level, policy-encoding queries ----

    /// Idempotent schema setup. A no-op for in-memory backends.
    async fn migrate(&self) -> Result<()>;

    /// The conversation id containing the most-recent message for this
    /// (agent, user) pair, or `("", epoch)` if none exist. Absence is not an
    /// error.
    async fn get_latest_conversation(&self, agent: &str, user: &str) -> Result<(String, DateTime<Utc>)>;

    /// All messages of `id`, sorted oldest-first, artifacts hydrated.
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Conversation ids eligible for (re-)summarization: old enough and big
    /// enough, or grown past the force threshold since the last summary, or
    /// never summarized at all and past the force threshold.
    async fn get_conversations_to_summarize(
        &self,
        min_messages: i64,
        min_age: chrono::Duration,
        force_after: i64,
    ) -> Result<Vec<String>>;

    /// Conversation ids with no extraction watermark, or one older than their
    /// newest message.
    async fn get_conversations_to_extract_knowledge(&self) -> Result<Vec<String>>;

    async fn set_conversation_as_knowledge_extracted(&self, conversation: &str) -> Result<()>;

    async fn get_knowledge_extraction(&self, conversation: &str) -> Result<Option<KnowledgeExtraction>>;

    /// Delete all knowledge rows whose `expires_at` is in the past. Returns
    /// the number of rows removed.
    async fn expire_knowledge(&self) -> Result<u64>;

    async fn get_summary_by_conversation(&self, conversation: &str) -> Result<Option<Summary>>;

    /// Conversation ids for `(agent, user)` whose most recent message falls
    /// within `(after, before)` (either bound optional), newest first.
    /// Supplements the distilled contract: grounded in
    /// `pkg/service/chat.go`'s `GetRecentConversationsRequest`, useful for
    /// callers building history UIs on top of the engine.
    async fn get_recent_conversations(
        &self,
        agent: &str,
        user: &str,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>>;
}
