//! Language model port: an opaque capability the memory engine depends on but
//! never implements a wire adapter for. See `mock` for the deterministic test
//! double that also exercises the contract any real adapter must satisfy.

mod mock;

pub use mock::MockLanguageModel;

use crate::domain::{Conversation, DraftKnowledge, LlmResponse, Summary};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce the agent's reply to `new_message`, given the assembled context.
    async fn send_message(
        &self,
        identity: &str,
        conversation: &Conversation,
        previous_summaries: &[Summary],
        knowledge: &[String],
        new_message: &str,
    ) -> Result<LlmResponse>;

    /// Decide whether `new_message` should be treated as the next turn of
    /// `conversation`, grounded in `summary`.
    async fn conversation_continuance(
        &self,
        new_message: &str,
        conversation: &Conversation,
        summary: &Summary,
    ) -> Result<bool>;

    /// Distill `conversation` into a summary. `None` signals "not
    /// summarizable" and the caller should exclude the conversation instead.
    async fn summarize(
        &self,
        conversation: &Conversation,
        previous_summary: Option<&Summary>,
    ) -> Result<Option<Summary>>;

    /// Extract zero or more durable facts from `conversation`.
    async fn learn(
        &self,
        conversation: &Conversation,
        summary: Option<&Summary>,
    ) -> Result<Vec<DraftKnowledge>>;

    /// A monotone-in-length estimate of how many tokens `text` will consume.
    async fn estimate_tokens(&self, text: &str) -> Result<usize>;
}
