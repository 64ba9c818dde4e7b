//! Chat Service: the per-message orchestration entry point. Resolves the
//! conversation, assembles context, calls the language model, and persists
//! both sides of the turn.
//!
//! Grounded in `conversational.rs::handle_conversational_with_memory`'s
//! request flow (load history -> maybe summarize -> build prompt -> call
//! model -> persist) and `pkg/service/chat.go`'s `SendMessage`.

use crate::clock::Clock;
use crate::config::ChatConfig;
use crate::context::ContextAssembler;
use crate::domain::{new_id, Conversation, Knowledge, Message};
use crate::error::MemoryError;
use crate::filter::{Filter, FilterAttribute, OrderBy};
use crate::llm::LanguageModel;
use crate::resolver::ConversationResolver;
use crate::store::Store;
use crate::Result;
use std::sync::Arc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct ChatService {
    store: Arc<dyn Store>,
    llm: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
    config: ChatConfig,
    /// Ceiling on how long a single LLM call may run before the turn fails
    /// with `LlmUnavailable` instead of hanging.
    llm_timeout: std::time::Duration,
}

/// An incoming message still missing its conversation assignment.
pub struct IncomingMessage {
    pub agent: String,
    pub user: String,
    pub content: String,
    /// Empty to let the resolver decide.
    pub conversation: String,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LanguageModel>,
        clock: Arc<dyn Clock>,
        config: ChatConfig,
    ) -> Self {
        Self {
            store,
            llm,
            clock,
            config,
            llm_timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn with_llm_timeout(mut self, llm_timeout: std::time::Duration) -> Self {
        self.llm_timeout = llm_timeout;
        self
    }

    pub async fn send_message(
        &self,
        incoming: IncomingMessage,
        cancellation: &CancellationToken,
    ) -> Result<Message> {
        let agent = self
            .store
            .get_agent(&incoming.agent)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("agent {}", incoming.agent)))?;

        let conversation_id = if incoming.conversation.is_empty() {
            let resolver = ConversationResolver::new(
                self.store.as_ref(),
                self.llm.as_ref(),
                &self.clock,
                &self.config,
            );
            resolver.resolve(&agent.id, &incoming.user, &incoming.content).await?
        } else {
            incoming.conversation.clone()
        };

        let mut conversation = self
            .store
            .get_conversation(&conversation_id)
            .await?
            .unwrap_or_else(|| Conversation::empty(&conversation_id, &agent.id, &incoming.user));

        let tail_start = conversation.messages.len().saturating_sub(self.config.max_chat_messages);
        conversation.messages = conversation.messages.split_off(tail_start);

        let current_summary = self.store.get_summary_by_conversation(&conversation_id).await?;
        let previous_summaries = self
            .store
            .list_summaries(
                &Filter::default()
                    .with_attribute(FilterAttribute::eq("agent", agent.id.clone()))
                    .with_attribute(FilterAttribute::eq("user", incoming.user.clone()))
                    .with_order_by(OrderBy::new("conversation_started_at", false))
                    .with_limit(self.config.max_summaries_to_include),
            )
            .await?
            .into_iter()
            .filter(|s| s.conversation != conversation_id)
            .collect::<Vec<_>>();

        let now = self.clock.now();
        let knowledge: Vec<Knowledge> = self
            .store
            .list_knowledge(
                &Filter::default()
                    .with_attribute(FilterAttribute::eq("agent", agent.id.clone()))
                    .with_attribute(FilterAttribute::eq("user", incoming.user.clone())),
            )
            .await?
            .into_iter()
            .filter(|k| !k.is_expired(now))
            .collect();

        let assembler = ContextAssembler::new(self.llm.as_ref(), self.config.max_input_tokens);
        let prompt = assembler
            .assemble(
                &agent.identity,
                &conversation,
                current_summary.as_ref(),
                &previous_summaries,
                &knowledge,
                &incoming.content,
            )
            .await?;

        let mut budgeted_conversation = conversation.clone();
        budgeted_conversation.messages = prompt.history.clone();

        let knowledge_lines = prompt.knowledge_lines.clone();
        let call = self.llm.send_message(
            &prompt.identity,
            &budgeted_conversation,
            &prompt.previous_summaries,
            &knowledge_lines,
            &prompt.new_message,
        );

        let response = tokio::select! {
            result = timeout(self.llm_timeout, call) => {
                match result {
                    Ok(inner) => inner?,
                    Err(_) => return Err(MemoryError::LlmUnavailable("timed out".to_string())),
                }
            }
            _ = cancellation.cancelled() => {
                return Err(MemoryError::LlmUnavailable("cancelled".to_string()));
            }
        };

        let user_message = Message {
            id: new_id(),
            conversation: conversation_id.clone(),
            user: incoming.user.clone(),
            agent: agent.id.clone(),
            from: incoming.user.clone(),
            content: incoming.content.clone(),
            artifacts: vec![],
            created_at: self.clock.now(),
        };
        if let Err(error) = self.store.save_message(user_message).await {
            warn!(%error, "failed to persist incoming message");
            return Err(error);
        }

        let reply = response.into_message(new_id(), incoming.user, agent.id, conversation_id, self.clock.now());
        self.store.save_message(reply.clone()).await?;

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::Config;
    use crate::domain::{Agent, LlmResponse};
    use crate::llm::MockLanguageModel;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn first_message_starts_a_conversation_and_persists_both_turns() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
        store
            .save_agent(Agent {
                id: "agent-1".to_string(),
                name: "Helper".to_string(),
                identity: "You are a helpful assistant.".to_string(),
            })
            .await
            .unwrap();

        let llm = Arc::new(MockLanguageModel::new());
        llm.add_send_message_response(LlmResponse {
            content: "Hello yourself!".to_string(),
            artifacts: vec![],
        });

        let config = Config::default().chat;
        let service = ChatService::new(store.clone(), llm.clone(), clock, config);

        let reply = service
            .send_message(
                IncomingMessage {
                    agent: "agent-1".to_string(),
                    user: "K".to_string(),
                    content: "Hello!".to_string(),
                    conversation: String::new(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello yourself!");
        assert_eq!(reply.agent, "agent-1");

        let conversation = store.get_conversation(&reply.conversation).await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].content, "Hello!");
        assert_eq!(conversation.messages[1].content, "Hello yourself!");
    }

    #[tokio::test]
    async fn missing_agent_fails_with_not_found() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
        let llm = Arc::new(MockLanguageModel::new());
        let config = Config::default().chat;
        let service = ChatService::new(store, llm, clock, config);

        let result = service
            .send_message(
                IncomingMessage {
                    agent: "ghost".to_string(),
                    user: "K".to_string(),
                    content: "hi".to_string(),
                    conversation: String::new(),
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(MemoryError::NotFound(_))));
    }
}
