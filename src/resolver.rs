//! Conversation Resolver: decides whether an incoming message joins the last
//! conversation or starts a new one.
//!
//! Grounded in `pkg/service/chat.go`'s `generateOrFindConversation`, with one
//! deliberate deviation: that source returns `("", nil)` when the LLM
//! continuance check errors, silently producing an ambiguous empty
//! conversation id. Here an LLM error is treated the same as "do not
//! continue": a fresh id, never an error surfaced to the caller, since a
//! spurious new conversation is always safer than a leaked one.

use crate::clock::Clock;
use crate::config::ChatConfig;
use crate::domain::new_id;
use crate::llm::LanguageModel;
use crate::store::Store;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct ConversationResolver<'a> {
    store: &'a dyn Store,
    llm: &'a dyn LanguageModel,
    clock: &'a Arc<dyn Clock>,
    config: &'a ChatConfig,
}

impl<'a> ConversationResolver<'a> {
    pub fn new(
        store: &'a dyn Store,
        llm: &'a dyn LanguageModel,
        clock: &'a Arc<dyn Clock>,
        config: &'a ChatConfig,
    ) -> Self {
        Self {
            store,
            llm,
            clock,
            config,
        }
    }

    pub async fn resolve(&self, agent: &str, user: &str, message: &str) -> Result<String> {
        let now = self.clock.now();
        let (last_conversation, last_time) = self.store.get_latest_conversation(agent, user).await?;

        let maintain_window = chrono::Duration::from_std(self.config.maintain_conversation)
            .unwrap_or(chrono::Duration::zero());
        let max_idle = chrono::Duration::from_std(self.config.max_conversation_idle_time)
            .unwrap_or(chrono::Duration::zero());

        if last_time > now - maintain_window {
            debug!(conversation = %last_conversation, "resolver: auto-continue within maintain window");
            return Ok(last_conversation);
        }

        if last_conversation.is_empty() {
            debug!("resolver: no prior conversation, starting fresh");
            return Ok(new_id());
        }

        if last_time < now - max_idle {
            debug!(conversation = %last_conversation, "resolver: past max idle, starting fresh");
            return Ok(new_id());
        }

        let Some(conversation) = self.store.get_conversation(&last_conversation).await? else {
            return Ok(new_id());
        };
        let Some(summary) = self.store.get_summary_by_conversation(&last_conversation).await? else {
            debug!(conversation = %last_conversation, "resolver: no summary to ground continuance, starting fresh");
            return Ok(new_id());
        };

        match self.llm.conversation_continuance(message, &conversation, &summary).await {
            Ok(true) => Ok(last_conversation),
            Ok(false) => Ok(new_id()),
            Err(error) => {
                debug!(%error, "resolver: continuance check failed, starting fresh");
                Ok(new_id())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::ChatConfig;
    use crate::domain::{Message, Summary};
    use crate::llm::MockLanguageModel;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use std::time::Duration;

    fn config() -> ChatConfig {
        ChatConfig {
            maintain_conversation: Duration::from_secs(300),
            max_conversation_idle_time: Duration::from_secs(21_600),
            ..ChatConfig::default()
        }
    }

    fn message(agent: &str, user: &str, conversation: &str, created_at: chrono::DateTime<Utc>) -> Message {
        Message {
            id: new_id(),
            conversation: conversation.to_string(),
            user: user.to_string(),
            agent: agent.to_string(),
            from: user.to_string(),
            content: "hi".to_string(),
            artifacts: vec![],
            created_at,
        }
    }

    #[tokio::test]
    async fn scenario_1_empty_store_returns_fresh_id() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store = InMemoryStore::new(clock.clone());
        let llm = MockLanguageModel::new();
        let cfg = config();

        let resolver = ConversationResolver::new(&store, &llm, &clock, &cfg);
        let id = resolver.resolve("agent-1", "K", "hello").await.unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn scenario_2_other_users_conversation_is_not_joined() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let store = InMemoryStore::new(clock.clone());
        store
            .save_message(message("agent-1", "A", "C1", now - chrono::Duration::seconds(30)))
            .await
            .unwrap();
        let llm = MockLanguageModel::new();
        let cfg = config();

        let resolver = ConversationResolver::new(&store, &llm, &clock, &cfg);
        let id = resolver.resolve("agent-1", "K", "hello").await.unwrap();
        assert_ne!(id, "C1");
    }

    #[tokio::test]
    async fn scenario_3_within_maintain_window_auto_continues() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let store = InMemoryStore::new(clock.clone());
        let cfg = config();
        let within = chrono::Duration::from_std(cfg.maintain_conversation).unwrap()
            - chrono::Duration::seconds(30);
        store
            .save_message(message("agent-1", "K", "C1", now - within))
            .await
            .unwrap();
        let llm = MockLanguageModel::new();

        let resolver = ConversationResolver::new(&store, &llm, &clock, &cfg);
        let id = resolver.resolve("agent-1", "K", "hello").await.unwrap();
        assert_eq!(id, "C1");
    }

    #[tokio::test]
    async fn scenario_4_no_summary_means_fresh_id() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let store = InMemoryStore::new(clock.clone());
        let cfg = config();
        let past_maintain = chrono::Duration::from_std(cfg.maintain_conversation).unwrap()
            + chrono::Duration::minutes(1);
        store
            .save_message(message("agent-1", "K", "C1", now - past_maintain))
            .await
            .unwrap();
        let llm = MockLanguageModel::new();

        let resolver = ConversationResolver::new(&store, &llm, &clock, &cfg);
        let id = resolver.resolve("agent-1", "K", "hello").await.unwrap();
        assert_ne!(id, "C1");
    }

    #[tokio::test]
    async fn scenario_5_llm_continuance_decides() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let store = InMemoryStore::new(clock.clone());
        let cfg = config();
        let past_maintain = chrono::Duration::from_std(cfg.maintain_conversation).unwrap()
            + chrono::Duration::minutes(1);
        store
            .save_message(message("agent-1", "K", "C1", now - past_maintain))
            .await
            .unwrap();
        store
            .save_summary(Summary {
                id: new_id(),
                conversation: "C1".to_string(),
                agent: "agent-1".to_string(),
                user: "K".to_string(),
                keywords: vec![],
                summary: "talked about carrots".to_string(),
                conversation_started_at: now - past_maintain,
                updated_at: now - past_maintain,
            })
            .await
            .unwrap();

        let llm = MockLanguageModel::new();
        llm.add_continuance_response(true);
        let resolver = ConversationResolver::new(&store, &llm, &clock, &cfg);
        let id = resolver.resolve("agent-1", "K", "more carrots?").await.unwrap();
        assert_eq!(id, "C1");

        llm.add_continuance_response(false);
        let id = resolver.resolve("agent-1", "K", "totally different topic").await.unwrap();
        assert_ne!(id, "C1");
    }

    #[tokio::test]
    async fn scenario_6_past_max_idle_never_consults_llm() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let store = InMemoryStore::new(clock.clone());
        let cfg = config();
        let past_idle = chrono::Duration::from_std(cfg.max_conversation_idle_time).unwrap()
            + chrono::Duration::minutes(1);
        store
            .save_message(message("agent-1", "K", "C1", now - past_idle))
            .await
            .unwrap();
        store
            .save_summary(Summary {
                id: new_id(),
                conversation: "C1".to_string(),
                agent: "agent-1".to_string(),
                user: "K".to_string(),
                keywords: vec![],
                summary: "old topic".to_string(),
                conversation_started_at: now - past_idle,
                updated_at: now - past_idle,
            })
            .await
            .unwrap();

        let llm = MockLanguageModel::new();
        let resolver = ConversationResolver::new(&store, &llm, &clock, &cfg);
        let id = resolver.resolve("agent-1", "K", "hello again").await.unwrap();
        assert_ne!(id, "C1");
        assert!(llm.continuance_inputs().is_empty());
    }
}
