//! Knowledge Daemon: periodically extracts durable facts from conversations
//! and expires stale ones.
//!
//! Grounded in `internal/agent/knowledge.go`'s `KnowledgeDaemon` /
//! `generateNewKnowledge`, run on its own ticker independent from the
//! Summary Daemon's (`internal/agent/daemon.go` spawns both separately).

use crate::clock::Clock;
use crate::config::KnowledgeConfig;
use crate::domain::{new_id, resolve_expiry, Knowledge};
use crate::error::MemoryError;
use crate::llm::LanguageModel;
use crate::store::Store;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct KnowledgeDaemon {
    store: Arc<dyn Store>,
    llm: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
    config: KnowledgeConfig,
    sweeping: AtomicBool,
}

impl KnowledgeDaemon {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LanguageModel>, clock: Arc<dyn Clock>, config: KnowledgeConfig) -> Self {
        Self {
            store,
            llm,
            clock,
            config,
            sweeping: AtomicBool::new(false),
        }
    }

    pub async fn run(self: Arc<Self>) {
        if self.config.daemon_interval.is_zero() {
            info!("knowledge daemon disabled (interval=0)");
            return;
        }
        let mut interval = tokio::time::interval(self.config.daemon_interval);
        loop {
            interval.tick().await;
            let this = Arc::clone(&self);
            if this.sweeping.swap(true, Ordering::SeqCst) {
                continue;
            }
            if let Err(error) = this.sweep_once().await {
                warn!(%error, "knowledge daemon sweep failed");
            }
            this.sweeping.store(false, Ordering::SeqCst);
        }
    }

    pub async fn sweep_once(&self) -> Result<()> {
        let ids = self.store.get_conversations_to_extract_knowledge().await?;
        info!(count = ids.len(), "knowledge sweep found eligible conversations");

        let mut first_error = None;
        for conversation_id in ids {
            if let Err(error) = self.extract(&conversation_id).await {
                warn!(%error, conversation = %conversation_id, "failed to extract knowledge, continuing sweep");
                first_error.get_or_insert(error);
            }
        }

        match self.store.expire_knowledge().await {
            Ok(expired) => {
                if expired > 0 {
                    info!(expired, "expired stale knowledge rows");
                }
            }
            Err(error) => {
                warn!(%error, "failed to expire knowledge after sweep");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn extract(&self, conversation_id: &str) -> Result<()> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("conversation {conversation_id}")))?;
        let summary = self.store.get_summary_by_conversation(conversation_id).await?;

        let facts = self.llm.learn(&conversation, summary.as_ref()).await?;
        let now = self.clock.now();
        for draft in facts {
            let knowledge = Knowledge {
                id: new_id(),
                agent: conversation.agent.clone(),
                user: conversation.user.clone(),
                subject: draft.subject,
                predicate: draft.predicate,
                object: draft.object,
                source: conversation_id.to_string(),
                created_at: now,
                expires_at: resolve_expiry(now, &draft.expires),
            };
            self.store.save_knowledge(knowledge).await?;
        }

        self.store.set_conversation_as_knowledge_extracted(conversation_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::domain::{new_id, DraftKnowledge, Message};
    use crate::llm::MockLanguageModel;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn message(conversation: &str) -> Message {
        Message {
            id: new_id(),
            conversation: conversation.to_string(),
            user: "K".to_string(),
            agent: "agent-1".to_string(),
            from: "K".to_string(),
            content: "I like carrots".to_string(),
            artifacts: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn extracted_facts_are_persisted_and_watermark_advances() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
        store.save_message(message("C1")).await.unwrap();

        let llm = Arc::new(MockLanguageModel::new());
        llm.add_learn_response(vec![DraftKnowledge {
            subject: "K".to_string(),
            predicate: "likes".to_string(),
            object: "carrots".to_string(),
            expires: "never".to_string(),
        }]);

        let daemon = KnowledgeDaemon::new(store.clone(), llm, clock, KnowledgeConfig::default());
        daemon.sweep_once().await.unwrap();

        let facts = store
            .list_knowledge(&crate::filter::Filter::default())
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, "carrots");

        let watermark = store.get_knowledge_extraction("C1").await.unwrap().unwrap();
        assert!(watermark.updated_at >= message("C1").created_at - chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn expire_knowledge_removes_stale_rows() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
        let now = Utc::now();
        store
            .save_knowledge(Knowledge {
                id: new_id(),
                agent: "agent-1".to_string(),
                user: "K".to_string(),
                subject: "K".to_string(),
                predicate: "likes".to_string(),
                object: "carrots".to_string(),
                source: "C1".to_string(),
                created_at: now - chrono::Duration::days(40),
                expires_at: now - chrono::Duration::days(10),
            })
            .await
            .unwrap();

        let llm = Arc::new(MockLanguageModel::new());
        let daemon = KnowledgeDaemon::new(store.clone(), llm, clock, KnowledgeConfig::default());
        daemon.sweep_once().await.unwrap();

        let facts = store
            .list_knowledge(&crate::filter::Filter::default())
            .await
            .unwrap();
        assert!(facts.is_empty());
    }
}
