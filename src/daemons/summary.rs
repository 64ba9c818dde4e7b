//! Summary Daemon: periodically distills eligible conversations.
//!
//! Grounded in `pkg/service/summary.go`'s `SummaryDaemon`/`Summarize`: sweep
//! the eligible id list, summarize each, and never let one conversation's
//! failure abort the rest of the sweep.

use crate::clock::Clock;
use crate::config::SummaryConfig;
use crate::domain::new_id;
use crate::error::MemoryError;
use crate::llm::LanguageModel;
use crate::store::Store;
use crate::Result;
use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SummaryDaemon {
    store: Arc<dyn Store>,
    llm: Arc<dyn LanguageModel>,
    clock: Arc<dyn Clock>,
    config: SummaryConfig,
    sweeping: AtomicBool,
}

impl SummaryDaemon {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LanguageModel>, clock: Arc<dyn Clock>, config: SummaryConfig) -> Self {
        Self {
            store,
            llm,
            clock,
            config,
            sweeping: AtomicBool::new(false),
        }
    }

    /// Drive the daemon's tick loop until `config.daemon_interval` is zero or
    /// the caller drops the returned task. A tick that arrives while a sweep
    /// is still running is dropped rather than queued.
    pub async fn run(self: Arc<Self>) {
        if self.config.daemon_interval.is_zero() {
            info!("summary daemon disabled (interval=0)");
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
                warn!(%error, "summary daemon sweep failed");
            }
            this.sweeping.store(false, Ordering::SeqCst);
        }
    }

    pub async fn sweep_once(&self) -> Result<()> {
        let min_age = Duration::from_std(self.config.min_conversation_time).unwrap_or(Duration::zero());
        let ids = self
            .store
            .get_conversations_to_summarize(self.config.min_messages, min_age, self.config.min_messages_to_force)
            .await?;

        info!(count = ids.len(), "summary sweep found eligible conversations");

        let mut first_error = None;
        for conversation_id in ids {
            if let Err(error) = self.summarize(&conversation_id).await {
                warn!(%error, conversation = %conversation_id, "failed to summarize conversation, continuing sweep");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn summarize(&self, conversation_id: &str) -> Result<()> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(format!("conversation {conversation_id}")))?;
        let existing = self.store.get_summary_by_conversation(conversation_id).await?;

        match self.llm.summarize(&conversation, existing.as_ref()).await? {
            None => {
                self.store.exclude_conversation_from_summary(conversation_id).await?;
            }
            Some(mut summary) => {
                if summary.id.is_empty() {
                    summary.id = existing.map(|s| s.id).unwrap_or_else(new_id);
                }
                summary.conversation = conversation_id.to_string();
                summary.agent = conversation.agent.clone();
                summary.user = conversation.user.clone();
                if summary.conversation_started_at == chrono::DateTime::<chrono::Utc>::UNIX_EPOCH {
                    summary.conversation_started_at = conversation.created_at;
                }
                summary.updated_at = self.clock.now();
                self.store.save_summary(summary).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::domain::{new_id, Message, Summary};
    use crate::llm::MockLanguageModel;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn message(conversation: &str, offset_secs: i64) -> Message {
        Message {
            id: new_id(),
            conversation: conversation.to_string(),
            user: "K".to_string(),
            agent: "agent-1".to_string(),
            from: "K".to_string(),
            content: "hi".to_string(),
            artifacts: vec![],
            created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn not_summarizable_conversations_are_excluded() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
        for i in 0..20 {
            store.save_message(message("C1", -i)).await.unwrap();
        }

        let llm = Arc::new(MockLanguageModel::new());
        llm.add_summarize_response(None);

        let daemon = SummaryDaemon::new(store.clone(), llm, clock, SummaryConfig::default());
        daemon.sweep_once().await.unwrap();

        let exclusions = store.list_summary_exclusions().await.unwrap();
        assert_eq!(exclusions.len(), 1);
        assert_eq!(exclusions[0].conversation, "C1");
    }

    #[tokio::test]
    async fn summarized_conversations_are_saved() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(clock.clone()));
        for i in 0..20 {
            store.save_message(message("C1", -i)).await.unwrap();
        }

        let llm = Arc::new(MockLanguageModel::new());
        llm.add_summarize_response(Some(Summary {
            id: String::new(),
            conversation: String::new(),
            agent: String::new(),
            user: String::new(),
            keywords: vec!["carrots".to_string()],
            summary: "talked about carrots".to_string(),
            conversation_started_at: chrono::DateTime::<Utc>::UNIX_EPOCH,
            updated_at: chrono::DateTime::<Utc>::UNIX_EPOCH,
        }));

        let daemon = SummaryDaemon::new(store.clone(), llm, clock, SummaryConfig::default());
        daemon.sweep_once().await.unwrap();

        let summary = store.get_summary_by_conversation("C1").await.unwrap().unwrap();
        assert_eq!(summary.summary, "talked about carrots");
        assert_eq!(summary.agent, "agent-1");
    }
}
