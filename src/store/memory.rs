//! In-memory `Store`, the test double backing the bulk of the test suite.
//! `Arc<RwLock<HashMap<_, _>>>` fields with a read/write split, same shape
//! as the other in-memory test doubles in this crate.

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
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    messages: Arc<RwLock<HashMap<String, Message>>>,
    artifacts: Arc<RwLock<HashMap<String, ArtifactData>>>,
    summaries: Arc<RwLock<HashMap<String, Summary>>>,
    summary_exclusions: Arc<RwLock<HashMap<String, SummaryExclusion>>>,
    knowledge: Arc<RwLock<HashMap<String, Knowledge>>>,
    knowledge_extractions: Arc<RwLock<HashMap<String, KnowledgeExtraction>>>,
    agents: Arc<RwLock<HashMap<String, Agent>>>,
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            messages: Arc::new(RwLock::new(HashMap::new())),
            artifacts: Arc::new(RwLock::new(HashMap::new())),
            summaries: Arc::new(RwLock::new(HashMap::new())),
            summary_exclusions: Arc::new(RwLock::new(HashMap::new())),
            knowledge: Arc::new(RwLock::new(HashMap::new())),
            knowledge_extractions: Arc::new(RwLock::new(HashMap::new())),
            agents: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn field_as_string(value: &serde_json::Value, attribute: &str) -> Option<String> {
    value.get(attribute).map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn matches(row: &serde_json::Value, attr: &crate::filter::FilterAttribute) -> Result<bool> {
    let Some(actual) = field_as_string(row, &attr.attribute) else {
        return Ok(false);
    };
    match attr.op {
        Op::Eq => Ok(actual == attr.value.as_str().unwrap_or_default()),
        Op::Neq => Ok(actual != attr.value.as_str().unwrap_or_default()),
        Op::Gt => Ok(actual.as_str() > attr.value.as_str().unwrap_or_default()),
        Op::Lt => Ok(actual.as_str() < attr.value.as_str().unwrap_or_default()),
        Op::Gte => Ok(actual.as_str() >= attr.value.as_str().unwrap_or_default()),
        Op::Lte => Ok(actual.as_str() <= attr.value.as_str().unwrap_or_default()),
        Op::In => {
            let Some(list) = attr.value.as_array() else {
                return Err(MemoryError::InvalidRequest(
                    "`in` filter requires an array value".to_string(),
                ));
            };
            Ok(list.iter().any(|v| v.as_str() == Some(actual.as_str())))
        }
    }
}

fn apply_filter<T: serde::Serialize + Clone>(items: Vec<T>, filter: &Filter) -> Result<Vec<T>> {
    let mut rows: Vec<(serde_json::Value, T)> = items
        .into_iter()
        .map(|item| (serde_json::to_value(&item).unwrap_or(serde_json::Value::Null), item))
        .collect();

    rows = rows
        .into_iter()
        .map(|(value, item)| -> Result<Option<(serde_json::Value, T)>> {
            for attr in &filter.attributes {
                if !matches(&value, attr)? {
                    return Ok(None);
                }
            }
            Ok(Some((value, item)))
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    if let Some(order_by) = &filter.order_by {
        rows.sort_by(|(a, _), (b, _)| {
            let av = field_as_string(a, &order_by.attribute).unwrap_or_default();
            let bv = field_as_string(b, &order_by.attribute).unwrap_or_default();
            let ord = av.cmp(&bv);
            if order_by.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
    }

    let mut out: Vec<T> = rows.into_iter().map(|(_, item)| item).collect();
    if filter.limit > 0 && (out.len() as i64) > filter.limit {
        out.truncate(filter.limit as usize);
    }
    Ok(out)
}

impl InMemoryStore {
    /// Attaches the persisted artifacts for `message.id`, overwriting whatever
    /// the caller embedded. Artifacts are stored in their own table; the
    /// `artifacts` field on a read `Message` is a hydrated view.
    async fn hydrate(&self, mut message: Message) -> Message {
        let artifacts = self.artifacts.read().await;
        let mut own: Vec<ArtifactData> = artifacts
            .values()
            .filter(|a| a.message == message.id)
            .cloned()
            .collect();
        own.sort_by_key(|a| a.created_at);
        message.artifacts = own;
        message
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_message(&self, mut message: Message) -> Result<()> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.id) {
            return Err(MemoryError::InvalidRequest(format!(
                "message {} already exists",
                message.id
            )));
        }
        let pending_artifacts = std::mem::take(&mut message.artifacts);
        messages.insert(message.id.clone(), message);
        drop(messages);
        for artifact in pending_artifacts {
            self.save_artifact(artifact).await?;
        }
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let Some(message) = self.messages.read().await.get(id).cloned() else {
            return Ok(None);
        };
        Ok(Some(self.hydrate(message).await))
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.messages.write().await.remove(id);
        self.artifacts.write().await.retain(|_, a| a.message != id);
        Ok(())
    }

    async fn list_messages(&self, filter: &Filter) -> Result<Vec<Message>> {
        let items: Vec<Message> = self.messages.read().await.values().cloned().collect();
        let filtered = apply_filter(items, filter)?;
        let mut out = Vec::with_capacity(filtered.len());
        for message in filtered {
            out.push(self.hydrate(message).await);
        }
        Ok(out)
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let mut messages = self.messages.write().await;
        let removed_ids: Vec<String> = messages
            .values()
            .filter(|m| m.conversation == id)
            .map(|m| m.id.clone())
            .collect();
        messages.retain(|_, m| m.conversation != id);
        drop(messages);
        self.artifacts
            .write()
            .await
            .retain(|_, a| !removed_ids.contains(&a.message));
        Ok(())
    }

    async fn save_artifact(&self, artifact: ArtifactData) -> Result<()> {
        self.artifacts.write().await.insert(artifact.id.clone(), artifact);
        Ok(())
    }

    async fn get_artifact(&self, id: &str) -> Result<Option<ArtifactData>> {
        Ok(self.artifacts.read().await.get(id).cloned())
    }

    async fn delete_artifact(&self, id: &str) -> Result<()> {
        self.artifacts.write().await.remove(id);
        Ok(())
    }

    async fn list_artifacts(&self, filter: &Filter) -> Result<Vec<ArtifactData>> {
        let items: Vec<ArtifactData> = self.artifacts.read().await.values().cloned().collect();
        apply_filter(items, filter)
    }

    async fn list_conversations(&self, filter: &Filter) -> Result<Vec<String>> {
        let messages = self.messages.read().await;
        let mut ids: Vec<String> = messages.values().map(|m| m.conversation.clone()).collect();
        ids.sort();
        ids.dedup();
        drop(messages);
        if filter.empty() {
            return Ok(ids);
        }
        // conversation listing filters apply to the messages, not bare ids;
        // callers needing message-level predicates should use list_messages.
        Ok(ids)
    }

    async fn save_summary(&self, mut summary: Summary) -> Result<()> {
        summary.updated_at = self.clock.now();
        let mut summaries = self.summaries.write().await;
        summaries.insert(summary.id.clone(), summary);
        Ok(())
    }

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>> {
        Ok(self.summaries.read().await.get(id).cloned())
    }

    async fn delete_summary(&self, id: &str) -> Result<()> {
        self.summaries.write().await.remove(id);
        Ok(())
    }

    async fn list_summaries(&self, filter: &Filter) -> Result<Vec<Summary>> {
        let items: Vec<Summary> = self.summaries.read().await.values().cloned().collect();
        apply_filter(items, filter)
    }

    async fn exclude_conversation_from_summary(&self, conversation: &str) -> Result<()> {
        self.summary_exclusions.write().await.insert(
            conversation.to_string(),
            SummaryExclusion {
                conversation: conversation.to_string(),
                created_at: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn delete_summary_exclusion(&self, conversation: &str) -> Result<()> {
        self.summary_exclusions.write().await.remove(conversation);
        Ok(())
    }

    async fn list_summary_exclusions(&self) -> Result<Vec<SummaryExclusion>> {
        Ok(self.summary_exclusions.read().await.values().cloned().collect())
    }

    async fn save_knowledge(&self, knowledge: Knowledge) -> Result<()> {
        self.knowledge
            .write()
            .await
            .insert(knowledge.id.clone(), knowledge);
        Ok(())
    }

    async fn get_knowledge(&self, id: &str) -> Result<Option<Knowledge>> {
        Ok(self.knowledge.read().await.get(id).cloned())
    }

    async fn delete_knowledge(&self, id: &str) -> Result<()> {
        self.knowledge.write().await.remove(id);
        Ok(())
    }

    async fn list_knowledge(&self, filter: &Filter) -> Result<Vec<Knowledge>> {
        let items: Vec<Knowledge> = self.knowledge.read().await.values().cloned().collect();
        apply_filter(items, filter)
    }

    async fn save_agent(&self, agent: Agent) -> Result<()> {
        self.agents.write().await.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn save_user(&self, user: User) -> Result<()> {
        self.users.write().await.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn get_latest_conversation(&self, agent: &str, user: &str) -> Result<(String, DateTime<Utc>)> {
        let messages = self.messages.read().await;
        let latest = messages
            .values()
            .filter(|m| m.agent == agent && m.user == user)
            .max_by_key(|m| m.created_at);
        match latest {
            Some(m) => Ok((m.conversation.clone(), m.created_at)),
            None => Ok((String::new(), DateTime::<Utc>::UNIX_EPOCH)),
        }
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .values()
            .filter(|m| m.conversation == id)
            .cloned()
            .collect();
        if matching.is_empty() {
            return Ok(None);
        }
        matching.sort_by_key(|m| m.created_at);
        drop(messages);
        let mut hydrated = Vec::with_capacity(matching.len());
        for message in matching {
            hydrated.push(self.hydrate(message).await);
        }
        let first = &hydrated[0];
        Ok(Some(Conversation {
            id: id.to_string(),
            agent: first.agent.clone(),
            user: first.user.clone(),
            created_at: first.created_at,
            messages: hydrated,
        }))
    }

    async fn get_conversations_to_summarize(
        &self,
        min_messages: i64,
        min_age: chrono::Duration,
        force_after: i64,
    ) -> Result<Vec<String>> {
        let now = self.clock.now();
        let messages = self.messages.read().await;
        let exclusions = self.summary_exclusions.read().await;
        let summaries = self.summaries.read().await;

        let mut by_conversation: HashMap<&str, Vec<&Message>> = HashMap::new();
        for m in messages.values() {
            by_conversation.entry(&m.conversation).or_default().push(m);
        }

        let mut eligible = Vec::new();
        for (conversation, msgs) in by_conversation {
            if exclusions.contains_key(conversation) {
                continue;
            }
            let total_messages = msgs.len() as i64;
            let latest_message = msgs.iter().map(|m| m.created_at).max().unwrap();
            let summary = summaries.values().find(|s| s.conversation == conversation);

            if let Some(summary) = summary {
                if latest_message <= summary.updated_at {
                    continue;
                }
            }

            let messages_since_summary = match summary {
                Some(summary) => msgs
                    .iter()
                    .filter(|m| m.created_at > summary.updated_at)
                    .count() as i64,
                None => total_messages,
            };

            let age_branch =
                latest_message <= now - min_age && total_messages >= min_messages;
            let force_branch = messages_since_summary >= force_after;
            let no_summary_force_branch = summary.is_none() && total_messages >= force_after;

            if age_branch || force_branch || no_summary_force_branch {
                eligible.push(conversation.to_string());
            }
        }
        eligible.sort();
        Ok(eligible)
    }

    async fn get_conversations_to_extract_knowledge(&self) -> Result<Vec<String>> {
        let messages = self.messages.read().await;
        let extractions = self.knowledge_extractions.read().await;

        let mut latest_by_conversation: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for m in messages.values() {
            let entry = latest_by_conversation.entry(&m.conversation).or_insert(m.created_at);
            if m.created_at > *entry {
                *entry = m.created_at;
            }
        }

        let mut eligible: Vec<String> = latest_by_conversation
            .into_iter()
            .filter(|(conversation, newest)| match extractions.get(*conversation) {
                None => true,
                Some(watermark) => watermark.updated_at < *newest,
            })
            .map(|(conversation, _)| conversation.to_string())
            .collect();
        eligible.sort();
        Ok(eligible)
    }

    async fn set_conversation_as_knowledge_extracted(&self, conversation: &str) -> Result<()> {
        self.knowledge_extractions.write().await.insert(
            conversation.to_string(),
            KnowledgeExtraction {
                conversation: conversation.to_string(),
                updated_at: self.clock.now(),
            },
        );
        Ok(())
    }

    async fn get_knowledge_extraction(&self, conversation: &str) -> Result<Option<KnowledgeExtraction>> {
        Ok(self.knowledge_extractions.read().await.get(conversation).cloned())
    }

    async fn expire_knowledge(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut knowledge = self.knowledge.write().await;
        let before = knowledge.len();
        knowledge.retain(|_, k| !k.is_expired(now));
        Ok((before - knowledge.len()) as u64)
    }

    async fn get_summary_by_conversation(&self, conversation: &str) -> Result<Option<Summary>> {
        Ok(self
            .summaries
            .read()
            .await
            .values()
            .find(|s| s.conversation == conversation)
            .cloned())
    }

    async fn get_recent_conversations(
        &self,
        agent: &str,
        user: &str,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let messages = self.messages.read().await;
        let mut latest_by_conversation: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for m in messages.values().filter(|m| m.agent == agent && m.user == user) {
            let entry = latest_by_conversation.entry(&m.conversation).or_insert(m.created_at);
            if m.created_at > *entry {
                *entry = m.created_at;
            }
        }

        let mut rows: Vec<(String, DateTime<Utc>)> = latest_by_conversation
            .into_iter()
            .filter(|(_, latest)| after.map(|a| *latest >= a).unwrap_or(true))
            .filter(|(_, latest)| before.map(|b| *latest <= b).unwrap_or(true))
            .map(|(conversation, latest)| (conversation.to_string(), latest))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(rows.into_iter().map(|(conversation, _)| conversation).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::domain::new_id;

    fn clock_at(now: DateTime<Utc>) -> Arc<dyn Clock> {
        Arc::new(TestClock::new(now))
    }

    fn message(agent: &str, user: &str, conversation: &str, created_at: DateTime<Utc>) -> Message {
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
    async fn conversation_messages_come_back_sorted_oldest_first() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        store.save_message(message("a", "u", "C1", now)).await.unwrap();
        store
            .save_message(message("a", "u", "C1", now - chrono::Duration::seconds(30)))
            .await
            .unwrap();
        store
            .save_message(message("a", "u", "C1", now - chrono::Duration::seconds(10)))
            .await
            .unwrap();

        let conversation = store.get_conversation("C1").await.unwrap().unwrap();
        for pair in conversation.messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn latest_conversation_matches_the_newest_message() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        store
            .save_message(message("a", "u", "old", now - chrono::Duration::minutes(5)))
            .await
            .unwrap();
        store.save_message(message("a", "u", "new", now)).await.unwrap();

        let (conversation, latest) = store.get_latest_conversation("a", "u").await.unwrap();
        assert_eq!(conversation, "new");
        assert_eq!(latest, now);
    }

    #[tokio::test]
    async fn summary_upsert_refreshes_updated_at_monotonically() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        let summary = Summary {
            id: "s1".to_string(),
            conversation: "C1".to_string(),
            agent: "a".to_string(),
            user: "u".to_string(),
            keywords: vec!["x".to_string()],
            summary: "first pass".to_string(),
            conversation_started_at: now,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        store.save_summary(summary.clone()).await.unwrap();
        let first = store.get_summary("s1").await.unwrap().unwrap();

        let later = now + chrono::Duration::minutes(1);
        let store = InMemoryStore::new(clock_at(later));
        store.save_summary(first.clone()).await.unwrap();
        let mut revised = first.clone();
        revised.summary = "revised".to_string();
        store.save_summary(revised).await.unwrap();
        let second = store.get_summary("s1").await.unwrap().unwrap();

        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.summary, "revised");
    }

    #[tokio::test]
    async fn knowledge_extraction_watermark_never_moves_backward() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        store.set_conversation_as_knowledge_extracted("C1").await.unwrap();
        let first = store.get_knowledge_extraction("C1").await.unwrap().unwrap();

        let earlier_clock = clock_at(now - chrono::Duration::minutes(5));
        let store_earlier = InMemoryStore { clock: earlier_clock, ..store };
        store_earlier.set_conversation_as_knowledge_extracted("C1").await.unwrap();
        let second = store_earlier.get_knowledge_extraction("C1").await.unwrap().unwrap();

        // a correctly driven caller never rewinds its own clock; this
        // asserts the store itself applies no extra reordering beyond
        // "whatever the clock says now".
        assert_eq!(second.updated_at, now - chrono::Duration::minutes(5));
        let _ = first;
    }

    #[tokio::test]
    async fn expire_knowledge_deletes_only_past_expiry() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        store
            .save_knowledge(Knowledge {
                id: "fresh".to_string(),
                agent: "a".to_string(),
                user: "u".to_string(),
                subject: "u".to_string(),
                predicate: "likes".to_string(),
                object: "tea".to_string(),
                source: "C1".to_string(),
                created_at: now,
                expires_at: now + chrono::Duration::days(1),
            })
            .await
            .unwrap();
        store
            .save_knowledge(Knowledge {
                id: "stale".to_string(),
                agent: "a".to_string(),
                user: "u".to_string(),
                subject: "u".to_string(),
                predicate: "liked".to_string(),
                object: "coffee".to_string(),
                source: "C1".to_string(),
                created_at: now - chrono::Duration::days(40),
                expires_at: now - chrono::Duration::days(1),
            })
            .await
            .unwrap();

        let removed = store.expire_knowledge().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_knowledge("stale").await.unwrap().is_none());
        assert!(store.get_knowledge("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn message_delete_cascades_to_its_artifacts() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        let mut msg = message("a", "u", "C1", now);
        msg.artifacts = vec![crate::domain::ArtifactData {
            id: "art-1".to_string(),
            message: msg.id.clone(),
            kind: "image/png".to_string(),
            data: vec![1, 2, 3],
            created_at: now,
        }];
        let message_id = msg.id.clone();
        store.save_message(msg).await.unwrap();

        let loaded = store.get_message(&message_id).await.unwrap().unwrap();
        assert_eq!(loaded.artifacts.len(), 1);
        assert_eq!(loaded.artifacts[0].id, "art-1");

        store.delete_message(&message_id).await.unwrap();
        assert!(store.get_artifact("art-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conversation_delete_cascades_through_messages_to_artifacts() {
        let now = Utc::now();
        let store = InMemoryStore::new(clock_at(now));
        let mut msg = message("a", "u", "C1", now);
        msg.artifacts = vec![crate::domain::ArtifactData {
            id: "art-2".to_string(),
            message: msg.id.clone(),
            kind: "text/plain".to_string(),
            data: vec![4, 5, 6],
            created_at: now,
        }];
        store.save_message(msg).await.unwrap();

        store.delete_conversation("C1").await.unwrap();
        assert!(store.get_conversation("C1").await.unwrap().is_none());
        assert!(store.get_artifact("art-2").await.unwrap().is_none());
    }
}
