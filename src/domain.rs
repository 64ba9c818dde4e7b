//! Core data model: messages, conversations, summaries, knowledge and their owners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named agent persona. Referenced by `agent` on every memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub identity: String,
}

/// An end user. Referenced by `user` on every memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Equality tolerant of sub-second drift introduced by storage round-trips.
    pub fn roughly_equal(&self, other: &User) -> bool {
        self.id == other.id
            && self.name == other.name
            && (self.created_at - other.created_at).num_seconds().abs() <= 1
            && (self.updated_at - other.updated_at).num_seconds().abs() <= 1
    }
}

/// An opaque artifact attached to a message (image, file, structured payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactData {
    pub id: String,
    pub message: String,
    pub kind: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A single turn in a conversation, authored by either the user or the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation: String,
    pub user: String,
    pub agent: String,
    pub from: String,
    pub content: String,
    pub artifacts: Vec<ArtifactData>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn roughly_equal(&self, other: &Message) -> bool {
        self.id == other.id
            && self.conversation == other.conversation
            && self.user == other.user
            && self.agent == other.agent
            && self.from == other.from
            && self.content == other.content
            && (self.created_at - other.created_at).num_seconds().abs() <= 1
    }

    /// `"{from} ({created_at}): {content}"`, the dated rendering used in prompts.
    pub fn dated_string(&self) -> String {
        format!(
            "{} ({}): {}",
            self.from,
            self.created_at.to_rfc3339(),
            self.content
        )
    }

    /// `"{from}: {content}"`, without timestamp noise.
    pub fn simple_string(&self) -> String {
        format!("{}: {}", self.from, self.content)
    }
}

/// A reply returned by the language model, not yet attached to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub artifacts: Vec<ArtifactData>,
}

impl LlmResponse {
    /// `created_at` is the caller's clock reading, not the wall clock, so
    /// replies stay on the injected `Clock` seam under test.
    pub fn into_message(
        self,
        id: String,
        user: String,
        agent: String,
        conversation: String,
        created_at: DateTime<Utc>,
    ) -> Message {
        Message {
            id,
            conversation,
            user,
            agent: agent.clone(),
            from: agent,
            content: self.content,
            artifacts: self.artifacts,
            created_at,
        }
    }
}

/// The set of messages sharing a conversation id. A derived aggregate, not a
/// separately-stored row: `created_at` is the oldest message's time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub agent: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn empty(id: impl Into<String>, agent: impl Into<String>, user: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent: agent.into(),
            user: user.into(),
            created_at: now,
            messages: Vec::new(),
        }
    }

    /// The last `n` messages, oldest-first within the slice.
    pub fn past_n_messages(&self, n: usize) -> &[Message] {
        let len = self.messages.len();
        if len <= n {
            &self.messages
        } else {
            &self.messages[len - n..]
        }
    }
}

/// A distilled description of a conversation, at most one per conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub conversation: String,
    pub agent: String,
    pub user: String,
    pub keywords: Vec<String>,
    pub summary: String,
    pub conversation_started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Summary {
    pub fn keywords_to_string(&self) -> String {
        self.keywords.join(",")
    }

    pub fn keywords_from_string(input: &str) -> Vec<String> {
        if input.is_empty() {
            Vec::new()
        } else {
            input.split(',').map(|s| s.trim().to_string()).collect()
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {}", self.keywords_to_string(), self.summary)
    }
}

/// Marks a conversation as permanently ineligible for summarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryExclusion {
    pub conversation: String,
    pub created_at: DateTime<Utc>,
}

/// A durable subject-predicate-object fact extracted from a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: String,
    pub agent: String,
    pub user: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Knowledge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

impl std::fmt::Display for Knowledge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// The watermark recording the last time a conversation's knowledge was extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeExtraction {
    pub conversation: String,
    pub updated_at: DateTime<Utc>,
}

/// A fact with an un-resolved, human-readable expiry ("never", "3 days"),
/// as returned directly from `LanguageModel::learn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftKnowledge {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub expires: String,
}

/// Parse a human duration phrase into an absolute instant relative to `now`.
/// Recognizes "never" (100 years out), "N day(s)", "N week(s)", "N month(s)" (30-day months),
/// "N hour(s)", "N minute(s)". Unrecognized phrases default to 30 days.
pub fn resolve_expiry(now: DateTime<Utc>, phrase: &str) -> DateTime<Utc> {
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() || phrase == "never" {
        return now + chrono::Duration::days(365 * 100);
    }
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    if parts.len() == 2 {
        if let Ok(n) = parts[0].parse::<i64>() {
            let unit = parts[1].trim_end_matches('s');
            let delta = match unit {
                "minute" => Some(chrono::Duration::minutes(n)),
                "hour" => Some(chrono::Duration::hours(n)),
                "day" => Some(chrono::Duration::days(n)),
                "week" => Some(chrono::Duration::weeks(n)),
                "month" => Some(chrono::Duration::days(n * 30)),
                "year" => Some(chrono::Duration::days(n * 365)),
                _ => None,
            };
            if let Some(delta) = delta {
                return now + delta;
            }
        }
    }
    now + chrono::Duration::days(30)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
