//! Runtime configuration. Plain and `Default`-able so the engine is
//! constructible in tests without environment access; the demo binary layers
//! environment loading on top of the defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Window inside which a new message auto-joins the last conversation.
    pub maintain_conversation: Duration,
    /// Hard cutoff past which the last conversation is never continued.
    pub max_conversation_idle_time: Duration,
    /// Live-history tail length passed to the LLM.
    pub max_chat_messages: usize,
    /// Cap on prior summaries included in context.
    pub max_summaries_to_include: i64,
    /// Token budget for the assembled prompt.
    pub max_input_tokens: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            maintain_conversation: Duration::from_secs(10 * 60),
            max_conversation_idle_time: Duration::from_secs(6 * 60 * 60),
            max_chat_messages: 50,
            max_summaries_to_include: 25,
            max_input_tokens: 8_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Sweep period; zero disables the daemon.
    pub daemon_interval: Duration,
    /// Minimum messages in a conversation for age-based summarization.
    pub min_messages: i64,
    /// Minimum age of the latest message for age-based summarization.
    pub min_conversation_time: Duration,
    /// Force-summarize threshold regardless of age.
    pub min_messages_to_force: i64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            daemon_interval: Duration::from_secs(60),
            min_messages: 5,
            min_conversation_time: Duration::from_secs(5 * 60),
            min_messages_to_force: 15,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Sweep period; zero disables the daemon.
    pub daemon_interval: Duration,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            daemon_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub chat: ChatConfig,
    pub summary: SummaryConfig,
    pub knowledge: KnowledgeConfig,
}

impl Config {
    /// Load overrides from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("CHAT_MAINTAIN_CONVERSATION_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.chat.maintain_conversation = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("CHAT_MAX_CONVERSATION_IDLE_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.chat.max_conversation_idle_time = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("CHAT_MAX_CHAT_MESSAGES") {
            if let Ok(n) = v.parse::<usize>() {
                config.chat.max_chat_messages = n;
            }
        }
        if let Ok(v) = std::env::var("SUMMARY_DAEMON_INTERVAL_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.summary.daemon_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("KNOWLEDGE_DAEMON_INTERVAL_SECONDS") {
            if let Ok(secs) = v.parse::<u64>() {
                config.knowledge.daemon_interval = Duration::from_secs(secs);
            }
        }

        config
    }
}
