//! Context Assembler: packs identity, prior summaries, the current
//! conversation's summary, knowledge and message history into the single
//! prompt sent to the language model, bounded by a token budget.
//!
//! Grounded in `memory/context_manager.rs`'s `ContextManager`
//! (`should_summarize`/`prepare_context_for_llm`/token-budget accounting),
//! generalized to a fixed section order: identity, previous-conversation
//! summaries, current-conversation summary, knowledge, history, then the
//! mandatory new message last.

use crate::domain::{Conversation, Knowledge, Message, Summary};
use crate::llm::LanguageModel;
use crate::Result;

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub identity: String,
    /// Most-recent-first, already trimmed to the token budget.
    pub previous_summaries: Vec<Summary>,
    pub current_summary: Option<Summary>,
    /// Rendered `subject predicate object` lines, trimmed to the budget.
    pub knowledge_lines: Vec<String>,
    /// Chronological order, trimmed from the oldest end to retain recency.
    pub history: Vec<Message>,
    pub new_message: String,
}

impl AssembledPrompt {
    /// A single text rendering in the section order above. The concrete
    /// wire format of a real LLM adapter may differ; this is what the engine
    /// itself considers "the prompt" for budget-accounting purposes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.identity);
        out.push_str("\n\n");

        if !self.previous_summaries.is_empty() {
            out.push_str("Previous conversations:\n");
            for summary in &self.previous_summaries {
                out.push_str("- ");
                out.push_str(&summary.to_string());
                out.push('\n');
            }
            out.push('\n');
        }

        if let Some(summary) = &self.current_summary {
            out.push_str("This conversation so far: ");
            out.push_str(&summary.to_string());
            out.push_str("\n\n");
        }

        if !self.knowledge_lines.is_empty() {
            out.push_str("Known facts:\n");
            for line in &self.knowledge_lines {
                out.push_str("- ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }

        for message in &self.history {
            out.push_str(&message.simple_string());
            out.push('\n');
        }

        out.push_str(&self.new_message);
        out
    }
}

pub struct ContextAssembler<'a> {
    llm: &'a dyn LanguageModel,
    max_input_tokens: usize,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(llm: &'a dyn LanguageModel, max_input_tokens: usize) -> Self {
        Self {
            llm,
            max_input_tokens,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn assemble(
        &self,
        identity: &str,
        conversation: &Conversation,
        current_summary: Option<&Summary>,
        previous_summaries: &[Summary],
        knowledge: &[Knowledge],
        new_message: &str,
    ) -> Result<AssembledPrompt> {
        let new_message_tokens = self.llm.estimate_tokens(new_message).await?;
        let identity_tokens = self.llm.estimate_tokens(identity).await?;

        let mut remaining = self
            .max_input_tokens
            .saturating_sub(new_message_tokens)
            .saturating_sub(identity_tokens);

        let mut kept_previous_summaries = Vec::new();
        for summary in previous_summaries {
            let rendered = summary.to_string();
            let tokens = self.llm.estimate_tokens(&rendered).await?;
            if tokens > remaining {
                break;
            }
            remaining -= tokens;
            kept_previous_summaries.push(summary.clone());
        }

        let mut kept_current_summary = None;
        if let Some(summary) = current_summary {
            let rendered = summary.to_string();
            let tokens = self.llm.estimate_tokens(&rendered).await?;
            if tokens <= remaining {
                remaining -= tokens;
                kept_current_summary = Some(summary.clone());
            }
        }

        let mut kept_knowledge = Vec::new();
        for fact in knowledge {
            let rendered = fact.to_string();
            let tokens = self.llm.estimate_tokens(&rendered).await?;
            if tokens > remaining {
                break;
            }
            remaining -= tokens;
            kept_knowledge.push(rendered);
        }

        // History: walk from newest to oldest so truncation drops the
        // oldest messages first, then restore chronological order.
        let mut kept_history_rev = Vec::new();
        for message in conversation.messages.iter().rev() {
            let tokens = self.llm.estimate_tokens(&message.simple_string()).await?;
            if tokens > remaining {
                break;
            }
            remaining -= tokens;
            kept_history_rev.push(message.clone());
        }
        kept_history_rev.reverse();

        Ok(AssembledPrompt {
            identity: identity.to_string(),
            previous_summaries: kept_previous_summaries,
            current_summary: kept_current_summary,
            knowledge_lines: kept_knowledge,
            history: kept_history_rev,
            new_message: new_message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::new_id;
    use crate::llm::MockLanguageModel;
    use chrono::Utc;

    fn message(content: &str, offset_secs: i64) -> Message {
        Message {
            id: new_id(),
            conversation: "C1".to_string(),
            user: "K".to_string(),
            agent: "agent-1".to_string(),
            from: "K".to_string(),
            content: content.to_string(),
            artifacts: vec![],
            created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn history_truncation_keeps_most_recent_messages() {
        let llm = MockLanguageModel::new();
        llm.set_chars_per_token(1); // one token per char, so budget is exactly char count
        let assembler = ContextAssembler::new(&llm, 40);

        let mut conversation = Conversation::empty("C1", "agent-1", "K");
        for i in 0..10 {
            conversation.messages.push(message(&format!("msg{i}"), i));
        }

        let prompt = assembler
            .assemble("identity", &conversation, None, &[], &[], "new")
            .await
            .unwrap();

        // Oldest messages should have been dropped, newest retained, and
        // chronological order preserved among what's kept.
        assert!(!prompt.history.is_empty());
        assert!(prompt.history.len() < conversation.messages.len());
        for pair in prompt.history.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        assert_eq!(prompt.history.last().unwrap().content, "msg9");
    }

    #[tokio::test]
    async fn new_message_is_never_dropped() {
        let llm = MockLanguageModel::new();
        let assembler = ContextAssembler::new(&llm, 1); // absurdly tight budget
        let conversation = Conversation::empty("C1", "agent-1", "K");

        let prompt = assembler
            .assemble("identity", &conversation, None, &[], &[], "must stay")
            .await
            .unwrap();

        assert_eq!(prompt.new_message, "must stay");
        assert!(prompt.history.is_empty());
    }
}
