//! Deterministic, scriptable `LanguageModel` test double.
//!
//! Grounded in `internal/llm/mock/llm.go`'s per-method FIFO queue pattern:
//! tests enqueue the response (or error) each call should return, then later
//! inspect what arguments each call was made with.

use super::LanguageModel;
use crate::domain::{Conversation, DraftKnowledge, LlmResponse, Summary};
use crate::error::MemoryError;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

enum Queued<T> {
    Ok(T),
    Err(String),
}

struct Queue<T> {
    items: Mutex<VecDeque<Queued<T>>>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> Queue<T> {
    fn push_ok(&self, value: T) {
        self.items.lock().unwrap().push_back(Queued::Ok(value));
    }

    fn push_err(&self, message: impl Into<String>) {
        self.items
            .lock()
            .unwrap()
            .push_back(Queued::Err(message.into()));
    }

    fn pop(&self) -> Result<T> {
        match self.items.lock().unwrap().pop_front() {
            Some(Queued::Ok(value)) => Ok(value),
            Some(Queued::Err(message)) => Err(MemoryError::LlmUnavailable(message)),
            None => Err(MemoryError::LlmUnavailable(
                "mock language model: no queued response".to_string(),
            )),
        }
    }
}

#[derive(Default)]
pub struct MockLanguageModel {
    send_message_responses: Queue<LlmResponse>,
    send_message_inputs: Mutex<Vec<String>>,

    continuance_responses: Queue<bool>,
    continuance_inputs: Mutex<Vec<String>>,

    summarize_responses: Queue<Option<Summary>>,
    summarize_inputs: Mutex<Vec<String>>,

    learn_responses: Queue<Vec<DraftKnowledge>>,
    learn_inputs: Mutex<Vec<String>>,

    chars_per_token: Mutex<usize>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            chars_per_token: Mutex::new(4),
            ..Default::default()
        }
    }

    pub fn set_chars_per_token(&self, n: usize) {
        *self.chars_per_token.lock().unwrap() = n.max(1);
    }

    pub fn add_send_message_response(&self, response: LlmResponse) {
        self.send_message_responses.push_ok(response);
    }

    pub fn add_send_message_error(&self, message: impl Into<String>) {
        self.send_message_responses.push_err(message);
    }

    pub fn send_message_inputs(&self) -> Vec<String> {
        self.send_message_inputs.lock().unwrap().clone()
    }

    pub fn add_continuance_response(&self, should_continue: bool) {
        self.continuance_responses.push_ok(should_continue);
    }

    pub fn add_continuance_error(&self, message: impl Into<String>) {
        self.continuance_responses.push_err(message);
    }

    pub fn continuance_inputs(&self) -> Vec<String> {
        self.continuance_inputs.lock().unwrap().clone()
    }

    pub fn add_summarize_response(&self, summary: Option<Summary>) {
        self.summarize_responses.push_ok(summary);
    }

    pub fn add_summarize_error(&self, message: impl Into<String>) {
        self.summarize_responses.push_err(message);
    }

    pub fn add_learn_response(&self, facts: Vec<DraftKnowledge>) {
        self.learn_responses.push_ok(facts);
    }

    pub fn add_learn_error(&self, message: impl Into<String>) {
        self.learn_responses.push_err(message);
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn send_message(
        &self,
        _identity: &str,
        conversation: &Conversation,
        _previous_summaries: &[Summary],
        _knowledge: &[String],
        new_message: &str,
    ) -> Result<LlmResponse> {
        self.send_message_inputs
            .lock()
            .unwrap()
            .push(format!("{}:{}", conversation.id, new_message));
        self.send_message_responses.pop()
    }

    async fn conversation_continuance(
        &self,
        new_message: &str,
        conversation: &Conversation,
        _summary: &Summary,
    ) -> Result<bool> {
        self.continuance_inputs
            .lock()
            .unwrap()
            .push(format!("{}:{}", conversation.id, new_message));
        self.continuance_responses.pop()
    }

    async fn summarize(
        &self,
        conversation: &Conversation,
        _previous_summary: Option<&Summary>,
    ) -> Result<Option<Summary>> {
        self.summarize_inputs.lock().unwrap().push(conversation.id.clone());
        self.summarize_responses.pop()
    }

    async fn learn(
        &self,
        conversation: &Conversation,
        _summary: Option<&Summary>,
    ) -> Result<Vec<DraftKnowledge>> {
        self.learn_inputs.lock().unwrap().push(conversation.id.clone());
        self.learn_responses.pop()
    }

    async fn estimate_tokens(&self, text: &str) -> Result<usize> {
        let chars_per_token = *self.chars_per_token.lock().unwrap();
        Ok(text.len().div_ceil(chars_per_token).max(1))
    }
}
