//! Deterministic scripted backend for tests and offline runs
//!
//! Responses are consumed in FIFO order, one per `generate` call; an
//! exhausted script is an error so tests fail loudly instead of looping
//! on stale output.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ChatMessage, LlmError, TextGenerator};

#[derive(Default)]
pub struct StubTextGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl StubTextGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("stub script lock poisoned")
            .push_back(response.into());
    }
}

#[async_trait::async_trait]
impl TextGenerator for StubTextGenerator {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.responses
            .lock()
            .expect("stub script lock poisoned")
            .pop_front()
            .ok_or_else(|| LlmError::Api("stub response script exhausted".to_string()))
    }

    fn name(&self) -> &str {
        "stub"
    }
}
