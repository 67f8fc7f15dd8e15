use crate::chain::ChatChain;
use crate::error::Result;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Append-only, oldest-first list of messages shown in the chat.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
        });
    }

    /// Completed `(question, answer)` pairs. A question whose answer failed
    /// is left out.
    pub fn exchanges(&self) -> Vec<(String, String)> {
        self.messages
            .windows(2)
            .filter(|pair| pair[0].role == Role::User && pair[1].role == Role::Assistant)
            .map(|pair| (pair[0].content.clone(), pair[1].content.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suggestion {
    pub label: &'static str,
    pub query: &'static str,
}

pub const SUGGESTIONS: [Suggestion; 3] = [
    Suggestion {
        label: "What is my schedule tomorrow?",
        query: "What is my schedule tomorrow?",
    },
    Suggestion {
        label: "What companies did I work for?",
        query: "What companies did I work for?",
    },
    Suggestion {
        label: "what was a expensive recent purchase?",
        query: "what was the most expensive thing I bought recently?",
    },
];

/// What a line typed at the prompt means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Suggestion(Suggestion),
    Question(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }

        let selected = line
            .strip_prefix('/')
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| SUGGESTIONS.get(i));

        match selected {
            Some(suggestion) => Input::Suggestion(*suggestion),
            None => Input::Question(line.to_string()),
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            Input::Empty => None,
            Input::Suggestion(suggestion) => Some(suggestion.query),
            Input::Question(question) => Some(question),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Answering,
}

pub struct ChatSession {
    chain: Arc<dyn ChatChain>,
    transcript: Transcript,
    state: State,
    carry_history: bool,
}

impl ChatSession {
    pub fn new(chain: Arc<dyn ChatChain>, carry_history: bool) -> Self {
        Self {
            chain,
            transcript: Transcript::default(),
            state: State::Idle,
            carry_history,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Runs one question/answer cycle. A blank query is ignored and returns
    /// `Ok(None)`. On failure the user message stays in the transcript and no
    /// answer is added.
    pub async fn submit(&mut self, query: &str) -> Result<Option<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }

        let history = if self.carry_history {
            self.transcript.exchanges()
        } else {
            Vec::new()
        };

        self.transcript.push(Role::User, query);
        self.state = State::Answering;
        let result = self.chain.ask(query, &history).await;
        self.state = State::Idle;

        let answer = result?;
        self.transcript.push(Role::Assistant, answer.clone());
        Ok(Some(answer))
    }
}
