//! Conversation log and its persisted checkpoint form

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current checkpoint schema version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Speaker of a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single utterance in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation log.
///
/// Turns are only ever added as complete user/assistant pairs through
/// [`Session::with_exchange`], which returns a new value and leaves the
/// original untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    id: String,
    turns: Vec<Turn>,
}

impl Session {
    /// A session with no history
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The trailing `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// New log with one exchange appended
    pub fn with_exchange(&self, user: Turn, assistant: Turn) -> Session {
        debug_assert_eq!(user.role, Role::User);
        debug_assert_eq!(assistant.role, Role::Assistant);

        let mut turns = Vec::with_capacity(self.turns.len() + 2);
        turns.extend_from_slice(&self.turns);
        turns.push(user);
        turns.push(assistant);

        Session {
            id: self.id.clone(),
            turns,
        }
    }
}

/// Durable form of a session, keyed by session id
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn from_session(session: &Session) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id: session.id.clone(),
            turns: session.turns.clone(),
            updated_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate a stored checkpoint for `session_id`
    pub fn decode(session_id: &str, raw: &str) -> Result<Self> {
        let checkpoint: Checkpoint =
            serde_json::from_str(raw).map_err(|e| AppError::CheckpointCorrupt {
                key: session_id.to_string(),
                message: e.to_string(),
            })?;
        checkpoint.validate(session_id)?;
        Ok(checkpoint)
    }

    fn validate(&self, session_id: &str) -> Result<()> {
        let corrupt = |message: String| AppError::CheckpointCorrupt {
            key: session_id.to_string(),
            message,
        };

        if self.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!("unsupported version {}", self.version)));
        }

        if self.session_id != session_id {
            return Err(corrupt(format!("belongs to session {}", self.session_id)));
        }

        if self.turns.len() % 2 != 0 {
            return Err(corrupt(format!("odd turn count {}", self.turns.len())));
        }

        for (i, pair) in self.turns.chunks(2).enumerate() {
            if pair[0].role != Role::User || pair[1].role != Role::Assistant {
                return Err(corrupt(format!("exchange {} is not a user/assistant pair", i)));
            }
        }

        Ok(())
    }

    pub fn into_session(self) -> Session {
        Session {
            id: self.session_id,
            turns: self.turns,
        }
    }
}
