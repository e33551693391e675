use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Agent => f.write_str("Agent"),
            Speaker::User => f.write_str("User"),
        }
    }
}

/// One utterance. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            speaker,
            text: text.into(),
        }
    }
}

impl fmt::Display for TranscriptTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.speaker,
            self.text
        )
    }
}

/// Turns in arrival order. No reordering, no deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptAccumulator {
    turns: Vec<TranscriptTurn>,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: TranscriptTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[TranscriptTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
    }

    /// One line per turn: `[<rfc3339>] <Speaker>: <text>`. Persisted verbatim.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn turn(speaker: Speaker, second: u32, text: &str) -> TranscriptTurn {
        TranscriptTurn {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
            speaker,
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_transcript_renders_empty() {
        assert_eq!(TranscriptAccumulator::new().render(), "");
    }

    #[test]
    fn renders_turns_in_arrival_order() {
        let mut transcript = TranscriptAccumulator::new();
        transcript.append(turn(Speaker::Agent, 5, "Why this role?"));
        // Arrives later but carries an earlier timestamp; order is kept as received.
        transcript.append(turn(Speaker::User, 3, "I like distributed systems."));
        transcript.append(turn(Speaker::User, 3, "I like distributed systems."));

        let rendered = transcript.render();
        assert_eq!(
            rendered,
            "[2024-05-01T10:00:05Z] Agent: Why this role?\n\
             [2024-05-01T10:00:03Z] User: I like distributed systems.\n\
             [2024-05-01T10:00:03Z] User: I like distributed systems."
        );
        assert_eq!(rendered, transcript.render());
        assert_eq!(transcript.len(), 3);
    }
}
