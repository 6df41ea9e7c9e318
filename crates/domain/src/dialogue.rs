//! Dialogue specification and the engine's caller-facing event type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::ProviderTag;

/// The three conversational modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueMode {
    /// One assistant, user-driven turns.
    Chat,
    /// Two scholars alternate, an expert synthesises at the end.
    Discussion,
    /// Pro and con alternate, a judge delivers a verdict per topic.
    Debate,
}

/// The parts an agent can play in a dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    ChatAssistant,
    ScholarA,
    ScholarB,
    ExpertSummariser,
    ProDebater,
    ConDebater,
    Judge,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::ChatAssistant => "chat-assistant",
            AgentRole::ScholarA => "scholar-a",
            AgentRole::ScholarB => "scholar-b",
            AgentRole::ExpertSummariser => "expert-summariser",
            AgentRole::ProDebater => "pro-debater",
            AgentRole::ConDebater => "con-debater",
            AgentRole::Judge => "judge",
        }
    }

    /// Whether this role closes a dialogue (summariser or judge).
    pub fn is_closer(self) -> bool {
        matches!(self, AgentRole::ExpertSummariser | AgentRole::Judge)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured (role, provider, model) triple that takes turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSeat {
    pub role: AgentRole,
    pub provider: ProviderTag,
    pub model: String,
}

impl AgentSeat {
    pub fn new(role: AgentRole, provider: ProviderTag, model: impl Into<String>) -> Self {
        Self {
            role,
            provider,
            model: model.into(),
        }
    }

    /// `provider/model` label used in status events and history records.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// What the caller asks the engine to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSpec {
    pub mode: DialogueMode,
    /// Discussion topic / single debate motion. Ignored in chat mode.
    #[serde(default)]
    pub topic: Option<String>,
    /// Additional debate motions run serially after `topic`.
    #[serde(default)]
    pub extra_topics: Vec<String>,
    /// Speaking order. Chat: 1 seat. Discussion/debate: 2 speakers + closer.
    pub agents: Vec<AgentSeat>,
    pub rounds: u32,
    /// Wall-clock budget for the whole run.
    #[serde(default, with = "opt_secs")]
    pub time_limit: Option<Duration>,
    pub temperature: f32,
}

/// `time_limit` travels as whole seconds on the wire.
mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(v: &Option<Duration>, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match v {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}

impl DialogueSpec {
    /// All debate motions, in run order.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        if let Some(t) = &self.topic {
            topics.push(t.clone());
        }
        topics.extend(self.extra_topics.iter().cloned());
        topics
    }

    /// Reject specs the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.rounds < 1 {
            return Err(Error::Config("rounds must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature {} outside [0.0, 2.0]",
                self.temperature
            )));
        }
        let expected_seats = match self.mode {
            DialogueMode::Chat => 1,
            DialogueMode::Discussion | DialogueMode::Debate => 3,
        };
        if self.agents.len() != expected_seats {
            return Err(Error::Config(format!(
                "{:?} mode needs {} agent seat(s), got {}",
                self.mode,
                expected_seats,
                self.agents.len()
            )));
        }
        if self.mode != DialogueMode::Chat && self.topics().is_empty() {
            return Err(Error::Config("discussion/debate requires a topic".into()));
        }
        // Only debate runs a topic list; anywhere else extra topics would
        // be silently dropped.
        if self.mode != DialogueMode::Debate && !self.extra_topics.is_empty() {
            return Err(Error::Config(format!(
                "{:?} mode takes a single topic, got {} extra",
                self.mode,
                self.extra_topics.len()
            )));
        }
        Ok(())
    }
}

/// Why a dialogue finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Completed,
    Cancelled,
    Deadline,
    Error,
}

/// Events emitted by the dialogue engine, totally ordered per run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DialogueEvent {
    /// A turn is about to start: "starting scholar-a on ollama/llama3".
    #[serde(rename = "status")]
    Status { message: String },

    /// Incremental text from the speaking agent.
    #[serde(rename = "stream_delta")]
    Delta { role: AgentRole, text: String },

    /// One complete utterance.
    #[serde(rename = "turn_complete")]
    TurnComplete { role: AgentRole, text: String },

    /// A fatal provider or engine error; `Finished { Error }` follows.
    #[serde(rename = "error")]
    Error { kind: String, message: String },

    /// Terminal event; nothing follows.
    #[serde(rename = "finished")]
    Finished { reason: FinishReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(role: AgentRole) -> AgentSeat {
        AgentSeat::new(role, ProviderTag::Ollama, "llama3")
    }

    fn discussion_spec() -> DialogueSpec {
        DialogueSpec {
            mode: DialogueMode::Discussion,
            topic: Some("test topic".into()),
            extra_topics: vec![],
            agents: vec![
                seat(AgentRole::ScholarA),
                seat(AgentRole::ScholarB),
                seat(AgentRole::ExpertSummariser),
            ],
            rounds: 2,
            time_limit: None,
            temperature: 0.8,
        }
    }

    #[test]
    fn valid_discussion_spec_passes() {
        assert!(discussion_spec().validate().is_ok());
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut spec = discussion_spec();
        spec.rounds = 0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut spec = discussion_spec();
        spec.temperature = 2.5;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn chat_needs_exactly_one_seat() {
        let spec = DialogueSpec {
            mode: DialogueMode::Chat,
            topic: None,
            extra_topics: vec![],
            agents: vec![seat(AgentRole::ChatAssistant), seat(AgentRole::ScholarA)],
            rounds: 1,
            time_limit: None,
            temperature: 0.0,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn missing_topic_rejected_outside_chat() {
        let mut spec = discussion_spec();
        spec.topic = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn topics_run_in_order() {
        let mut spec = discussion_spec();
        spec.mode = DialogueMode::Debate;
        spec.extra_topics = vec!["second".into()];
        assert_eq!(spec.topics(), vec!["test topic", "second"]);
    }

    #[test]
    fn extra_topics_rejected_outside_debate() {
        let mut spec = discussion_spec();
        spec.extra_topics = vec!["second".into()];
        assert!(spec.validate().is_err());

        spec.mode = DialogueMode::Debate;
        spec.agents = vec![
            seat(AgentRole::ProDebater),
            seat(AgentRole::ConDebater),
            seat(AgentRole::Judge),
        ];
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn seat_label_shape() {
        assert_eq!(seat(AgentRole::ScholarA).label(), "ollama/llama3");
    }

    #[test]
    fn event_serialization_tags() {
        let ev = DialogueEvent::TurnComplete {
            role: AgentRole::Judge,
            text: "verdict".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"turn_complete\""));
        assert!(json.contains("\"role\":\"judge\""));
    }
}
