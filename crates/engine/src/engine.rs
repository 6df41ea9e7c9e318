//! The dialogue turn loop.
//!
//! One engine drives one dialogue to completion: it owns the per-agent
//! message ledgers, asks each seat's client for a streaming completion in
//! speaking order, and emits totally-ordered events on a bounded channel.
//! Turns never overlap; a turn never starts before the previous turn's
//! `turn_complete` has been emitted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use pl_domain::cancel::CancelToken;
use pl_domain::config::ConfigStore;
use pl_domain::dialogue::{DialogueEvent, DialogueMode, DialogueSpec, FinishReason};
use pl_domain::error::{Error, Result};
use pl_domain::message::Message;
use pl_domain::stream::StreamEvent;
use pl_providers::{ChatClient, ChatRequest};

use crate::prompts;

/// Bounded event channel capacity; the engine blocks (but stays
/// cancellable) when the caller falls this far behind.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How often a blocked emit or read re-checks the cancellation flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Timestamp format used in outcomes and history records.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of the rendered transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    /// Marks the start of a topic block (debate batches, discussion opener).
    TopicHeader(String),
    /// One complete utterance, including user inputs in chat mode.
    Utterance { speaker: String, text: String },
}

/// What a finished dialogue leaves behind for persistence.
#[derive(Debug, Clone)]
pub struct DialogueOutcome {
    pub reason: FinishReason,
    pub entries: Vec<TranscriptEntry>,
    /// `%Y-%m-%d %H:%M:%S`, local time.
    pub started_at: String,
    pub ended_at: String,
}

impl DialogueOutcome {
    /// Utterance count (topic headers excluded).
    pub fn utterances(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, TranscriptEntry::Utterance { .. }))
            .count()
    }

    /// Render the transcript as display text.
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(|entry| match entry {
                TranscriptEntry::TopicHeader(topic) => format!("=== {topic} ==="),
                TranscriptEntry::Utterance { speaker, text } => format!("{speaker}: {text}"),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One seat bound to its client, prompt template, and message ledger.
///
/// The ledger is this agent's private view: its own utterances as
/// `assistant`, everyone else's as `user`.
struct AgentBinding {
    seat: pl_domain::dialogue::AgentSeat,
    client: Arc<dyn ChatClient>,
    prompt_template: String,
    ledger: Vec<Message>,
}

/// Drives one [`DialogueSpec`] to completion.
pub struct DialogueEngine {
    spec: DialogueSpec,
    agents: Vec<AgentBinding>,
    events: mpsc::Sender<DialogueEvent>,
    cancel: CancelToken,
    deadline: Option<Instant>,
    turn_index: u32,
    entries: Vec<TranscriptEntry>,
    user_input: Option<mpsc::Receiver<String>>,
}

impl DialogueEngine {
    /// Bind a spec to its clients (one per seat, same order).
    ///
    /// Prompt templates resolve once here from `config`, environment, and
    /// built-in defaults; `{topic}` stays unexpanded until each topic block
    /// builds its ledgers.
    pub fn new(
        spec: DialogueSpec,
        clients: Vec<Arc<dyn ChatClient>>,
        config: Option<&ConfigStore>,
        events: mpsc::Sender<DialogueEvent>,
        cancel: CancelToken,
    ) -> Result<Self> {
        spec.validate()?;
        if clients.len() != spec.agents.len() {
            return Err(Error::Config(format!(
                "{} clients supplied for {} agent seats",
                clients.len(),
                spec.agents.len()
            )));
        }

        let agents = spec
            .agents
            .iter()
            .cloned()
            .zip(clients)
            .map(|(seat, client)| AgentBinding {
                prompt_template: prompts::system_prompt(config, spec.mode, seat.role, None),
                seat,
                client,
                ledger: Vec::new(),
            })
            .collect();

        Ok(Self {
            spec,
            agents,
            events,
            cancel,
            deadline: None,
            turn_index: 0,
            entries: Vec::new(),
            user_input: None,
        })
    }

    /// Attach the user-input channel for chat mode. The engine suspends on
    /// it each round; closing the channel ends the chat cleanly.
    pub fn with_user_input(mut self, input: mpsc::Receiver<String>) -> Self {
        self.user_input = Some(input);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the dialogue to its terminal event.
    ///
    /// Never panics on provider failure: fatal errors become an `error`
    /// event plus `finished(error)`, and the outcome keeps whatever
    /// transcript was produced.
    pub async fn run(mut self) -> DialogueOutcome {
        let started_at = Local::now().format(TIME_FORMAT).to_string();
        self.deadline = self.spec.time_limit.map(|limit| Instant::now() + limit);

        let result = match self.spec.mode {
            DialogueMode::Chat => self.run_chat().await,
            DialogueMode::Discussion => self.run_discussion().await,
            DialogueMode::Debate => self.run_debate().await,
        };

        let reason = match result {
            Ok(()) => FinishReason::Completed,
            Err(Error::Cancelled) => FinishReason::Cancelled,
            Err(Error::Deadline) => FinishReason::Deadline,
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "dialogue failed");
                let _ = self
                    .events
                    .send(DialogueEvent::Error {
                        kind: e.kind().to_owned(),
                        message: pl_providers::mask_secrets(&e.to_string()),
                    })
                    .await;
                FinishReason::Error
            }
        };

        let _ = self
            .events
            .send(DialogueEvent::Finished { reason })
            .await;

        tracing::info!(?reason, turns = self.turn_index, "dialogue finished");
        DialogueOutcome {
            reason,
            entries: self.entries,
            started_at,
            ended_at: Local::now().format(TIME_FORMAT).to_string(),
        }
    }

    // ── mode loops ─────────────────────────────────────────────────

    async fn run_chat(&mut self) -> Result<()> {
        self.reset_ledgers(None);
        let Some(mut input) = self.user_input.take() else {
            // No input channel: nothing to converse about.
            return Ok(());
        };

        for _ in 0..self.spec.rounds {
            self.check_budget()?;
            let Some(user_text) =
                await_user_input(&mut input, &self.cancel, self.deadline).await?
            else {
                break; // caller closed the channel: chat is over
            };
            self.agents[0].ledger.push(Message::user(&user_text));
            self.entries.push(TranscriptEntry::Utterance {
                speaker: "user".into(),
                text: user_text,
            });

            let reply = self.take_turn(0).await?;
            self.record_utterance(0, &reply);
        }
        Ok(())
    }

    async fn run_discussion(&mut self) -> Result<()> {
        let topic = self.spec.topics().remove(0);
        self.entries.push(TranscriptEntry::TopicHeader(topic.clone()));
        self.reset_ledgers(Some(&topic));

        for turn in 0..(2 * self.spec.rounds) {
            let idx = (turn % 2) as usize;
            let text = self.take_turn(idx).await?;
            self.record_utterance(idx, &text);
        }

        self.closing_turn(prompts::SUMMARISER_CUE).await
    }

    async fn run_debate(&mut self) -> Result<()> {
        for topic in self.spec.topics() {
            self.entries.push(TranscriptEntry::TopicHeader(topic.clone()));
            self.reset_ledgers(Some(&topic));

            for turn in 0..(2 * self.spec.rounds) {
                let idx = (turn % 2) as usize;
                let text = self.take_turn(idx).await?;
                self.record_utterance(idx, &text);
            }

            self.closing_turn(prompts::JUDGE_CUE).await?;
        }
        Ok(())
    }

    /// The third seat closes a block: cue it, let it speak once over the
    /// accumulated ledger.
    async fn closing_turn(&mut self, cue: &str) -> Result<()> {
        let closer = self.agents.len() - 1;
        self.agents[closer].ledger.push(Message::user(cue));
        let text = self.take_turn(closer).await?;
        self.record_utterance(closer, &text);
        Ok(())
    }

    // ── one turn ───────────────────────────────────────────────────

    /// Stream one completion from seat `idx`, emitting status, deltas, and
    /// the turn-complete event.
    ///
    /// Cancellation mid-stream discards the partial text; once the `Done`
    /// terminator has arrived the utterance counts and its `turn_complete`
    /// is still emitted.
    async fn take_turn(&mut self, idx: usize) -> Result<String> {
        self.check_budget()?;

        let role = self.agents[idx].seat.role;
        let label = self.agents[idx].seat.label();
        let client = self.agents[idx].client.clone();
        let req = ChatRequest {
            messages: self.agents[idx].ledger.clone(),
            model: self.agents[idx].seat.model.clone(),
            temperature: self.spec.temperature,
            yield_full_response: false,
            timeout: Some(self.per_call_timeout()),
        };

        self.emit(DialogueEvent::Status {
            message: format!("starting {role} on {label}"),
        })
        .await?;

        let mut stream = client.chat_stream(&req).await?;
        let mut text = String::new();
        let mut completed = false;

        'read: loop {
            match tokio::time::timeout(CANCEL_POLL, stream.next()).await {
                Err(_) => {
                    // Blocked on the wire: abort promptly on cancellation.
                    if self.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                }
                Ok(None) => break 'read,
                Ok(Some(event)) => match event? {
                    StreamEvent::Delta { text: delta } => {
                        if self.cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        text.push_str(&delta);
                        self.emit(DialogueEvent::Delta { role, text: delta }).await?;
                    }
                    StreamEvent::Done => {
                        completed = true;
                        break 'read;
                    }
                },
            }
        }

        if !completed && self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.emit(DialogueEvent::TurnComplete {
            role,
            text: text.clone(),
        })
        .await?;
        Ok(text)
    }

    // ── ledger & transcript bookkeeping ────────────────────────────

    /// Rebuild every ledger for a new block: system prompt with `{topic}`
    /// expanded, plus the topic primer.
    fn reset_ledgers(&mut self, topic: Option<&str>) {
        let mode = self.spec.mode;
        for agent in &mut self.agents {
            let prompt = match topic {
                Some(t) => agent.prompt_template.replace("{topic}", t),
                None => agent.prompt_template.clone(),
            };
            agent.ledger.clear();
            if !prompt.is_empty() {
                agent.ledger.push(Message::system(prompt));
            }
            if let Some(t) = topic {
                agent.ledger.push(Message::user(prompts::topic_primer(mode, t)));
            }
        }
    }

    /// Append a finished utterance to the speaker's ledger as `assistant`,
    /// to every other ledger as `user`, and to the transcript.
    fn record_utterance(&mut self, speaker_idx: usize, text: &str) {
        for (j, agent) in self.agents.iter_mut().enumerate() {
            if j == speaker_idx {
                agent.ledger.push(Message::assistant(text));
            } else {
                agent.ledger.push(Message::user(text));
            }
        }
        let seat = &self.agents[speaker_idx].seat;
        let speaker = format!("{} ({})", seat.role, seat.label());
        self.entries.push(TranscriptEntry::Utterance {
            speaker,
            text: text.to_owned(),
        });
        self.turn_index += 1;
    }

    // ── budget & emission ──────────────────────────────────────────

    fn check_budget(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Deadline);
            }
        }
        Ok(())
    }

    /// Per-request timeout: the remaining wall-clock budget, capped.
    fn per_call_timeout(&self) -> Duration {
        let cap = pl_providers::STREAM_TIMEOUT;
        match self.deadline {
            Some(deadline) => cap.min(deadline.saturating_duration_since(Instant::now())),
            None => cap,
        }
    }

    /// Send with back-pressure, staying cancellable while blocked.
    async fn emit(&self, event: DialogueEvent) -> Result<()> {
        let mut event = Some(event);
        loop {
            match tokio::time::timeout(CANCEL_POLL, self.events.reserve()).await {
                Ok(Ok(permit)) => {
                    permit.send(event.take().expect("event sent once"));
                    return Ok(());
                }
                // Receiver dropped: nobody is listening, stop working.
                Ok(Err(_)) => return Err(Error::Cancelled),
                Err(_) => {
                    if self.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
    }
}

/// Wait for the next chat input, staying responsive to cancellation and the
/// deadline. `None` means the caller closed the channel.
async fn await_user_input(
    input: &mut mpsc::Receiver<String>,
    cancel: &CancelToken,
    deadline: Option<Instant>,
) -> Result<Option<String>> {
    loop {
        match tokio::time::timeout(CANCEL_POLL, input.recv()).await {
            Ok(message) => return Ok(message),
            Err(_) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(Error::Deadline);
                    }
                }
            }
        }
    }
}
