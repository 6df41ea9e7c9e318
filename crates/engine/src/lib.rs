//! Multi-agent dialogue engine.
//!
//! Hosts hand a [`DialogueSpec`](pl_domain::dialogue::DialogueSpec) plus one
//! chat client per seat to [`DialogueEngine`], then drain the event channel:
//! `status`, `stream_delta`, `turn_complete` per utterance, one `finished`
//! at the end. Three modes share the turn skeleton: chat (user-driven),
//! discussion (A/B alternation plus an expert synthesis), and debate
//! (pro/con alternation plus a judge verdict, serially over a topic list).

mod engine;
pub mod prompts;

pub use engine::{DialogueEngine, DialogueOutcome, TranscriptEntry, EVENT_CHANNEL_CAPACITY};
